mod telemetry;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assess_core::model::{SessionMode, TestDefinition};
use services::{
    Advance, AnswerOutcome, AppServices, Clock, EngineConfig, RunningSession, SessionOutcome,
};
use storage::HttpStoreConfig;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::{info, warn};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingTest,
    UnknownArg(String),
    InvalidStore { raw: String },
    InvalidDb { raw: String },
    InvalidMode { raw: String },
    InvalidExtra { raw: String },
    MissingApiUrl,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingTest => write!(f, "--test <file.json> is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidStore { raw } => write!(f, "invalid --store value: {raw}"),
            ArgsError::InvalidDb { raw } => write!(f, "invalid --db value: {raw:?}"),
            ArgsError::InvalidMode { raw } => write!(f, "invalid --mode value: {raw}"),
            ArgsError::InvalidExtra { raw } => write!(f, "invalid --extra value: {raw}"),
            ArgsError::MissingApiUrl => {
                write!(f, "--store http needs --api-url or ASSESS_API_URL")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- take     --test <file.json> [--mode test|study] [options]");
    eprintln!("  cargo run -p app -- status   --test <file.json> [options]");
    eprintln!("  cargo run -p app -- history  --test <file.json> [options]");
    eprintln!("  cargo run -p app -- register --test <file.json> [options]   # admin");
    eprintln!("  cargo run -p app -- reset    --test <file.json> [options]   # admin");
    eprintln!("  cargo run -p app -- grant    --test <file.json> --extra <n> [options]   # admin");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --store memory|sqlite|http   (default sqlite)");
    eprintln!("  --db <path>|:memory:         (default assess.sqlite3)");
    eprintln!("  --api-url <url>              (http store)");
    eprintln!("  --user <name>                (default guest)");
    eprintln!();
    eprintln!("Local stores learn a test's attempt limit the first time they see it;");
    eprintln!("use `register` to change it afterwards.");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  ASSESS_STORE, ASSESS_DB, ASSESS_USER, ASSESS_API_URL, ASSESS_API_KEY");
    eprintln!("  ASSESS_LOG (tracing filter), ASSESS_LOG_FORMAT=json");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Take,
    Status,
    History,
    Register,
    Reset,
    Grant,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "take" => Some(Self::Take),
            "status" => Some(Self::Status),
            "history" => Some(Self::History),
            "register" => Some(Self::Register),
            "reset" => Some(Self::Reset),
            "grant" => Some(Self::Grant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreKind {
    Memory,
    Sqlite,
    Http,
}

impl StoreKind {
    fn parse(raw: &str) -> Result<Self, ArgsError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "http" => Ok(Self::Http),
            _ => Err(ArgsError::InvalidStore {
                raw: raw.to_string(),
            }),
        }
    }

    /// Stores this process owns. A remote store's limits are set by its operators.
    fn is_local(self) -> bool {
        !matches!(self, Self::Http)
    }
}

/// Where the sqlite store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DbTarget {
    InMemory,
    File(PathBuf),
}

impl DbTarget {
    fn parse(raw: &str) -> Result<Self, ArgsError> {
        match raw.trim() {
            "" => Err(ArgsError::InvalidDb {
                raw: raw.to_string(),
            }),
            ":memory:" => Ok(Self::InMemory),
            path => Ok(Self::File(PathBuf::from(path))),
        }
    }
}

struct Args {
    store: StoreKind,
    db: DbTarget,
    api_url: Option<String>,
    username: String,
    test_path: PathBuf,
    mode: SessionMode,
    extra: u32,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut store = match std::env::var("ASSESS_STORE") {
            Ok(raw) => StoreKind::parse(&raw)?,
            Err(_) => StoreKind::Sqlite,
        };
        let mut db = match std::env::var("ASSESS_DB") {
            Ok(raw) => DbTarget::parse(&raw)?,
            Err(_) => DbTarget::File(PathBuf::from("assess.sqlite3")),
        };
        let mut api_url = None;
        let mut username = std::env::var("ASSESS_USER")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| "guest".into());
        let mut test_path = None;
        let mut mode = SessionMode::Test;
        let mut extra = 1;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--store" => store = StoreKind::parse(&require_value(args, "--store")?)?,
                "--db" => db = DbTarget::parse(&require_value(args, "--db")?)?,
                "--api-url" => api_url = Some(require_value(args, "--api-url")?),
                "--user" => username = require_value(args, "--user")?,
                "--test" => test_path = Some(PathBuf::from(require_value(args, "--test")?)),
                "--mode" => {
                    let value = require_value(args, "--mode")?;
                    mode = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidMode { raw: value.clone() })?;
                }
                "--extra" => {
                    let value = require_value(args, "--extra")?;
                    extra = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidExtra { raw: value.clone() })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            store,
            db,
            api_url,
            username,
            test_path: test_path.ok_or(ArgsError::MissingTest)?,
            mode,
            extra,
        })
    }
}

fn load_definition(path: &Path) -> Result<Arc<TestDefinition>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let definition: TestDefinition = serde_json::from_str(&raw)?;
    Ok(Arc::new(definition))
}

async fn build_services(args: &Args) -> Result<AppServices, Box<dyn std::error::Error>> {
    let clock = Clock::default();
    let config = EngineConfig::default();
    let services = match (args.store, &args.db) {
        (StoreKind::Memory, _) => AppServices::new_in_memory(clock, config),
        (StoreKind::Sqlite, DbTarget::InMemory) => {
            AppServices::new_sqlite("sqlite::memory:", clock, config).await?
        }
        (StoreKind::Sqlite, DbTarget::File(path)) => {
            AppServices::new_sqlite_file(path, clock, config).await?
        }
        (StoreKind::Http, _) => {
            let mut http = HttpStoreConfig::from_env()
                .or_else(|| args.api_url.clone().map(HttpStoreConfig::new))
                .ok_or(ArgsError::MissingApiUrl)?;
            if let Some(url) = &args.api_url {
                http.base_url.clone_from(url);
            }
            AppServices::new_http(http, clock, config)?
        }
    };
    Ok(services)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let mut iter = argv.into_iter().skip(1);
    let parsed = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let definition = load_definition(&parsed.test_path)?;
    let services = build_services(&parsed).await?;
    let user = parsed.username.as_str();
    let test_id = definition.id();
    info!(command = ?cmd, store = ?parsed.store, %test_id, user, "command started");

    let definitions = std::slice::from_ref(&definition);
    if cmd == Command::Register {
        services.register_definitions(definitions).await?;
        println!(
            "test {test_id} allows {} attempt(s)",
            definition.max_attempts()
        );
        return Ok(());
    }
    if parsed.store.is_local() {
        services.ensure_registered(user, definitions).await?;
    }

    match cmd {
        Command::Take => take(&services, user, definition, parsed.mode).await,
        Command::Status => {
            let status = services.session_loop().status(user, test_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::History => {
            let history = services.session_loop().history(user, test_id).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
            Ok(())
        }
        Command::Reset => {
            services.reset_attempts(user, test_id).await?;
            println!("attempts reset for {user} on test {test_id}");
            Ok(())
        }
        Command::Grant => {
            let allowance = services
                .grant_attempts(user, test_id, parsed.extra)
                .await?;
            println!("{user} may now attempt test {test_id} {allowance} time(s)");
            Ok(())
        }
        Command::Register => Ok(()),
    }
}

//
// ─── INTERACTIVE SESSION ───────────────────────────────────────────────────────
//

enum Input {
    Choice(usize),
    Next,
    Previous,
    Finish,
    Pause,
    Abandon,
    Unknown,
}

fn parse_input(line: &str) -> Input {
    match line.trim() {
        "n" => Input::Next,
        "p" => Input::Previous,
        "f" => Input::Finish,
        "x" => Input::Pause,
        "q" => Input::Abandon,
        other => other
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .map_or(Input::Unknown, Input::Choice),
    }
}

fn confirms(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// How the interactive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Finish,
    Abandon,
    Pause,
}

fn print_question(running: &RunningSession) {
    let session = running.session();
    let progress = running.progress();
    let Some(question) = session.current_question() else {
        return;
    };
    println!();
    println!(
        "[{}/{}] {}",
        progress.position + 1,
        progress.total,
        question.prompt()
    );
    for (i, option) in session
        .displayed_options()
        .unwrap_or_default()
        .into_iter()
        .enumerate()
    {
        println!("  {}. {option}", i + 1);
    }
}

async fn take(
    services: &AppServices,
    user: &str,
    definition: Arc<TestDefinition>,
    mode: SessionMode,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut running = services
        .session_loop()
        .start_session(user, definition, mode)
        .await?;

    for notice in running.notices() {
        eprintln!("note: {notice}");
    }
    if running.is_resumed() {
        println!("Resuming where you left off.");
    }
    println!("Answer with a number. n = next, p = previous (study), f = finish,");
    println!("x = save and exit, q = abandon this attempt.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let exit = play(&mut running, &mut lines).await?;

    match exit {
        Exit::Finish => print_outcome(&running.finish().await?),
        Exit::Abandon => print_outcome(&running.abandon().await?),
        Exit::Pause => {
            let graded = mode.is_graded();
            let saved = running.pause().await;
            if saved {
                println!("Progress saved. Run `take` again to continue.");
            } else if graded {
                warn!(user, "exited without saving progress");
                eprintln!("note: progress could not be saved; the next start may begin fresh");
            }
        }
    }
    Ok(())
}

/// Drive the session from `lines` until the user finishes, pauses or abandons.
///
/// End of input pauses.
async fn play<R>(
    running: &mut RunningSession,
    lines: &mut Lines<R>,
) -> Result<Exit, Box<dyn std::error::Error>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        print_question(running);
        let Some(line) = lines.next_line().await? else {
            return Ok(Exit::Pause);
        };
        match parse_input(&line) {
            Input::Choice(display) => {
                if let Err(err) = running.select_option(display) {
                    eprintln!("{err}");
                    continue;
                }
                let outcome = running.submit_answer()?;
                report_answer(running, &outcome);
                if running.next()? == Advance::ReadyToFinish {
                    return Ok(Exit::Finish);
                }
            }
            Input::Next => match running.next() {
                Ok(Advance::Question(_)) => {}
                Ok(Advance::ReadyToFinish) => return Ok(Exit::Finish),
                Err(err) => eprintln!("{err}"),
            },
            Input::Previous => {
                if let Err(err) = running.previous() {
                    eprintln!("{err}");
                }
            }
            Input::Finish => return Ok(Exit::Finish),
            Input::Pause => return Ok(Exit::Pause),
            Input::Abandon => {
                println!("Abandon this attempt? It is recorded as failed. [y/N]");
                match lines.next_line().await? {
                    None => return Ok(Exit::Pause),
                    Some(answer) if confirms(&answer) => return Ok(Exit::Abandon),
                    Some(_) => println!("Continuing."),
                }
            }
            Input::Unknown => eprintln!("enter an option number or one of n, p, f, x, q"),
        }
    }
}

fn report_answer(running: &RunningSession, outcome: &AnswerOutcome) {
    if outcome.is_correct {
        println!("Correct.");
    } else if let Some(correct) = outcome.correct_display_index {
        println!("Incorrect. The answer was {}.", correct + 1);
    } else {
        println!("Incorrect.");
    }
    if running.session().mode() == SessionMode::Study {
        let explanation = running
            .definition()
            .questions()
            .iter()
            .find(|q| q.id() == outcome.question_id)
            .and_then(|q| q.explanation());
        if let Some(explanation) = explanation {
            println!("  {explanation}");
        }
    }
}

fn print_outcome(outcome: &SessionOutcome) {
    let score = &outcome.report.score;
    println!();
    println!(
        "{} of {} correct ({:.0}%), {}s",
        score.correct_count,
        score.total_questions,
        score.score * 100.0,
        outcome.report.time_taken_secs
    );
    if let Some(result) = outcome.result() {
        println!(
            "Attempt {}: {}",
            result.attempt_number,
            if result.passed { "passed" } else { "not passed" }
        );
    }
    for notice in &outcome.notices {
        eprintln!("note: {notice}");
    }
}

#[tokio::main]
async fn main() {
    telemetry::init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assess_core::model::{Question, QuestionId, TestId};
    use storage::repository::{InMemoryRepository, ProgressStore, Storage};

    fn parse(args: &[&str]) -> Result<Args, ArgsError> {
        let mut iter = args.iter().map(|s| (*s).to_string());
        Args::parse(&mut iter)
    }

    #[test]
    fn args_require_a_test_file() {
        assert!(matches!(
            parse(&["--user", "ada"]),
            Err(ArgsError::MissingTest)
        ));
    }

    #[test]
    fn args_parse_store_mode_and_extra() {
        let args = parse(&[
            "--store", "memory", "--test", "t.json", "--mode", "study", "--extra", "3", "--user",
            "ada",
        ])
        .unwrap();
        assert_eq!(args.store, StoreKind::Memory);
        assert_eq!(args.mode, SessionMode::Study);
        assert_eq!(args.extra, 3);
        assert_eq!(args.username, "ada");
    }

    #[test]
    fn bad_values_are_reported() {
        assert!(matches!(
            parse(&["--store", "redis"]),
            Err(ArgsError::InvalidStore { .. })
        ));
        assert!(matches!(
            parse(&["--test", "t.json", "--mode", "exam"]),
            Err(ArgsError::InvalidMode { .. })
        ));
        assert!(matches!(
            parse(&["--db"]),
            Err(ArgsError::MissingValue { flag: "--db" })
        ));
        assert!(matches!(
            parse(&["--db", "  "]),
            Err(ArgsError::InvalidDb { .. })
        ));
    }

    #[test]
    fn db_target_accepts_paths_and_memory() {
        assert_eq!(DbTarget::parse(":memory:").unwrap(), DbTarget::InMemory);
        assert_eq!(
            DbTarget::parse("data/a.sqlite3").unwrap(),
            DbTarget::File(PathBuf::from("data/a.sqlite3"))
        );
    }

    #[test]
    fn only_remote_stores_skip_local_registration() {
        assert!(StoreKind::Memory.is_local());
        assert!(StoreKind::Sqlite.is_local());
        assert!(!StoreKind::Http.is_local());
    }

    #[test]
    fn input_is_one_based() {
        assert!(matches!(parse_input("1"), Input::Choice(0)));
        assert!(matches!(parse_input("0"), Input::Unknown));
        assert!(matches!(parse_input(" q "), Input::Abandon));
        assert!(matches!(parse_input("x"), Input::Pause));
    }

    #[test]
    fn abandon_needs_an_explicit_yes() {
        assert!(confirms("y"));
        assert!(confirms(" YES "));
        assert!(!confirms(""));
        assert!(!confirms("n"));
    }

    fn definition() -> Arc<TestDefinition> {
        let questions = (1..=3)
            .map(|id| {
                Question::new(QuestionId::new(id), "Q", vec!["a".into(), "b".into()], 0).unwrap()
            })
            .collect();
        Arc::new(TestDefinition::new(TestId::new(9), "Cli", questions, 0.5, 1, false).unwrap())
    }

    async fn session(repo: &InMemoryRepository) -> RunningSession {
        let services = AppServices::from_storage(
            &Storage::from_repository(repo.clone()),
            Clock::default(),
            EngineConfig::default(),
        );
        services
            .ensure_registered("ada", &[definition()])
            .await
            .unwrap();
        services
            .session_loop()
            .start_session("ada", definition(), SessionMode::Test)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn end_of_input_pauses_instead_of_abandoning() {
        let repo = InMemoryRepository::new();
        let mut running = session(&repo).await;
        let mut lines = BufReader::new(&b"1\n"[..]).lines();

        assert_eq!(play(&mut running, &mut lines).await.unwrap(), Exit::Pause);
        assert!(running.pause().await);

        let status = repo.get_status("ada", TestId::new(9)).await.unwrap();
        assert_eq!(status.attempts_used, 0);
        assert!(status.is_in_progress);
        assert_eq!(repo.calls().unwrap().submit_result, 0);
    }

    #[tokio::test]
    async fn quit_without_confirmation_keeps_playing() {
        let repo = InMemoryRepository::new();
        let mut running = session(&repo).await;
        let mut lines = BufReader::new(&b"q\nn\nq\nyes\n"[..]).lines();

        assert_eq!(play(&mut running, &mut lines).await.unwrap(), Exit::Abandon);
    }

    #[tokio::test]
    async fn save_and_exit_is_a_single_key() {
        let repo = InMemoryRepository::new();
        let mut running = session(&repo).await;
        let mut lines = BufReader::new(&b"2\nx\n1\n"[..]).lines();

        assert_eq!(play(&mut running, &mut lines).await.unwrap(), Exit::Pause);
        assert_eq!(running.progress().answered, 1);
    }
}
