use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{SeedableRng, rng};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use assess_core::model::{
    AttemptResult, DeckError, QuestionDeck, SessionMode, TestDefinition, TestId, TestStatus,
};
use storage::repository::{
    ProgressStore, ProgressUpdate, ResultStore, StartSessionRequest, StorageError,
};

use super::machine::{
    Advance, AnswerOutcome, AssessmentSession, SessionPhase, SessionReport,
};
use super::plan::DeckBuilder;
use super::progress::SessionProgress;
use super::resume::{FreshReason, ResumeDecision, ResumeLoader};
use super::submit::{ResultSubmitter, SubmissionOutcome};
use super::sync::ProgressSynchronizer;
use crate::Clock;
use crate::config::EngineConfig;
use crate::error::SessionError;
use crate::schedule::ScheduledTask;

/// Non-blocking things the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Status lookup failed; the session started fresh.
    ResumeUnavailable(String),
    /// A stored snapshot was inconsistent and was discarded.
    ResumeDiscarded,
    /// The result store did not accept the attempt; a local result is shown.
    SubmissionFailed(String),
}

impl fmt::Display for SessionNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionNotice::ResumeUnavailable(reason) => {
                write!(f, "could not check for saved progress ({reason}); starting fresh")
            }
            SessionNotice::ResumeDiscarded => {
                write!(f, "saved progress was inconsistent and was discarded")
            }
            SessionNotice::SubmissionFailed(reason) => {
                write!(f, "result could not be saved ({reason}); showing a local result")
            }
        }
    }
}

/// Everything a caller needs after a session terminates.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub report: SessionReport,
    /// `None` for study sessions, which are never submitted.
    pub submission: Option<SubmissionOutcome>,
    pub notices: Vec<SessionNotice>,
}

impl SessionOutcome {
    /// The attempt record to display, authoritative when the store accepted it.
    #[must_use]
    pub fn result(&self) -> Option<&AttemptResult> {
        self.submission.as_ref().map(SubmissionOutcome::result)
    }
}

/// Orchestrates session start, resume, background sync and submission.
#[derive(Clone)]
pub struct SessionLoopService {
    clock: Clock,
    progress: Arc<dyn ProgressStore>,
    results: Arc<dyn ResultStore>,
    config: EngineConfig,
    shuffle_seed: Option<u64>,
}

impl SessionLoopService {
    #[must_use]
    pub fn new(
        clock: Clock,
        progress: Arc<dyn ProgressStore>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            clock,
            progress,
            results,
            config: EngineConfig::default(),
            shuffle_seed: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Draw question and option orders from a seeded generator.
    #[must_use]
    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start (or resume) a session for `username` on `definition`.
    ///
    /// Study sessions are local only. Test sessions consult the progress store,
    /// resume an in-progress snapshot when there is one, and register fresh
    /// sessions before play begins. Store failures degrade to a fresh session
    /// with a notice.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AttemptsExhausted` when the store reports no
    /// attempts left, or `SessionError::Deck` if the deck cannot be built.
    pub async fn start_session(
        &self,
        username: &str,
        definition: Arc<TestDefinition>,
        mode: SessionMode,
    ) -> Result<RunningSession, SessionError> {
        let builder = DeckBuilder::new(Arc::clone(&definition));
        if !mode.is_graded() {
            let deck = self.fresh_deck(&builder)?;
            let mut machine = AssessmentSession::new(deck, mode);
            machine.start(None, self.clock.now())?;
            info!(test_id = %definition.id(), "study session started");
            return Ok(self.running(username, definition, machine, None, Vec::new(), false));
        }

        let loader = ResumeLoader::new(
            Arc::clone(&self.progress),
            self.config.request_timeout,
            self.config.strict_resume,
        );
        let decision = loader.load(username, &definition, mode).await;
        // Early refusal only; the store still rejects over-limit submissions.
        if let Some(status) = decision.status() {
            ensure_attempts_left(status)?;
        }
        let attempt_number = decision
            .status()
            .map_or(1, TestStatus::next_attempt_number);

        let mut notices = Vec::new();
        let (machine, resumed) = match decision {
            ResumeDecision::Resume { reconstruction, .. } => {
                let deck = self.replayed_deck(&builder, reconstruction.order)?;
                let mut machine = AssessmentSession::new(deck, mode);
                machine.restore(reconstruction.state, Some(attempt_number))?;
                info!(
                    test_id = %definition.id(),
                    answered = machine.progress().answered,
                    "test session resumed"
                );
                (machine, true)
            }
            ResumeDecision::Fresh { reason, .. } => {
                match reason {
                    FreshReason::StatusUnavailable(err) => {
                        notices.push(SessionNotice::ResumeUnavailable(err));
                    }
                    FreshReason::Inconsistent => notices.push(SessionNotice::ResumeDiscarded),
                    FreshReason::NoSnapshot | FreshReason::ModeMismatch(_) => {}
                }
                let deck = self.fresh_deck(&builder)?;
                let mut machine = AssessmentSession::new(deck, mode);
                machine.start(Some(attempt_number), self.clock.now())?;
                self.register(username, &definition, mode).await;
                info!(test_id = %definition.id(), attempt = attempt_number, "test session started");
                (machine, false)
            }
        };

        let sync = ProgressSynchronizer::start(
            Arc::clone(&self.progress),
            ProgressUpdate {
                username: username.to_owned(),
                test_id: definition.id(),
                snapshot: machine.snapshot(self.clock.now()),
            },
            &self.config,
        );
        Ok(self.running(username, definition, machine, Some(sync), notices, resumed))
    }

    /// Current standing of `username` on a test.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the store fails.
    pub async fn status(
        &self,
        username: &str,
        test_id: TestId,
    ) -> Result<TestStatus, SessionError> {
        Ok(self.progress.get_status(username, test_id).await?)
    }

    /// Past graded attempts, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the store fails.
    pub async fn history(
        &self,
        username: &str,
        test_id: TestId,
    ) -> Result<Vec<AttemptResult>, SessionError> {
        Ok(self.results.list_results(username, test_id).await?)
    }

    /// Throw away the in-progress snapshot so the next start is fresh.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the store fails.
    pub async fn start_over(&self, username: &str, test_id: TestId) -> Result<bool, SessionError> {
        Ok(self.progress.clear_progress(username, test_id).await?)
    }

    async fn register(&self, username: &str, definition: &TestDefinition, mode: SessionMode) {
        let request = StartSessionRequest {
            username: username.to_owned(),
            test_id: definition.id(),
            mode,
            total_questions: u32::try_from(definition.question_count()).unwrap_or(u32::MAX),
        };
        let pending = self.progress.start_session(&request);
        let outcome = match tokio::time::timeout(self.config.request_timeout, pending).await {
            Ok(outcome) => outcome,
            Err(_) => Err(StorageError::Timeout),
        };
        if let Err(err) = outcome {
            warn!(
                test_id = %definition.id(),
                error = %err,
                "could not register session, playing locally"
            );
        }
    }

    fn fresh_deck(&self, builder: &DeckBuilder) -> Result<QuestionDeck, DeckError> {
        match self.shuffle_seed {
            Some(seed) => builder.build_fresh(&mut StdRng::seed_from_u64(seed)),
            None => builder.build_fresh(&mut rng()),
        }
    }

    fn replayed_deck(
        &self,
        builder: &DeckBuilder,
        order: Vec<usize>,
    ) -> Result<QuestionDeck, DeckError> {
        match self.shuffle_seed {
            Some(seed) => builder.replay(order, &mut StdRng::seed_from_u64(seed)),
            None => builder.replay(order, &mut rng()),
        }
    }

    fn running(
        &self,
        username: &str,
        definition: Arc<TestDefinition>,
        machine: AssessmentSession,
        sync: Option<ProgressSynchronizer>,
        notices: Vec<SessionNotice>,
        resumed: bool,
    ) -> RunningSession {
        let clock = self.clock;
        let started_at = machine.started_at().unwrap_or_else(|| clock.now());
        let (elapsed_tx, elapsed) = watch::channel(clock.elapsed_secs(started_at));
        let ticker =
            ScheduledTask::every(self.config.tick_interval, CancellationToken::new(), move || {
                let _ = elapsed_tx.send(clock.elapsed_secs(started_at));
            });

        RunningSession {
            username: username.to_owned(),
            definition,
            machine,
            clock,
            sync,
            ticker,
            elapsed,
            submitter: ResultSubmitter::new(Arc::clone(&self.results), self.config.submit_timeout),
            notices,
            resumed,
        }
    }
}

/// Refuse to start when the fetched status already shows no attempts left.
///
/// The status may be stale by submit time, so the store's
/// `AttemptsExhausted` rejection stays the authority.
fn ensure_attempts_left(status: &TestStatus) -> Result<(), SessionError> {
    if status.can_attempt() {
        return Ok(());
    }
    Err(SessionError::AttemptsExhausted {
        used: status.attempts_used,
        max: status.max_attempts,
    })
}

//
// ─── RUNNING SESSION ───────────────────────────────────────────────────────────
//

/// A started session with its background timers.
///
/// `finish`, `abandon` and `pause` consume the session, so nothing can touch
/// it afterwards. Dropping it stops every timer.
pub struct RunningSession {
    username: String,
    definition: Arc<TestDefinition>,
    machine: AssessmentSession,
    clock: Clock,
    sync: Option<ProgressSynchronizer>,
    ticker: ScheduledTask,
    elapsed: watch::Receiver<u64>,
    submitter: ResultSubmitter,
    notices: Vec<SessionNotice>,
    resumed: bool,
}

impl RunningSession {
    #[must_use]
    pub fn session(&self) -> &AssessmentSession {
        &self.machine
    }

    #[must_use]
    pub fn definition(&self) -> &Arc<TestDefinition> {
        &self.definition
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.machine.phase()
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        self.machine.progress()
    }

    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Whether progress is being pushed to the store.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.sync.as_ref().is_some_and(|s| !s.is_stopped())
    }

    #[must_use]
    pub fn notices(&self) -> &[SessionNotice] {
        &self.notices
    }

    /// Seconds since the session started, refreshed by the 1 Hz ticker.
    #[must_use]
    pub fn elapsed(&self) -> watch::Receiver<u64> {
        self.elapsed.clone()
    }

    /// # Errors
    ///
    /// Returns `SessionError::Transition` if no question is pending or the
    /// index is out of range.
    pub fn select_option(&mut self, display_index: usize) -> Result<(), SessionError> {
        Ok(self.machine.select_option(display_index)?)
    }

    /// Record the selection and push progress immediately.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Transition` if nothing is selected or the
    /// question is already answered.
    pub fn submit_answer(&mut self) -> Result<AnswerOutcome, SessionError> {
        let now = self.clock.now();
        let outcome = self.machine.submit_answer(now)?;
        if let Some(sync) = &self.sync {
            sync.push_now(self.machine.snapshot(now));
        }
        Ok(outcome)
    }

    /// # Errors
    ///
    /// Returns `SessionError::Transition` if the current question is unanswered.
    pub fn next(&mut self) -> Result<Advance, SessionError> {
        let now = self.clock.now();
        let advance = self.machine.next(now)?;
        self.publish(now);
        Ok(advance)
    }

    /// # Errors
    ///
    /// Returns `SessionError::Transition` in test mode or at the first question.
    pub fn previous(&mut self) -> Result<usize, SessionError> {
        let now = self.clock.now();
        let position = self.machine.previous(now)?;
        self.publish(now);
        Ok(position)
    }

    /// Complete the session, stop its timers and submit graded attempts.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Transition` if the session is not in progress.
    pub async fn finish(mut self) -> Result<SessionOutcome, SessionError> {
        self.stop_timers();
        let report = self.machine.finish(self.clock.now())?;
        Ok(self.conclude(report).await)
    }

    /// Abandon the session. Graded attempts are still submitted, as failed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Transition` if the session is not in progress.
    pub async fn abandon(mut self) -> Result<SessionOutcome, SessionError> {
        self.stop_timers();
        let report = self.machine.abandon(self.clock.now())?;
        Ok(self.conclude(report).await)
    }

    /// Leave the session in progress so a later start resumes it.
    ///
    /// Stops the timers and pushes the current snapshot once more. Nothing is
    /// submitted and no attempt is used. Returns whether the store holds the
    /// latest snapshot; study sessions are never saved and return `false`.
    pub async fn pause(mut self) -> bool {
        let now = self.clock.now();
        self.ticker.stop();
        let Some(mut sync) = self.sync.take() else {
            info!(test_id = %self.definition.id(), "study session closed");
            return false;
        };
        sync.publish(self.machine.snapshot(now));
        let saved = sync.flush().await;
        info!(
            test_id = %self.definition.id(),
            answered = self.machine.progress().answered,
            saved,
            "test session paused"
        );
        saved
    }

    fn publish(&self, now: DateTime<Utc>) {
        if let Some(sync) = &self.sync {
            sync.publish(self.machine.snapshot(now));
        }
    }

    fn stop_timers(&mut self) {
        if let Some(sync) = self.sync.as_mut() {
            sync.stop();
        }
        self.ticker.stop();
    }

    async fn conclude(mut self, report: SessionReport) -> SessionOutcome {
        let submission = if report.mode.is_graded() {
            let outcome = self
                .submitter
                .submit(&self.username, &self.definition, &report)
                .await;
            if let SubmissionOutcome::Fallback { error, .. } = &outcome {
                self.notices
                    .push(SessionNotice::SubmissionFailed(error.clone()));
            }
            Some(outcome)
        } else {
            None
        };

        SessionOutcome {
            report,
            submission,
            notices: std::mem::take(&mut self.notices),
        }
    }
}
