use assess_core::Clock;
use assess_core::model::{AnswerRecord, QuestionId, SessionMode, SessionSnapshot, TestId};
use assess_core::time::fixed_now;
use storage::repository::{
    AttemptAdmin, ProgressStore, ProgressUpdate, ResultStore, StartSessionRequest, StorageError,
    SubmitResultRequest,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url)
        .await
        .expect("connect")
        .with_clock(Clock::fixed(fixed_now()));
    repo.migrate().await.expect("migrate");
    repo.register_test(TestId::new(1), 1).await.expect("register");
    repo
}

fn snapshot(answered: usize) -> SessionSnapshot {
    let answers = (1..=4)
        .map(|id| {
            let mut rec = AnswerRecord::unanswered(QuestionId::new(id));
            if usize::try_from(id).unwrap() <= answered {
                rec.record(0, id % 2 == 1, fixed_now()).unwrap();
            }
            rec
        })
        .collect();
    SessionSnapshot {
        mode: SessionMode::Test,
        current_question_index: answered,
        correct_count: 1,
        incorrect_count: 1,
        answers,
        started_at: fixed_now(),
        last_activity_at: fixed_now(),
        completed: false,
        attempt_number: Some(1),
    }
}

fn submission(score: f64) -> SubmitResultRequest {
    SubmitResultRequest {
        username: "ada".into(),
        test_id: TestId::new(1),
        test_title: "Networking".into(),
        total_questions: 4,
        correct_count: 2,
        incorrect_count: 2,
        score,
        passed: score >= 0.75,
        attempt_number: 1,
        time_taken_secs: 120,
        answers_detail: Vec::new(),
    }
}

#[tokio::test]
async fn sqlite_progress_roundtrip_is_last_write_wins() {
    let repo = connect("memdb_progress").await;

    repo.start_session(&StartSessionRequest {
        username: "ada".into(),
        test_id: TestId::new(1),
        mode: SessionMode::Test,
        total_questions: 4,
    })
    .await
    .unwrap();
    let status = repo.get_status("ada", TestId::new(1)).await.unwrap();
    assert!(status.has_started);
    assert!(status.resumable().is_none());

    let first = ProgressUpdate {
        username: "ada".into(),
        test_id: TestId::new(1),
        snapshot: snapshot(1),
    };
    let second = ProgressUpdate {
        snapshot: snapshot(2),
        ..first.clone()
    };
    repo.update_progress(&first).await.unwrap();
    repo.update_progress(&second).await.unwrap();
    repo.update_progress(&second).await.unwrap();

    let status = repo.get_status("ada", TestId::new(1)).await.unwrap();
    let stored = status.resumable().expect("in progress");
    assert_eq!(stored, &second.snapshot);

    assert!(repo.clear_progress("ada", TestId::new(1)).await.unwrap());
    assert!(!repo.clear_progress("ada", TestId::new(1)).await.unwrap());
}

#[tokio::test]
async fn sqlite_enforces_attempt_limit_with_admin_overrides() {
    let repo = connect("memdb_attempts").await;

    let first = repo.submit_result(&submission(0.5)).await.unwrap().unwrap();
    assert_eq!(first.attempt_number, 1);
    let err = repo.submit_result(&submission(0.5)).await.unwrap_err();
    assert!(matches!(err, StorageError::AttemptsExhausted));

    assert_eq!(repo.grant_attempts("ada", TestId::new(1), 2).await.unwrap(), 3);
    let second = repo.submit_result(&submission(1.0)).await.unwrap().unwrap();
    assert_eq!(second.attempt_number, 2);

    let status = repo.get_status("ada", TestId::new(1)).await.unwrap();
    assert_eq!(status.attempts_used, 2);
    assert_eq!(status.max_attempts, 3);
    assert!(status.has_passed);
    assert_eq!(status.best_score, Some(1.0));
    assert_eq!(status.last_attempt_at, Some(fixed_now()));

    repo.reset_attempts("ada", TestId::new(1)).await.unwrap();
    let status = repo.get_status("ada", TestId::new(1)).await.unwrap();
    assert_eq!(status.attempts_used, 0);
    assert_eq!(status.max_attempts, 1);

    let history = repo.list_results("ada", TestId::new(1)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].score, 1.0);
}

#[tokio::test]
async fn sqlite_submit_clears_in_progress_snapshot() {
    let repo = connect("memdb_supersede").await;
    repo.update_progress(&ProgressUpdate {
        username: "ada".into(),
        test_id: TestId::new(1),
        snapshot: snapshot(4),
    })
    .await
    .unwrap();

    repo.submit_result(&submission(0.5)).await.unwrap();
    let status = repo.get_status("ada", TestId::new(1)).await.unwrap();
    assert!(!status.is_in_progress);
    assert!(status.progress.is_none());
}

#[tokio::test]
async fn sqlite_unknown_test_is_not_found() {
    let repo = connect("memdb_unknown").await;
    let err = repo.get_status("ada", TestId::new(404)).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}
