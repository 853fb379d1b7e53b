//! Drives `HttpStore` against an in-process server backed by the in-memory store.

use std::time::Duration;

use assess_core::model::{AttemptResult, SessionMode, SessionSnapshot, TestId, TestStatus};
use assess_core::time::fixed_now;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use storage::http::{
    Ack, GrantAttemptsRequest, GrantAttemptsResponse, RegisterTestRequest, SubmitResultResponse,
    UserTestQuery,
};
use storage::repository::{
    AttemptAdmin, InMemoryRepository, ProgressStore, ProgressUpdate, ResultStore,
    StartSessionRequest, StorageError, SubmitResultRequest,
};
use storage::{HttpStore, HttpStoreConfig};

fn status_of(err: &StorageError) -> StatusCode {
    match err {
        StorageError::NotFound => StatusCode::NOT_FOUND,
        StorageError::AttemptsExhausted => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type ApiResult<T> = Result<Json<T>, StatusCode>;

#[derive(Deserialize)]
struct UsernameQuery {
    username: String,
}

async fn start(
    State(repo): State<InMemoryRepository>,
    Json(body): Json<StartSessionRequest>,
) -> ApiResult<Ack> {
    repo.start_session(&body).await.map_err(|e| status_of(&e))?;
    Ok(Json(Ack { success: true }))
}

async fn status(
    State(repo): State<InMemoryRepository>,
    Path(test_id): Path<u64>,
    Query(q): Query<UsernameQuery>,
) -> ApiResult<TestStatus> {
    repo.get_status(&q.username, TestId::new(test_id))
        .await
        .map(Json)
        .map_err(|e| status_of(&e))
}

async fn update(
    State(repo): State<InMemoryRepository>,
    Json(body): Json<ProgressUpdate>,
) -> ApiResult<Ack> {
    let success = repo.update_progress(&body).await.map_err(|e| status_of(&e))?;
    Ok(Json(Ack { success }))
}

async fn clear(
    State(repo): State<InMemoryRepository>,
    Query(q): Query<UserTestQuery>,
) -> ApiResult<Ack> {
    let success = repo
        .clear_progress(&q.username, q.test_id)
        .await
        .map_err(|e| status_of(&e))?;
    Ok(Json(Ack { success }))
}

async fn submit(
    State(repo): State<InMemoryRepository>,
    Json(body): Json<SubmitResultRequest>,
) -> ApiResult<SubmitResultResponse> {
    let result = repo.submit_result(&body).await.map_err(|e| status_of(&e))?;
    Ok(Json(SubmitResultResponse {
        success: true,
        result,
    }))
}

async fn history(
    State(repo): State<InMemoryRepository>,
    Query(q): Query<UserTestQuery>,
) -> ApiResult<Vec<AttemptResult>> {
    repo.list_results(&q.username, q.test_id)
        .await
        .map(Json)
        .map_err(|e| status_of(&e))
}

async fn register(
    State(repo): State<InMemoryRepository>,
    Json(body): Json<RegisterTestRequest>,
) -> ApiResult<Ack> {
    repo.register_test(body.test_id, body.max_attempts)
        .await
        .map_err(|e| status_of(&e))?;
    Ok(Json(Ack { success: true }))
}

async fn reset(
    State(repo): State<InMemoryRepository>,
    Json(body): Json<UserTestQuery>,
) -> ApiResult<Ack> {
    repo.reset_attempts(&body.username, body.test_id)
        .await
        .map_err(|e| status_of(&e))?;
    Ok(Json(Ack { success: true }))
}

async fn grant(
    State(repo): State<InMemoryRepository>,
    Json(body): Json<GrantAttemptsRequest>,
) -> ApiResult<GrantAttemptsResponse> {
    let max_attempts = repo
        .grant_attempts(&body.username, body.test_id, body.extra)
        .await
        .map_err(|e| status_of(&e))?;
    Ok(Json(GrantAttemptsResponse { max_attempts }))
}

async fn serve(repo: InMemoryRepository) -> HttpStore {
    let app = Router::new()
        .route("/api/sessions/start", post(start))
        .route("/api/tests/:id/status", get(status))
        .route("/api/progress", put(update).delete(clear))
        .route("/api/results", post(submit).get(history))
        .route("/api/admin/tests", post(register))
        .route("/api/admin/attempts/reset", post(reset))
        .route("/api/admin/attempts/grant", post(grant))
        .with_state(repo);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut config = HttpStoreConfig::new(format!("http://{addr}/api/"));
    config.timeout = Duration::from_secs(5);
    HttpStore::new(config).unwrap()
}

fn submission() -> SubmitResultRequest {
    SubmitResultRequest {
        username: "ada".into(),
        test_id: TestId::new(3),
        test_title: "Routing".into(),
        total_questions: 2,
        correct_count: 2,
        incorrect_count: 0,
        score: 1.0,
        passed: true,
        attempt_number: 5,
        time_taken_secs: 42,
        answers_detail: Vec::new(),
    }
}

#[tokio::test]
async fn http_store_speaks_the_wire_contract() {
    let store = serve(InMemoryRepository::new()).await;
    store.register_test(TestId::new(3), 1).await.unwrap();

    store
        .start_session(&StartSessionRequest {
            username: "ada".into(),
            test_id: TestId::new(3),
            mode: SessionMode::Test,
            total_questions: 2,
        })
        .await
        .unwrap();

    let snapshot = SessionSnapshot {
        mode: SessionMode::Test,
        current_question_index: 1,
        correct_count: 1,
        incorrect_count: 0,
        answers: Vec::new(),
        started_at: fixed_now(),
        last_activity_at: fixed_now(),
        completed: false,
        attempt_number: Some(1),
    };
    let pushed = store
        .update_progress(&ProgressUpdate {
            username: "ada".into(),
            test_id: TestId::new(3),
            snapshot: snapshot.clone(),
        })
        .await
        .unwrap();
    assert!(pushed);

    let status = store.get_status("ada", TestId::new(3)).await.unwrap();
    assert!(status.is_in_progress);
    assert_eq!(status.progress, Some(snapshot));

    let accepted = store.submit_result(&submission()).await.unwrap().unwrap();
    assert_eq!(accepted.attempt_number, 1, "store assigns the attempt number");

    let err = store.submit_result(&submission()).await.unwrap_err();
    assert!(matches!(err, StorageError::AttemptsExhausted));

    assert_eq!(store.grant_attempts("ada", TestId::new(3), 1).await.unwrap(), 2);
    store.reset_attempts("ada", TestId::new(3)).await.unwrap();
    assert_eq!(store.list_results("ada", TestId::new(3)).await.unwrap().len(), 1);
    assert!(!store.clear_progress("ada", TestId::new(3)).await.unwrap());

    let err = store.get_status("ada", TestId::new(99)).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}
