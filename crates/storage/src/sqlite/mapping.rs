use assess_core::model::{AttemptResult, SessionSnapshot, TestId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::ledger::{LedgerKey, UserTestRecord};
use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn test_id_to_i64(id: TestId) -> Result<i64, StorageError> {
    i64::try_from(id.value()).map_err(|_| StorageError::Serialization("test_id overflow".into()))
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn snapshot_to_json(snapshot: &SessionSnapshot) -> Result<String, StorageError> {
    serde_json::to_string(snapshot).map_err(ser)
}

pub(crate) fn result_to_json(result: &AttemptResult) -> Result<String, StorageError> {
    serde_json::to_string(result).map_err(ser)
}

pub(crate) fn map_result_row(row: &SqliteRow) -> Result<AttemptResult, StorageError> {
    let json: String = row.try_get("result_json").map_err(ser)?;
    serde_json::from_str(&json).map_err(ser)
}

fn map_record_row(row: &SqliteRow) -> Result<UserTestRecord, StorageError> {
    let progress = row
        .try_get::<Option<String>, _>("progress_json")
        .map_err(ser)?
        .map(|json| serde_json::from_str::<SessionSnapshot>(&json).map_err(ser))
        .transpose()?;

    Ok(UserTestRecord {
        has_started: row.try_get::<bool, _>("has_started").map_err(ser)?,
        has_passed: row.try_get::<bool, _>("has_passed").map_err(ser)?,
        attempts_used: u32_from_i64(
            "attempts_used",
            row.try_get::<i64, _>("attempts_used").map_err(ser)?,
        )?,
        granted: u32_from_i64("granted", row.try_get::<i64, _>("granted").map_err(ser)?)?,
        best_score: row.try_get("best_score").map_err(ser)?,
        last_attempt_at: row.try_get("last_attempt_at").map_err(ser)?,
        progress,
    })
}

/// Attempt limit for a registered test.
pub(crate) async fn max_attempts(
    conn_ref: &mut SqliteConnection,
    test_id: TestId,
) -> Result<u32, StorageError> {
    let row = sqlx::query("SELECT max_attempts FROM tests WHERE id = ?1")
        .bind(test_id_to_i64(test_id)?)
        .fetch_optional(&mut *conn_ref)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;
    u32_from_i64(
        "max_attempts",
        row.try_get::<i64, _>("max_attempts").map_err(ser)?,
    )
}

/// Load the ledger row, or an empty record if the user never touched the test.
pub(crate) async fn load_record(
    conn_ref: &mut SqliteConnection,
    key: &LedgerKey,
) -> Result<UserTestRecord, StorageError> {
    let row = sqlx::query(
        r"
            SELECT
                has_started, has_passed, attempts_used, granted,
                best_score, last_attempt_at, progress_json
            FROM user_tests
            WHERE username = ?1 AND test_id = ?2
        ",
    )
    .bind(&key.username)
    .bind(test_id_to_i64(key.test_id)?)
    .fetch_optional(&mut *conn_ref)
    .await
    .map_err(conn)?;

    row.as_ref()
        .map_or_else(|| Ok(UserTestRecord::default()), map_record_row)
}

pub(crate) async fn save_record(
    conn_ref: &mut SqliteConnection,
    key: &LedgerKey,
    record: &UserTestRecord,
) -> Result<(), StorageError> {
    let progress_json = record
        .progress
        .as_ref()
        .map(snapshot_to_json)
        .transpose()?;

    sqlx::query(
        r"
            INSERT INTO user_tests (
                username, test_id, has_started, has_passed, attempts_used,
                granted, best_score, last_attempt_at, progress_json
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(username, test_id) DO UPDATE SET
                has_started = excluded.has_started,
                has_passed = excluded.has_passed,
                attempts_used = excluded.attempts_used,
                granted = excluded.granted,
                best_score = excluded.best_score,
                last_attempt_at = excluded.last_attempt_at,
                progress_json = excluded.progress_json
        ",
    )
    .bind(&key.username)
    .bind(test_id_to_i64(key.test_id)?)
    .bind(record.has_started)
    .bind(record.has_passed)
    .bind(i64::from(record.attempts_used))
    .bind(i64::from(record.granted))
    .bind(record.best_score)
    .bind(record.last_attempt_at)
    .bind(progress_json)
    .execute(&mut *conn_ref)
    .await
    .map_err(conn)?;

    Ok(())
}
