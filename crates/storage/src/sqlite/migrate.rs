use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned migrations for the attempt ledger schema.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: tests, per-user ledger, attempt history.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS tests (
                    id INTEGER PRIMARY KEY,
                    max_attempts INTEGER NOT NULL CHECK (max_attempts >= 1)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS user_tests (
                    username TEXT NOT NULL,
                    test_id INTEGER NOT NULL,
                    has_started INTEGER NOT NULL DEFAULT 0,
                    has_passed INTEGER NOT NULL DEFAULT 0,
                    attempts_used INTEGER NOT NULL DEFAULT 0 CHECK (attempts_used >= 0),
                    granted INTEGER NOT NULL DEFAULT 0 CHECK (granted >= 0),
                    best_score REAL,
                    last_attempt_at TEXT,
                    progress_json TEXT,
                    PRIMARY KEY (username, test_id),
                    FOREIGN KEY (test_id) REFERENCES tests(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS attempt_results (
                    id INTEGER PRIMARY KEY,
                    username TEXT NOT NULL,
                    test_id INTEGER NOT NULL,
                    attempt_number INTEGER NOT NULL CHECK (attempt_number >= 1),
                    score REAL NOT NULL,
                    passed INTEGER NOT NULL,
                    completed_at TEXT NOT NULL,
                    result_json TEXT NOT NULL,
                    FOREIGN KEY (test_id) REFERENCES tests(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_attempt_results_user_test
                    ON attempt_results (username, test_id, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
