use assess_core::model::{TestId, TestStatus};

use super::SqliteRepository;
use super::mapping::{conn, load_record, max_attempts, save_record, test_id_to_i64};
use crate::ledger::LedgerKey;
use crate::repository::{
    AttemptAdmin, ProgressStore, ProgressUpdate, StartSessionRequest, StorageError,
};

#[async_trait::async_trait]
impl ProgressStore for SqliteRepository {
    async fn start_session(&self, request: &StartSessionRequest) -> Result<(), StorageError> {
        let key = LedgerKey::new(&request.username, request.test_id);
        let mut tx = self.pool.begin().await.map_err(conn)?;
        max_attempts(&mut tx, request.test_id).await?;
        let mut record = load_record(&mut tx, &key).await?;
        record.start_session(request.mode, self.clock.now());
        save_record(&mut tx, &key, &record).await?;
        tx.commit().await.map_err(conn)
    }

    async fn get_status(
        &self,
        username: &str,
        test_id: TestId,
    ) -> Result<TestStatus, StorageError> {
        let key = LedgerKey::new(username, test_id);
        let mut c = self.pool.acquire().await.map_err(conn)?;
        let max = max_attempts(&mut c, test_id).await?;
        let record = load_record(&mut c, &key).await?;
        Ok(record.status(max))
    }

    async fn update_progress(&self, update: &ProgressUpdate) -> Result<bool, StorageError> {
        let key = LedgerKey::new(&update.username, update.test_id);
        let mut tx = self.pool.begin().await.map_err(conn)?;
        max_attempts(&mut tx, update.test_id).await?;
        let mut record = load_record(&mut tx, &key).await?;
        record.replace_progress(update.snapshot.clone());
        save_record(&mut tx, &key, &record).await?;
        tx.commit().await.map_err(conn)?;
        Ok(true)
    }

    async fn clear_progress(&self, username: &str, test_id: TestId) -> Result<bool, StorageError> {
        let res = sqlx::query(
            r"
                UPDATE user_tests
                SET progress_json = NULL
                WHERE username = ?1 AND test_id = ?2 AND progress_json IS NOT NULL
            ",
        )
        .bind(username)
        .bind(test_id_to_i64(test_id)?)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(res.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl AttemptAdmin for SqliteRepository {
    async fn register_test(&self, test_id: TestId, max_attempts: u32) -> Result<(), StorageError> {
        if max_attempts == 0 {
            return Err(StorageError::Conflict);
        }
        sqlx::query(
            r"
                INSERT INTO tests (id, max_attempts)
                VALUES (?1, ?2)
                ON CONFLICT(id) DO UPDATE SET max_attempts = excluded.max_attempts
            ",
        )
        .bind(test_id_to_i64(test_id)?)
        .bind(i64::from(max_attempts))
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn reset_attempts(&self, username: &str, test_id: TestId) -> Result<(), StorageError> {
        let key = LedgerKey::new(username, test_id);
        let mut tx = self.pool.begin().await.map_err(conn)?;
        max_attempts(&mut tx, test_id).await?;
        let mut record = load_record(&mut tx, &key).await?;
        record.reset_attempts();
        save_record(&mut tx, &key, &record).await?;
        tx.commit().await.map_err(conn)
    }

    async fn grant_attempts(
        &self,
        username: &str,
        test_id: TestId,
        extra: u32,
    ) -> Result<u32, StorageError> {
        let key = LedgerKey::new(username, test_id);
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let max = max_attempts(&mut tx, test_id).await?;
        let mut record = load_record(&mut tx, &key).await?;
        record.grant_attempts(extra);
        save_record(&mut tx, &key, &record).await?;
        tx.commit().await.map_err(conn)?;
        Ok(record.allowance(max))
    }
}
