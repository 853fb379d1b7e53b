use assess_core::model::{AttemptResult, TestId};

use super::SqliteRepository;
use super::mapping::{
    conn, load_record, map_result_row, max_attempts, result_to_json, save_record, test_id_to_i64,
};
use crate::ledger::LedgerKey;
use crate::repository::{ResultStore, StorageError, SubmitResultRequest};

#[async_trait::async_trait]
impl ResultStore for SqliteRepository {
    async fn submit_result(
        &self,
        request: &SubmitResultRequest,
    ) -> Result<Option<AttemptResult>, StorageError> {
        let key = LedgerKey::new(&request.username, request.test_id);
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let max = max_attempts(&mut tx, request.test_id).await?;
        let mut record = load_record(&mut tx, &key).await?;
        let accepted = record.accept_result(request, max, self.clock.now())?;
        save_record(&mut tx, &key, &record).await?;

        sqlx::query(
            r"
                INSERT INTO attempt_results (
                    username, test_id, attempt_number, score, passed, completed_at, result_json
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(&key.username)
        .bind(test_id_to_i64(key.test_id)?)
        .bind(i64::from(accepted.attempt_number))
        .bind(accepted.score)
        .bind(accepted.passed)
        .bind(accepted.completed_at)
        .bind(result_to_json(&accepted)?)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(Some(accepted))
    }

    async fn list_results(
        &self,
        username: &str,
        test_id: TestId,
    ) -> Result<Vec<AttemptResult>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT result_json
                FROM attempt_results
                WHERE username = ?1 AND test_id = ?2
                ORDER BY id ASC
            ",
        )
        .bind(username)
        .bind(test_id_to_i64(test_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_result_row).collect()
    }
}
