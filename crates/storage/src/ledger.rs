//! Server-side bookkeeping for one `(user, test)` pair.
//!
//! Shared by the in-memory and `SQLite` backends so both enforce the same
//! attempt rules. The client never reads-modifies-writes this state; every
//! mutation happens here, under the backend's lock or transaction.

use assess_core::model::{AttemptResult, SessionMode, SessionSnapshot, TestId, TestStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::{StorageError, SubmitResultRequest};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct LedgerKey {
    pub username: String,
    pub test_id: TestId,
}

impl LedgerKey {
    pub(crate) fn new(username: &str, test_id: TestId) -> Self {
        Self {
            username: username.to_owned(),
            test_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct UserTestRecord {
    pub has_started: bool,
    pub has_passed: bool,
    pub attempts_used: u32,
    pub granted: u32,
    pub best_score: Option<f64>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub progress: Option<SessionSnapshot>,
}

impl UserTestRecord {
    /// Attempts this user may use in total.
    pub(crate) fn allowance(&self, max_attempts: u32) -> u32 {
        max_attempts.saturating_add(self.granted)
    }

    pub(crate) fn status(&self, max_attempts: u32) -> TestStatus {
        let is_in_progress = self.progress.as_ref().is_some_and(|p| !p.completed);
        TestStatus {
            has_started: self.has_started,
            is_in_progress,
            has_passed: self.has_passed,
            attempts_used: self.attempts_used,
            max_attempts: self.allowance(max_attempts),
            best_score: self.best_score,
            last_attempt_at: self.last_attempt_at,
            progress: self.progress.clone(),
        }
    }

    /// Register a fresh session, replacing any previous snapshot.
    pub(crate) fn start_session(&mut self, mode: SessionMode, now: DateTime<Utc>) {
        self.has_started = true;
        self.progress = Some(SessionSnapshot {
            mode,
            current_question_index: 0,
            correct_count: 0,
            incorrect_count: 0,
            answers: Vec::new(),
            started_at: now,
            last_activity_at: now,
            completed: false,
            attempt_number: None,
        });
    }

    pub(crate) fn replace_progress(&mut self, snapshot: SessionSnapshot) {
        self.has_started = true;
        self.progress = Some(snapshot);
    }

    pub(crate) fn clear_progress(&mut self) -> bool {
        self.progress.take().is_some()
    }

    pub(crate) fn reset_attempts(&mut self) {
        self.attempts_used = 0;
        self.granted = 0;
    }

    pub(crate) fn grant_attempts(&mut self, extra: u32) {
        self.granted = self.granted.saturating_add(extra);
    }

    /// Count the attempt and build the authoritative record.
    ///
    /// The attempt number is assigned here from `attempts_used`; the client's
    /// provisional number is ignored because admins may have reset or granted
    /// attempts since the session started.
    pub(crate) fn accept_result(
        &mut self,
        request: &SubmitResultRequest,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<AttemptResult, StorageError> {
        if self.attempts_used >= self.allowance(max_attempts) {
            return Err(StorageError::AttemptsExhausted);
        }
        self.attempts_used += 1;
        self.has_started = true;
        self.has_passed |= request.passed;
        self.best_score = Some(
            self.best_score
                .map_or(request.score, |best| best.max(request.score)),
        );
        self.last_attempt_at = Some(now);
        self.progress = None;

        Ok(AttemptResult {
            test_id: request.test_id,
            total_questions: request.total_questions,
            correct_count: request.correct_count,
            incorrect_count: request.incorrect_count,
            score: request.score,
            passed: request.passed,
            attempt_number: self.attempts_used,
            time_taken_secs: request.time_taken_secs,
            completed_at: now,
            answers_detail: request.answers_detail.clone(),
        })
    }
}
