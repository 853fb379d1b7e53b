use assess_core::Clock;
use assess_core::model::{AttemptResult, SessionMode, SessionSnapshot, TestId, TestStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::ledger::{LedgerKey, UserTestRecord};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("no attempts remaining")]
    AttemptsExhausted,

    #[error("request timed out")]
    Timeout,

    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Whether retrying later with fresh data could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Timeout | StorageError::Connection(_))
    }
}

//
// ─── REQUESTS ──────────────────────────────────────────────────────────────────
//

/// Registers a fresh session. Acknowledgement only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub username: String,
    pub test_id: TestId,
    pub mode: SessionMode,
    pub total_questions: u32,
}

/// Full-snapshot upsert keyed by `(username, test_id)`; last write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub username: String,
    pub test_id: TestId,
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
}

/// Terminal submission for a graded attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResultRequest {
    pub username: String,
    pub test_id: TestId,
    pub test_title: String,
    pub total_questions: u32,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub score: f64,
    pub passed: bool,
    /// Provisional; the store assigns the authoritative number.
    pub attempt_number: u32,
    pub time_taken_secs: u64,
    pub answers_detail: Vec<assess_core::model::AnswerDetail>,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Remote progress persistence for in-flight sessions.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Register a new session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached or rejects the call.
    async fn start_session(&self, request: &StartSessionRequest) -> Result<(), StorageError>;

    /// Fetch the user's standing on a test, including any in-progress snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown tests, or transport errors.
    async fn get_status(&self, username: &str, test_id: TestId)
    -> Result<TestStatus, StorageError>;

    /// Replace the stored snapshot with `update`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on transport or persistence failure.
    async fn update_progress(&self, update: &ProgressUpdate) -> Result<bool, StorageError>;

    /// Drop any in-progress snapshot, e.g. when the user starts over.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on transport or persistence failure.
    async fn clear_progress(&self, username: &str, test_id: TestId) -> Result<bool, StorageError>;
}

/// Remote storage of terminal attempt results.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Submit a finished attempt. `Ok(Some(_))` is the store's authoritative record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AttemptsExhausted` if the store refuses another
    /// attempt, or transport errors.
    async fn submit_result(
        &self,
        request: &SubmitResultRequest,
    ) -> Result<Option<AttemptResult>, StorageError>;

    /// Past attempts, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on transport or persistence failure.
    async fn list_results(
        &self,
        username: &str,
        test_id: TestId,
    ) -> Result<Vec<AttemptResult>, StorageError>;
}

/// Administrative attempt bookkeeping. May run while a user session is active.
#[async_trait]
pub trait AttemptAdmin: Send + Sync {
    /// Make a test known to the store with its attempt limit.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on persistence failure.
    async fn register_test(&self, test_id: TestId, max_attempts: u32) -> Result<(), StorageError>;

    /// Set a user's used attempts back to zero.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown tests.
    async fn reset_attempts(&self, username: &str, test_id: TestId) -> Result<(), StorageError>;

    /// Grant `extra` attempts on top of the test limit. Returns the new allowance.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown tests.
    async fn grant_attempts(
        &self,
        username: &str,
        test_id: TestId,
        extra: u32,
    ) -> Result<u32, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

/// Number of calls each store operation received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub start_session: u32,
    pub get_status: u32,
    pub update_progress: u32,
    pub clear_progress: u32,
    pub submit_result: u32,
}

#[derive(Default)]
struct MemoryState {
    tests: HashMap<TestId, u32>,
    records: HashMap<LedgerKey, UserTestRecord>,
    results: HashMap<LedgerKey, Vec<AttemptResult>>,
    calls: CallCounts,
}

/// Simple in-memory store for testing and offline play.
///
/// `set_offline(true)` makes every user-facing call fail with a connection
/// error while admin calls keep working.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    clock: Clock,
    state: Arc<Mutex<MemoryState>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Snapshot of the call counters.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the state lock is poisoned.
    pub fn calls(&self) -> Result<CallCounts, StorageError> {
        Ok(self.lock()?.calls)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn ensure_online(&self) -> Result<(), StorageError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("store offline".into()));
        }
        Ok(())
    }

    fn max_attempts(state: &MemoryState, test_id: TestId) -> Result<u32, StorageError> {
        state.tests.get(&test_id).copied().ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl ProgressStore for InMemoryRepository {
    async fn start_session(&self, request: &StartSessionRequest) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.calls.start_session += 1;
        self.ensure_online()?;
        Self::max_attempts(&guard, request.test_id)?;
        let key = LedgerKey::new(&request.username, request.test_id);
        guard
            .records
            .entry(key)
            .or_default()
            .start_session(request.mode, self.clock.now());
        Ok(())
    }

    async fn get_status(
        &self,
        username: &str,
        test_id: TestId,
    ) -> Result<TestStatus, StorageError> {
        let mut guard = self.lock()?;
        guard.calls.get_status += 1;
        self.ensure_online()?;
        let max = Self::max_attempts(&guard, test_id)?;
        let key = LedgerKey::new(username, test_id);
        Ok(guard
            .records
            .get(&key)
            .map_or_else(|| TestStatus::untouched(max), |r| r.status(max)))
    }

    async fn update_progress(&self, update: &ProgressUpdate) -> Result<bool, StorageError> {
        let mut guard = self.lock()?;
        guard.calls.update_progress += 1;
        self.ensure_online()?;
        Self::max_attempts(&guard, update.test_id)?;
        let key = LedgerKey::new(&update.username, update.test_id);
        guard
            .records
            .entry(key)
            .or_default()
            .replace_progress(update.snapshot.clone());
        Ok(true)
    }

    async fn clear_progress(&self, username: &str, test_id: TestId) -> Result<bool, StorageError> {
        let mut guard = self.lock()?;
        guard.calls.clear_progress += 1;
        self.ensure_online()?;
        let key = LedgerKey::new(username, test_id);
        Ok(guard
            .records
            .get_mut(&key)
            .is_some_and(UserTestRecord::clear_progress))
    }
}

#[async_trait]
impl ResultStore for InMemoryRepository {
    async fn submit_result(
        &self,
        request: &SubmitResultRequest,
    ) -> Result<Option<AttemptResult>, StorageError> {
        let mut guard = self.lock()?;
        guard.calls.submit_result += 1;
        self.ensure_online()?;
        let max = Self::max_attempts(&guard, request.test_id)?;
        let key = LedgerKey::new(&request.username, request.test_id);
        let accepted = guard
            .records
            .entry(key.clone())
            .or_default()
            .accept_result(request, max, self.clock.now())?;
        guard.results.entry(key).or_default().push(accepted.clone());
        Ok(Some(accepted))
    }

    async fn list_results(
        &self,
        username: &str,
        test_id: TestId,
    ) -> Result<Vec<AttemptResult>, StorageError> {
        let guard = self.lock()?;
        self.ensure_online()?;
        let key = LedgerKey::new(username, test_id);
        Ok(guard.results.get(&key).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl AttemptAdmin for InMemoryRepository {
    async fn register_test(&self, test_id: TestId, max_attempts: u32) -> Result<(), StorageError> {
        if max_attempts == 0 {
            return Err(StorageError::Conflict);
        }
        let mut guard = self.lock()?;
        guard.tests.insert(test_id, max_attempts);
        Ok(())
    }

    async fn reset_attempts(&self, username: &str, test_id: TestId) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        Self::max_attempts(&guard, test_id)?;
        guard
            .records
            .entry(LedgerKey::new(username, test_id))
            .or_default()
            .reset_attempts();
        Ok(())
    }

    async fn grant_attempts(
        &self,
        username: &str,
        test_id: TestId,
        extra: u32,
    ) -> Result<u32, StorageError> {
        let mut guard = self.lock()?;
        let max = Self::max_attempts(&guard, test_id)?;
        let record = guard
            .records
            .entry(LedgerKey::new(username, test_id))
            .or_default();
        record.grant_attempts(extra);
        Ok(record.allowance(max))
    }
}

//
// ─── AGGREGATE ─────────────────────────────────────────────────────────────────
//

/// Aggregates store capabilities behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressStore>,
    pub results: Arc<dyn ResultStore>,
    pub admin: Arc<dyn AttemptAdmin>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    /// Wire every capability to the same repository value.
    #[must_use]
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: ProgressStore + ResultStore + AttemptAdmin + Clone + 'static,
    {
        Self {
            progress: Arc::new(repo.clone()),
            results: Arc::new(repo.clone()),
            admin: Arc::new(repo),
        }
    }
}
