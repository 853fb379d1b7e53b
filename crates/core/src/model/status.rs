use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::snapshot::SessionSnapshot;

/// A user's standing on one test, as reported by the store at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStatus {
    pub has_started: bool,
    pub is_in_progress: bool,
    pub has_passed: bool,
    pub attempts_used: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub best_score: Option<f64>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: Option<SessionSnapshot>,
}

impl TestStatus {
    /// Status for a user who never touched the test.
    #[must_use]
    pub fn untouched(max_attempts: u32) -> Self {
        Self {
            has_started: false,
            is_in_progress: false,
            has_passed: false,
            attempts_used: 0,
            max_attempts,
            best_score: None,
            last_attempt_at: None,
            progress: None,
        }
    }

    #[must_use]
    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_used)
    }

    #[must_use]
    pub fn can_attempt(&self) -> bool {
        self.attempts_remaining() > 0
    }

    /// Provisional attempt number for a session starting now.
    #[must_use]
    pub fn next_attempt_number(&self) -> u32 {
        self.attempts_used.saturating_add(1)
    }

    /// The in-progress snapshot, if there is one worth resuming.
    #[must_use]
    pub fn resumable(&self) -> Option<&SessionSnapshot> {
        if !self.is_in_progress {
            return None;
        }
        self.progress
            .as_ref()
            .filter(|s| !s.completed && !s.answers.is_empty())
    }
}
