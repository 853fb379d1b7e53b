use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::model::answer::AnswerRecord;

/// Whether a session is graded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Ungraded, revisitable walkthrough. Never counts as an attempt.
    Study,
    /// Graded, attempt-limited run that ends in an `AttemptResult`.
    Test,
}

impl SessionMode {
    #[must_use]
    pub fn is_graded(self) -> bool {
        matches!(self, SessionMode::Test)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Study => "study",
            SessionMode::Test => "test",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "study" => Ok(SessionMode::Study),
            "test" => Ok(SessionMode::Test),
            other => Err(format!("unknown session mode: {other}")),
        }
    }
}

/// Full serializable state of a session, as pushed to the progress store.
///
/// The order of `answers` is the presentation order of the session; resuming
/// replays it instead of persisting the shuffle separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub mode: SessionMode,
    pub current_question_index: usize,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub answers: Vec<AnswerRecord>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_number: Option<u32>,
}

impl SessionSnapshot {
    /// Number of records carrying a selection.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.iter().filter(|a| a.is_answered()).count()
    }

    /// Correct/incorrect tallies derived from the records themselves.
    #[must_use]
    pub fn derived_counts(&self) -> (u32, u32) {
        self.answers
            .iter()
            .filter(|a| a.is_answered())
            .fold((0_u32, 0_u32), |(c, i), a| {
                if a.is_correct {
                    (c.saturating_add(1), i)
                } else {
                    (c, i.saturating_add(1))
                }
            })
    }
}
