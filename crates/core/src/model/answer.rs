use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::QuestionId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AnswerError {
    #[error("question {0} was already answered")]
    AlreadyAnswered(QuestionId),
}

/// The user's answer for one question of a session.
///
/// Created unanswered and written exactly once. `selected_index` is always a
/// canonical option index, never a display index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    #[serde(default)]
    pub selected_index: Option<usize>,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
}

impl AnswerRecord {
    #[must_use]
    pub fn unanswered(question_id: QuestionId) -> Self {
        Self {
            question_id,
            selected_index: None,
            is_correct: false,
            answered_at: None,
        }
    }

    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.selected_index.is_some()
    }

    /// Store the canonical selection.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::AlreadyAnswered` if this record was written before.
    pub fn record(
        &mut self,
        canonical_index: usize,
        is_correct: bool,
        answered_at: DateTime<Utc>,
    ) -> Result<(), AnswerError> {
        if self.is_answered() {
            return Err(AnswerError::AlreadyAnswered(self.question_id));
        }
        self.selected_index = Some(canonical_index);
        self.is_correct = is_correct;
        self.answered_at = Some(answered_at);
        Ok(())
    }
}
