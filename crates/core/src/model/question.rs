use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::QuestionId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question {0} has an empty prompt")]
    EmptyPrompt(QuestionId),

    #[error("question {id} needs at least 2 options, got {count}")]
    TooFewOptions { id: QuestionId, count: usize },

    #[error("question {id} correct index {index} is out of range for {count} options")]
    CorrectIndexOutOfRange {
        id: QuestionId,
        index: usize,
        count: usize,
    },
}

//
// ─── DRAFT ─────────────────────────────────────────────────────────────────────
//

/// Unvalidated question as delivered by the server or loaded from a file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub id: QuestionId,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl QuestionDraft {
    /// Validate the draft into a `Question`.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the prompt is blank, fewer than two options are
    /// given, or `correct_index` does not point at an option.
    pub fn validate(self) -> Result<Question, QuestionError> {
        if self.prompt.trim().is_empty() {
            return Err(QuestionError::EmptyPrompt(self.id));
        }
        let count = self.options.len();
        if count < 2 {
            return Err(QuestionError::TooFewOptions { id: self.id, count });
        }
        if self.correct_index >= count {
            return Err(QuestionError::CorrectIndexOutOfRange {
                id: self.id,
                index: self.correct_index,
                count,
            });
        }

        Ok(Question {
            id: self.id,
            prompt: self.prompt,
            options: self.options,
            correct_index: self.correct_index,
            explanation: normalize(self.explanation),
            category: normalize(self.category),
        })
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// A single multiple-choice question in canonical (server-defined) order.
///
/// `correct_index` always refers to the canonical option order. Shuffled
/// presentation lives in [`crate::model::OptionOrder`], never here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "QuestionDraft")]
pub struct Question {
    id: QuestionId,
    prompt: String,
    options: Vec<String>,
    correct_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
}

impl TryFrom<QuestionDraft> for Question {
    type Error = QuestionError;

    fn try_from(draft: QuestionDraft) -> Result<Self, Self::Error> {
        draft.validate()
    }
}

impl Question {
    /// Convenience constructor for a question without explanation or category.
    ///
    /// # Errors
    ///
    /// See [`QuestionDraft::validate`].
    pub fn new(
        id: QuestionId,
        prompt: impl Into<String>,
        options: Vec<String>,
        correct_index: usize,
    ) -> Result<Self, QuestionError> {
        QuestionDraft {
            id,
            prompt: prompt.into(),
            options,
            correct_index,
            explanation: None,
            category: None,
        }
        .validate()
    }

    #[must_use]
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = normalize(Some(explanation.into()));
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = normalize(Some(category.into()));
        self
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn option_count(&self) -> usize {
        self.options.len()
    }

    #[must_use]
    pub fn correct_index(&self) -> usize {
        self.correct_index
    }

    #[must_use]
    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Whether the given canonical option index is the right answer.
    #[must_use]
    pub fn is_correct(&self, canonical_index: usize) -> bool {
        canonical_index == self.correct_index
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn options(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("option {i}")).collect()
    }

    #[test]
    fn rejects_single_option() {
        let err = Question::new(QuestionId::new(1), "Q", options(1), 0).unwrap_err();
        assert_eq!(
            err,
            QuestionError::TooFewOptions {
                id: QuestionId::new(1),
                count: 1
            }
        );
    }

    #[test]
    fn rejects_out_of_range_correct_index() {
        let err = Question::new(QuestionId::new(2), "Q", options(3), 3).unwrap_err();
        assert!(matches!(err, QuestionError::CorrectIndexOutOfRange { index: 3, .. }));
    }

    #[test]
    fn rejects_blank_prompt() {
        let err = Question::new(QuestionId::new(3), "   ", options(2), 0).unwrap_err();
        assert_eq!(err, QuestionError::EmptyPrompt(QuestionId::new(3)));
    }

    #[test]
    fn blank_explanation_is_dropped() {
        let q = Question::new(QuestionId::new(4), "Q", options(2), 1)
            .unwrap()
            .with_explanation("  ")
            .with_category("networking");
        assert_eq!(q.explanation(), None);
        assert_eq!(q.category(), Some("networking"));
        assert!(q.is_correct(1));
        assert!(!q.is_correct(0));
    }

    #[test]
    fn deserialization_validates() {
        let bad = r#"{"id":1,"prompt":"Q","options":["a"],"correctIndex":0}"#;
        assert!(serde_json::from_str::<Question>(bad).is_err());

        let good = r#"{"id":1,"prompt":"Q","options":["a","b"],"correctIndex":1,"category":"dns"}"#;
        let q: Question = serde_json::from_str(good).unwrap();
        assert_eq!(q.correct_index(), 1);
        assert_eq!(q.category(), Some("dns"));
    }
}
