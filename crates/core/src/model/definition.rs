use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ids::{QuestionId, TestId};
use crate::model::question::{Question, QuestionDraft, QuestionError};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DefinitionError {
    #[error("test definition has no questions")]
    NoQuestions,

    #[error("passing score must be in [0, 1]")]
    InvalidPassingScore,

    #[error("max attempts must be >= 1")]
    InvalidMaxAttempts,

    #[error("duplicate question id {0}")]
    DuplicateQuestion(QuestionId),

    #[error(transparent)]
    Question(#[from] QuestionError),
}

//
// ─── DRAFT ─────────────────────────────────────────────────────────────────────
//

fn default_max_attempts() -> u32 {
    1
}

/// Unvalidated test definition, typically parsed from JSON.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDefinitionDraft {
    pub id: TestId,
    #[serde(default)]
    pub title: String,
    pub questions: Vec<QuestionDraft>,
    pub passing_score: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub randomize_answers: bool,
}

impl TestDefinitionDraft {
    /// Validate all questions and the test-level settings.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` on the first failed check.
    pub fn validate(self) -> Result<TestDefinition, DefinitionError> {
        let questions = self
            .questions
            .into_iter()
            .map(QuestionDraft::validate)
            .collect::<Result<Vec<_>, _>>()?;
        TestDefinition::new(
            self.id,
            self.title,
            questions,
            self.passing_score,
            self.max_attempts,
            self.randomize_answers,
        )
    }
}

//
// ─── DEFINITION ────────────────────────────────────────────────────────────────
//

/// Immutable description of one test: canonical question list plus grading rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "TestDefinitionDraft")]
pub struct TestDefinition {
    id: TestId,
    title: String,
    questions: Vec<Question>,
    passing_score: f64,
    max_attempts: u32,
    randomize_answers: bool,
}

impl TryFrom<TestDefinitionDraft> for TestDefinition {
    type Error = DefinitionError;

    fn try_from(draft: TestDefinitionDraft) -> Result<Self, Self::Error> {
        draft.validate()
    }
}

impl TestDefinition {
    /// Creates a definition from already-validated questions.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` if the list is empty, ids repeat, or the
    /// passing score / attempt limit is out of range.
    pub fn new(
        id: TestId,
        title: impl Into<String>,
        questions: Vec<Question>,
        passing_score: f64,
        max_attempts: u32,
        randomize_answers: bool,
    ) -> Result<Self, DefinitionError> {
        if questions.is_empty() {
            return Err(DefinitionError::NoQuestions);
        }
        if !passing_score.is_finite() || !(0.0..=1.0).contains(&passing_score) {
            return Err(DefinitionError::InvalidPassingScore);
        }
        if max_attempts == 0 {
            return Err(DefinitionError::InvalidMaxAttempts);
        }
        let mut seen = HashSet::with_capacity(questions.len());
        for q in &questions {
            if !seen.insert(q.id()) {
                return Err(DefinitionError::DuplicateQuestion(q.id()));
            }
        }

        Ok(Self {
            id,
            title: title.into(),
            questions,
            passing_score,
            max_attempts,
            randomize_answers,
        })
    }

    #[must_use]
    pub fn id(&self) -> TestId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Questions in canonical order.
    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn passing_score(&self) -> f64 {
        self.passing_score
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn randomize_answers(&self) -> bool {
        self.randomize_answers
    }

    /// Canonical position of the question with the given id.
    #[must_use]
    pub fn position_of(&self, id: QuestionId) -> Option<usize> {
        self.questions.iter().position(|q| q.id() == id)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: u64) -> Question {
        Question::new(
            QuestionId::new(id),
            format!("Q{id}"),
            vec!["a".into(), "b".into()],
            0,
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_and_duplicate_questions() {
        let err = TestDefinition::new(TestId::new(1), "T", vec![], 0.5, 1, false).unwrap_err();
        assert_eq!(err, DefinitionError::NoQuestions);

        let err = TestDefinition::new(
            TestId::new(1),
            "T",
            vec![question(1), question(1)],
            0.5,
            1,
            false,
        )
        .unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateQuestion(QuestionId::new(1)));
    }

    #[test]
    fn rejects_bad_thresholds() {
        let err = TestDefinition::new(TestId::new(1), "T", vec![question(1)], 1.5, 1, false)
            .unwrap_err();
        assert_eq!(err, DefinitionError::InvalidPassingScore);

        let err = TestDefinition::new(TestId::new(1), "T", vec![question(1)], f64::NAN, 1, false)
            .unwrap_err();
        assert_eq!(err, DefinitionError::InvalidPassingScore);

        let err = TestDefinition::new(TestId::new(1), "T", vec![question(1)], 0.5, 0, false)
            .unwrap_err();
        assert_eq!(err, DefinitionError::InvalidMaxAttempts);
    }

    #[test]
    fn parses_from_json_with_defaults() {
        let json = r#"{
            "id": 9,
            "title": "Networking basics",
            "passingScore": 0.7,
            "questions": [
                {"id": 1, "prompt": "Port for HTTPS?", "options": ["80", "443"], "correctIndex": 1},
                {"id": 2, "prompt": "Layer of IP?", "options": ["2", "3", "4"], "correctIndex": 1}
            ]
        }"#;
        let def: TestDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.id(), TestId::new(9));
        assert_eq!(def.max_attempts(), 1);
        assert!(!def.randomize_answers());
        assert_eq!(def.position_of(QuestionId::new(2)), Some(1));
    }

    #[test]
    fn invalid_question_surfaces_through_definition() {
        let json = r#"{"id": 1, "passingScore": 0.5, "questions": [
            {"id": 1, "prompt": "Q", "options": ["a", "b"], "correctIndex": 5}
        ]}"#;
        let err = serde_json::from_str::<TestDefinition>(json).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
