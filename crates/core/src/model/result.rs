use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::answer::AnswerRecord;
use crate::model::ids::{QuestionId, TestId};
use crate::model::question::Question;

/// Denormalized audit copy of one answered (or skipped) question.
///
/// Question text and options are copied because the definition may change
/// after the attempt was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerDetail {
    pub question_id: QuestionId,
    pub question_text: String,
    pub options: Vec<String>,
    pub selected_index: Option<usize>,
    pub correct_index: usize,
    pub is_correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl AnswerDetail {
    #[must_use]
    pub fn from_record(question: &Question, record: &AnswerRecord) -> Self {
        Self {
            question_id: question.id(),
            question_text: question.prompt().to_owned(),
            options: question.options().to_vec(),
            selected_index: record.selected_index,
            correct_index: question.correct_index(),
            is_correct: record.is_answered() && record.is_correct,
            explanation: question.explanation().map(str::to_owned),
            category: question.category().map(str::to_owned),
        }
    }
}

/// Terminal record of a graded attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    pub test_id: TestId,
    pub total_questions: u32,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub score: f64,
    pub passed: bool,
    pub attempt_number: u32,
    pub time_taken_secs: u64,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub answers_detail: Vec<AnswerDetail>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn detail_copies_question_content() {
        let q = Question::new(QuestionId::new(1), "Q", vec!["a".into(), "b".into()], 1)
            .unwrap()
            .with_explanation("b is right")
            .with_category("basics");
        let mut rec = AnswerRecord::unanswered(q.id());
        rec.record(1, true, fixed_now()).unwrap();

        let detail = AnswerDetail::from_record(&q, &rec);
        assert_eq!(detail.question_text, "Q");
        assert_eq!(detail.options, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(detail.selected_index, Some(1));
        assert!(detail.is_correct);
        assert_eq!(detail.explanation.as_deref(), Some("b is right"));
    }

    #[test]
    fn unanswered_detail_is_not_correct() {
        let q = Question::new(QuestionId::new(1), "Q", vec!["a".into(), "b".into()], 0).unwrap();
        let rec = AnswerRecord::unanswered(q.id());
        let detail = AnswerDetail::from_record(&q, &rec);
        assert_eq!(detail.selected_index, None);
        assert!(!detail.is_correct);
    }
}
