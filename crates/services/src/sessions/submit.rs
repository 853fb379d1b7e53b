use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use assess_core::model::{AttemptResult, TestDefinition};
use storage::repository::{ResultStore, StorageError, SubmitResultRequest};

use super::machine::SessionReport;

/// What the user gets to see after a graded session ends.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// The result store accepted the attempt; its record is authoritative.
    Accepted(AttemptResult),
    /// The submission failed; `result` was built locally and is best-effort.
    Fallback { result: AttemptResult, error: String },
}

impl SubmissionOutcome {
    #[must_use]
    pub fn result(&self) -> &AttemptResult {
        match self {
            SubmissionOutcome::Accepted(result) | SubmissionOutcome::Fallback { result, .. } => {
                result
            }
        }
    }

    #[must_use]
    pub fn into_result(self) -> AttemptResult {
        match self {
            SubmissionOutcome::Accepted(result) | SubmissionOutcome::Fallback { result, .. } => {
                result
            }
        }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmissionOutcome::Accepted(_))
    }
}

/// Sends the terminal record of a graded session to the result store.
#[derive(Clone)]
pub struct ResultSubmitter {
    results: Arc<dyn ResultStore>,
    timeout: Duration,
}

impl ResultSubmitter {
    #[must_use]
    pub fn new(results: Arc<dyn ResultStore>, timeout: Duration) -> Self {
        Self { results, timeout }
    }

    /// Wire request for `report`.
    #[must_use]
    pub fn build_request(
        username: &str,
        definition: &TestDefinition,
        report: &SessionReport,
    ) -> SubmitResultRequest {
        SubmitResultRequest {
            username: username.to_owned(),
            test_id: definition.id(),
            test_title: definition.title().to_owned(),
            total_questions: report.score.total_questions,
            correct_count: report.score.correct_count,
            incorrect_count: report.score.incorrect_count,
            score: report.score.score,
            passed: report.score.passed,
            attempt_number: report.attempt_number.unwrap_or(1),
            time_taken_secs: report.time_taken_secs,
            answers_detail: report.answers_detail.clone(),
        }
    }

    /// Locally built record, used when the store cannot be reached.
    #[must_use]
    pub fn local_result(definition: &TestDefinition, report: &SessionReport) -> AttemptResult {
        AttemptResult {
            test_id: definition.id(),
            total_questions: report.score.total_questions,
            correct_count: report.score.correct_count,
            incorrect_count: report.score.incorrect_count,
            score: report.score.score,
            passed: report.score.passed,
            attempt_number: report.attempt_number.unwrap_or(1),
            time_taken_secs: report.time_taken_secs,
            completed_at: report.completed_at,
            answers_detail: report.answers_detail.clone(),
        }
    }

    /// Submit `report`. Never fails: errors degrade to a local fallback.
    pub async fn submit(
        &self,
        username: &str,
        definition: &TestDefinition,
        report: &SessionReport,
    ) -> SubmissionOutcome {
        let request = Self::build_request(username, definition, report);
        let outcome =
            match tokio::time::timeout(self.timeout, self.results.submit_result(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StorageError::Timeout),
            };

        match outcome {
            Ok(Some(accepted)) => {
                if accepted.attempt_number != request.attempt_number {
                    debug!(
                        provisional = request.attempt_number,
                        assigned = accepted.attempt_number,
                        "store assigned a different attempt number"
                    );
                }
                info!(
                    test_id = %accepted.test_id,
                    attempt = accepted.attempt_number,
                    passed = accepted.passed,
                    "attempt submitted"
                );
                SubmissionOutcome::Accepted(accepted)
            }
            Ok(None) => {
                info!(test_id = %request.test_id, "attempt submitted without a stored record");
                SubmissionOutcome::Accepted(Self::local_result(definition, report))
            }
            Err(err) => {
                warn!(
                    test_id = %request.test_id,
                    error = %err,
                    "attempt submission failed, using local result"
                );
                SubmissionOutcome::Fallback {
                    result: Self::local_result(definition, report),
                    error: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::machine::Termination;
    use assess_core::model::{Question, QuestionId, SessionMode, TestId};
    use assess_core::scoring::score_finished;
    use assess_core::time::fixed_now;
    use storage::repository::{AttemptAdmin, InMemoryRepository};

    fn definition() -> TestDefinition {
        let questions = (1..=4)
            .map(|id| {
                Question::new(QuestionId::new(id), "Q", vec!["a".into(), "b".into()], 0).unwrap()
            })
            .collect();
        TestDefinition::new(TestId::new(2), "Submit", questions, 0.75, 1, false).unwrap()
    }

    fn report(attempt: u32) -> SessionReport {
        SessionReport {
            mode: SessionMode::Test,
            termination: Termination::Finished,
            score: score_finished(3, 1, 4, 0.75),
            attempt_number: Some(attempt),
            started_at: fixed_now(),
            completed_at: fixed_now(),
            time_taken_secs: 30,
            answers_detail: Vec::new(),
        }
    }

    async fn repo() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.register_test(TestId::new(2), 1).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn accepted_record_is_authoritative() {
        let repo = repo().await;
        let submitter = ResultSubmitter::new(Arc::new(repo.clone()), Duration::from_secs(1));

        let outcome = submitter.submit("ada", &definition(), &report(7)).await;

        assert!(outcome.is_accepted());
        assert_eq!(outcome.result().attempt_number, 1);
        assert!(outcome.result().passed);
    }

    #[tokio::test]
    async fn offline_store_yields_local_fallback() {
        let repo = repo().await;
        repo.set_offline(true);
        let submitter = ResultSubmitter::new(Arc::new(repo.clone()), Duration::from_secs(1));

        let outcome = submitter.submit("ada", &definition(), &report(1)).await;

        let SubmissionOutcome::Fallback { result, error } = outcome else {
            panic!("expected fallback");
        };
        assert!(result.passed);
        assert!((result.score - 0.75).abs() < f64::EPSILON);
        assert!(error.contains("offline"));
    }

    #[tokio::test]
    async fn exhausted_attempts_fall_back_too() {
        let repo = repo().await;
        let submitter = ResultSubmitter::new(Arc::new(repo.clone()), Duration::from_secs(1));
        assert!(submitter.submit("ada", &definition(), &report(1)).await.is_accepted());

        let outcome = submitter.submit("ada", &definition(), &report(2)).await;
        assert!(!outcome.is_accepted());
        assert_eq!(outcome.into_result().attempt_number, 2);
    }

    #[test]
    fn request_carries_title_and_provisional_number() {
        let request = ResultSubmitter::build_request("ada", &definition(), &report(3));
        assert_eq!(request.test_title, "Submit");
        assert_eq!(request.attempt_number, 3);
        assert_eq!(request.total_questions, 4);
    }
}
