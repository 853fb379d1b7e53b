//! Rebuilding a session from a persisted snapshot.
//!
//! The stored answer list is the presentation order, so resuming replays it:
//! each record is mapped back to its canonical question, canonical questions
//! the snapshot does not mention are appended, and option orders are drawn
//! fresh.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use assess_core::model::{
    AnswerRecord, QuestionId, SessionMode, SessionSnapshot, TestDefinition, TestStatus,
};
use storage::repository::{ProgressStore, StorageError};

use super::machine::RestoredState;

/// Question order and answer sheet recovered from a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    /// Canonical question positions in presentation order.
    pub order: Vec<usize>,
    pub state: RestoredState,
    /// Persisted records that were unknown, duplicated, or out of range.
    pub dropped: usize,
    /// Canonical questions the snapshot did not mention.
    pub appended: usize,
}

/// Why a snapshot could not be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeRejected {
    /// Snapshot counts disagree with its own records even though nothing was dropped.
    CountMismatch {
        stored: (u32, u32),
        derived: (u32, u32),
    },
}

/// Replay `snapshot` against the current definition.
///
/// Records for questions that no longer exist, duplicate records, and
/// selections outside the question's options are dropped; the counts are then
/// recomputed from what survives.
///
/// # Errors
///
/// Returns `ResumeRejected::CountMismatch` if nothing was dropped but the
/// stored counts still disagree with the records.
///
/// # Panics
///
/// Panics on a count mismatch when `strict` is set.
pub fn reconstruct(
    definition: &TestDefinition,
    snapshot: &SessionSnapshot,
    strict: bool,
) -> Result<Reconstruction, ResumeRejected> {
    let lookup: HashMap<QuestionId, usize> = definition
        .questions()
        .iter()
        .enumerate()
        .map(|(pos, q)| (q.id(), pos))
        .collect();

    let total = definition.question_count();
    let mut seen = HashSet::with_capacity(total);
    let mut order = Vec::with_capacity(total);
    let mut answers = Vec::with_capacity(total);
    let mut dropped = 0;

    for record in &snapshot.answers {
        let Some(&canonical) = lookup.get(&record.question_id) else {
            dropped += 1;
            continue;
        };
        if !seen.insert(canonical) {
            dropped += 1;
            continue;
        }
        let options = definition.questions()[canonical].option_count();
        let record = match record.selected_index {
            Some(index) if index >= options => {
                dropped += 1;
                AnswerRecord::unanswered(record.question_id)
            }
            _ => record.clone(),
        };
        order.push(canonical);
        answers.push(record);
    }

    let mut appended = 0;
    for (canonical, question) in definition.questions().iter().enumerate() {
        if seen.insert(canonical) {
            order.push(canonical);
            answers.push(AnswerRecord::unanswered(question.id()));
            appended += 1;
        }
    }

    let derived = derive_counts(&answers);
    let stored = (snapshot.correct_count, snapshot.incorrect_count);
    let (correct_count, incorrect_count) = if dropped > 0 || stored == derived {
        derived
    } else {
        assert!(
            !strict,
            "persisted progress counts {stored:?} disagree with its records {derived:?}"
        );
        return Err(ResumeRejected::CountMismatch { stored, derived });
    };

    Ok(Reconstruction {
        order,
        state: RestoredState {
            answers,
            current_index: snapshot
                .current_question_index
                .min(total.saturating_sub(1)),
            correct_count,
            incorrect_count,
            started_at: snapshot.started_at,
            last_activity_at: snapshot.last_activity_at,
        },
        dropped,
        appended,
    })
}

fn derive_counts(answers: &[AnswerRecord]) -> (u32, u32) {
    answers
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

//
// ─── LOADER ────────────────────────────────────────────────────────────────────
//

/// Why a session starts fresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreshReason {
    /// No in-progress snapshot, or one without answers.
    NoSnapshot,
    /// The snapshot belongs to the other mode.
    ModeMismatch(SessionMode),
    /// The snapshot contradicts itself and was discarded.
    Inconsistent,
    /// The status lookup failed; nothing is known about the user's standing.
    StatusUnavailable(String),
}

/// Outcome of consulting the progress store at session start.
#[derive(Debug, Clone)]
pub enum ResumeDecision {
    Resume {
        status: TestStatus,
        reconstruction: Reconstruction,
    },
    Fresh {
        status: Option<TestStatus>,
        reason: FreshReason,
    },
}

impl ResumeDecision {
    #[must_use]
    pub fn status(&self) -> Option<&TestStatus> {
        match self {
            ResumeDecision::Resume { status, .. } => Some(status),
            ResumeDecision::Fresh { status, .. } => status.as_ref(),
        }
    }
}

/// Looks up a user's standing and decides whether to resume or start over.
///
/// Store failures never escape: they become `FreshReason::StatusUnavailable`.
#[derive(Clone)]
pub struct ResumeLoader {
    progress: Arc<dyn ProgressStore>,
    timeout: Duration,
    strict: bool,
}

impl ResumeLoader {
    #[must_use]
    pub fn new(progress: Arc<dyn ProgressStore>, timeout: Duration, strict: bool) -> Self {
        Self {
            progress,
            timeout,
            strict,
        }
    }

    pub async fn load(
        &self,
        username: &str,
        definition: &TestDefinition,
        mode: SessionMode,
    ) -> ResumeDecision {
        let status = match tokio::time::timeout(
            self.timeout,
            self.progress.get_status(username, definition.id()),
        )
        .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => return status_unavailable(&err),
            Err(_) => return status_unavailable(&StorageError::Timeout),
        };

        let Some(snapshot) = status.resumable() else {
            return ResumeDecision::Fresh {
                status: Some(status),
                reason: FreshReason::NoSnapshot,
            };
        };
        if snapshot.mode != mode {
            debug!(
                stored = %snapshot.mode,
                requested = %mode,
                "snapshot mode differs, starting fresh"
            );
            let stored = snapshot.mode;
            return ResumeDecision::Fresh {
                status: Some(status),
                reason: FreshReason::ModeMismatch(stored),
            };
        }

        match reconstruct(definition, snapshot, self.strict) {
            Ok(reconstruction) => {
                if reconstruction.dropped > 0 || reconstruction.appended > 0 {
                    warn!(
                        test_id = %definition.id(),
                        dropped = reconstruction.dropped,
                        appended = reconstruction.appended,
                        "snapshot no longer matches the test definition, healed on resume"
                    );
                }
                ResumeDecision::Resume {
                    status,
                    reconstruction,
                }
            }
            Err(rejected) => {
                warn!(test_id = %definition.id(), ?rejected, "discarding inconsistent snapshot");
                ResumeDecision::Fresh {
                    status: Some(status),
                    reason: FreshReason::Inconsistent,
                }
            }
        }
    }
}

fn status_unavailable(err: &StorageError) -> ResumeDecision {
    warn!(error = %err, "could not load test status, starting fresh");
    ResumeDecision::Fresh {
        status: None,
        reason: FreshReason::StatusUnavailable(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assess_core::model::{Question, TestId};
    use assess_core::time::fixed_now;
    use storage::repository::{AttemptAdmin, InMemoryRepository, ProgressUpdate};

    fn definition(questions: u64) -> TestDefinition {
        let questions = (1..=questions)
            .map(|id| {
                Question::new(
                    QuestionId::new(id),
                    format!("Q{id}"),
                    vec!["a".into(), "b".into()],
                    0,
                )
                .unwrap()
            })
            .collect();
        TestDefinition::new(TestId::new(1), "Resume", questions, 0.5, 3, false).unwrap()
    }

    fn answered(id: u64, correct: bool) -> AnswerRecord {
        let mut rec = AnswerRecord::unanswered(QuestionId::new(id));
        rec.record(usize::from(!correct), correct, fixed_now()).unwrap();
        rec
    }

    fn snapshot(answers: Vec<AnswerRecord>, index: usize, counts: (u32, u32)) -> SessionSnapshot {
        SessionSnapshot {
            mode: SessionMode::Test,
            current_question_index: index,
            correct_count: counts.0,
            incorrect_count: counts.1,
            answers,
            started_at: fixed_now(),
            last_activity_at: fixed_now(),
            completed: false,
            attempt_number: Some(1),
        }
    }

    #[test]
    fn replays_three_of_ten_and_appends_the_rest() {
        let def = definition(10);
        let snap = snapshot(
            vec![answered(7, true), answered(2, false), answered(9, true)],
            3,
            (2, 1),
        );

        let rebuilt = reconstruct(&def, &snap, true).unwrap();

        assert_eq!(&rebuilt.order[..3], &[6, 1, 8]);
        assert_eq!(rebuilt.order.len(), 10);
        let tail: HashSet<_> = rebuilt.order[3..].iter().copied().collect();
        assert_eq!(tail.len(), 7);
        assert!(!tail.contains(&6) && !tail.contains(&1) && !tail.contains(&8));
        assert_eq!(rebuilt.state.current_index, 3);
        assert_eq!(rebuilt.state.correct_count, 2);
        assert_eq!(rebuilt.state.incorrect_count, 1);
        assert_eq!(rebuilt.appended, 7);
        assert_eq!(rebuilt.dropped, 0);
    }

    #[test]
    fn timestamps_carry_over() {
        let def = definition(2);
        let mut snap = snapshot(vec![answered(1, true)], 1, (1, 0));
        snap.started_at = fixed_now() - chrono::Duration::minutes(20);

        let rebuilt = reconstruct(&def, &snap, true).unwrap();

        assert_eq!(rebuilt.state.started_at, snap.started_at);
        assert_eq!(rebuilt.state.last_activity_at, fixed_now());
    }

    #[test]
    fn unknown_and_duplicate_records_are_dropped_and_counts_recomputed() {
        let def = definition(3);
        let snap = snapshot(
            vec![answered(2, true), answered(42, true), answered(2, false)],
            2,
            (2, 1),
        );

        let rebuilt = reconstruct(&def, &snap, true).unwrap();

        assert_eq!(rebuilt.dropped, 2);
        assert_eq!(rebuilt.order, vec![1, 0, 2]);
        assert_eq!(rebuilt.state.correct_count, 1);
        assert_eq!(rebuilt.state.incorrect_count, 0);
        assert_eq!(rebuilt.state.current_index, 2);
    }

    #[test]
    fn out_of_range_selection_is_cleared() {
        let def = definition(2);
        let mut bad = AnswerRecord::unanswered(QuestionId::new(1));
        bad.record(5, true, fixed_now()).unwrap();
        let snap = snapshot(vec![bad], 0, (1, 0));

        let rebuilt = reconstruct(&def, &snap, true).unwrap();
        assert!(!rebuilt.state.answers[0].is_answered());
        assert_eq!(rebuilt.state.correct_count, 0);
    }

    #[test]
    fn current_index_is_clamped() {
        let def = definition(2);
        let snap = snapshot(vec![answered(1, true), answered(2, true)], 2, (2, 0));
        let rebuilt = reconstruct(&def, &snap, true).unwrap();
        assert_eq!(rebuilt.state.current_index, 1);
    }

    #[test]
    fn count_mismatch_is_rejected_when_lenient() {
        let def = definition(3);
        let snap = snapshot(vec![answered(1, true)], 1, (0, 1));
        let err = reconstruct(&def, &snap, false).unwrap_err();
        assert_eq!(
            err,
            ResumeRejected::CountMismatch {
                stored: (0, 1),
                derived: (1, 0)
            }
        );
    }

    #[test]
    #[should_panic(expected = "disagree")]
    fn count_mismatch_panics_when_strict() {
        let def = definition(3);
        let snap = snapshot(vec![answered(1, true)], 1, (0, 1));
        let _ = reconstruct(&def, &snap, true);
    }

    async fn store_with(snapshot: Option<SessionSnapshot>) -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.register_test(TestId::new(1), 3).await.unwrap();
        if let Some(snapshot) = snapshot {
            repo.update_progress(&ProgressUpdate {
                username: "ada".into(),
                test_id: TestId::new(1),
                snapshot,
            })
            .await
            .unwrap();
        }
        repo
    }

    fn loader(repo: &InMemoryRepository) -> ResumeLoader {
        ResumeLoader::new(Arc::new(repo.clone()), Duration::from_secs(1), false)
    }

    #[tokio::test]
    async fn loader_resumes_matching_snapshot() {
        let repo = store_with(Some(snapshot(vec![answered(2, true)], 0, (1, 0)))).await;
        let decision = loader(&repo)
            .load("ada", &definition(3), SessionMode::Test)
            .await;
        let ResumeDecision::Resume { reconstruction, .. } = decision else {
            panic!("expected resume, got {decision:?}");
        };
        assert_eq!(reconstruction.order[0], 1);
    }

    #[tokio::test]
    async fn loader_starts_fresh_without_snapshot() {
        let repo = store_with(None).await;
        let decision = loader(&repo)
            .load("ada", &definition(3), SessionMode::Test)
            .await;
        assert!(matches!(
            decision,
            ResumeDecision::Fresh {
                status: Some(_),
                reason: FreshReason::NoSnapshot
            }
        ));
    }

    #[tokio::test]
    async fn loader_ignores_snapshot_of_other_mode() {
        let mut snap = snapshot(vec![answered(1, true)], 0, (1, 0));
        snap.mode = SessionMode::Study;
        let repo = store_with(Some(snap)).await;
        let decision = loader(&repo)
            .load("ada", &definition(3), SessionMode::Test)
            .await;
        assert!(matches!(
            decision,
            ResumeDecision::Fresh {
                reason: FreshReason::ModeMismatch(SessionMode::Study),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn loader_discards_inconsistent_snapshot() {
        let repo = store_with(Some(snapshot(vec![answered(1, true)], 0, (3, 3)))).await;
        let decision = loader(&repo)
            .load("ada", &definition(3), SessionMode::Test)
            .await;
        assert!(matches!(
            decision,
            ResumeDecision::Fresh {
                reason: FreshReason::Inconsistent,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn loader_falls_back_when_store_is_offline() {
        let repo = store_with(None).await;
        repo.set_offline(true);
        let decision = loader(&repo)
            .load("ada", &definition(3), SessionMode::Test)
            .await;
        assert!(decision.status().is_none());
        assert!(matches!(
            decision,
            ResumeDecision::Fresh {
                reason: FreshReason::StatusUnavailable(_),
                ..
            }
        ));
    }
}
