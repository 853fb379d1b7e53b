use chrono::{DateTime, Utc};

use assess_core::model::{
    AnswerDetail, AnswerRecord, Question, QuestionDeck, QuestionId, SessionMode, SessionSnapshot,
};
use assess_core::scoring::{self, Score};

use super::progress::SessionProgress;
use crate::error::TransitionError;

//
// ─── PHASES ────────────────────────────────────────────────────────────────────
//

/// Sub-state of the current question while a session is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionPhase {
    /// Waiting for the user to pick and submit an option.
    AnswerPending,
    /// The current question has a recorded answer and feedback is shown.
    AnswerRevealed,
}

/// Lifecycle of an assessment session.
///
/// Pausing is not a phase: a paused session is simply one whose timers are
/// stopped, and it resumes from the last synchronized snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NotStarted,
    InProgress(QuestionPhase),
    Completed,
    Abandoned,
}

impl SessionPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Abandoned)
    }
}

//
// ─── TRANSITION OUTPUTS ────────────────────────────────────────────────────────
//

/// What happened when an answer was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub position: usize,
    pub question_id: QuestionId,
    pub display_index: usize,
    pub canonical_index: usize,
    /// Where the correct option sits in the current display order.
    pub correct_display_index: Option<usize>,
    pub is_correct: bool,
}

/// Result of moving forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Now showing the question at this presentation position.
    Question(usize),
    /// The last question is behind us; the caller should finish.
    ReadyToFinish,
}

/// How a session reached its terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Finished,
    Abandoned,
}

/// Scored summary of a terminated session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub mode: SessionMode,
    pub termination: Termination,
    pub score: Score,
    /// Provisional attempt number; `None` for study sessions.
    pub attempt_number: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub time_taken_secs: u64,
    /// One entry per question, in presentation order.
    pub answers_detail: Vec<AnswerDetail>,
}

/// Previously persisted state handed to [`AssessmentSession::restore`].
///
/// `answers` must line up with the deck's presentation order.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredState {
    pub answers: Vec<AnswerRecord>,
    pub current_index: usize,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// The mutable state of one assessment session.
///
/// All mutation goes through the transition methods, which are pure: they
/// take the current time as an argument and never perform I/O. Invalid calls
/// return `TransitionError` and leave the session untouched.
#[derive(Debug, Clone)]
pub struct AssessmentSession {
    deck: QuestionDeck,
    mode: SessionMode,
    phase: SessionPhase,
    answers: Vec<AnswerRecord>,
    current: usize,
    correct_count: u32,
    incorrect_count: u32,
    selected: Option<usize>,
    attempt_number: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    last_activity_at: Option<DateTime<Utc>>,
}

impl AssessmentSession {
    /// A session over `deck` that has not started yet.
    #[must_use]
    pub fn new(deck: QuestionDeck, mode: SessionMode) -> Self {
        let answers = deck
            .questions()
            .map(|q| AnswerRecord::unanswered(q.id()))
            .collect();
        Self {
            deck,
            mode,
            phase: SessionPhase::NotStarted,
            answers,
            current: 0,
            correct_count: 0,
            incorrect_count: 0,
            selected: None,
            attempt_number: None,
            started_at: None,
            last_activity_at: None,
        }
    }

    /// Begin a fresh session at the first question.
    ///
    /// `attempt_number` is ignored in study mode.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError::AlreadyStarted` unless the session is `NotStarted`.
    pub fn start(
        &mut self,
        attempt_number: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_not_started()?;
        self.attempt_number = attempt_number.filter(|_| self.mode.is_graded());
        self.started_at = Some(now);
        self.last_activity_at = Some(now);
        self.current = 0;
        self.phase = SessionPhase::InProgress(self.phase_at(0));
        Ok(())
    }

    /// Begin from previously persisted state instead of a blank answer sheet.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError::AlreadyStarted` unless the session is
    /// `NotStarted`, or `RestoreMismatch` if the answers do not line up with
    /// the deck.
    pub fn restore(
        &mut self,
        state: RestoredState,
        attempt_number: Option<u32>,
    ) -> Result<(), TransitionError> {
        self.ensure_not_started()?;
        let lines_up = state.answers.len() == self.deck.len()
            && state
                .answers
                .iter()
                .zip(self.deck.questions())
                .all(|(rec, q)| rec.question_id == q.id());
        if !lines_up {
            return Err(TransitionError::RestoreMismatch {
                expected: self.deck.len(),
                got: state.answers.len(),
            });
        }

        self.answers = state.answers;
        self.current = state.current_index.min(self.deck.len().saturating_sub(1));
        self.correct_count = state.correct_count;
        self.incorrect_count = state.incorrect_count;
        self.attempt_number = attempt_number.filter(|_| self.mode.is_graded());
        self.started_at = Some(state.started_at);
        self.last_activity_at = Some(state.last_activity_at);
        self.phase = SessionPhase::InProgress(self.phase_at(self.current));
        Ok(())
    }

    /// Tentatively choose an option by its display index.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` unless the current question is pending, or if
    /// the index is out of range.
    pub fn select_option(&mut self, display_index: usize) -> Result<(), TransitionError> {
        self.ensure_question_phase(QuestionPhase::AnswerPending)?;
        let count = self.current_option_count();
        if display_index >= count {
            return Err(TransitionError::OptionOutOfRange {
                index: display_index,
                count,
            });
        }
        self.selected = Some(display_index);
        Ok(())
    }

    /// Record the selected option for the current question and reveal it.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` unless the current question is pending with a
    /// selection.
    pub fn submit_answer(&mut self, now: DateTime<Utc>) -> Result<AnswerOutcome, TransitionError> {
        self.ensure_question_phase(QuestionPhase::AnswerPending)?;
        let display_index = self.selected.ok_or(TransitionError::NoSelection)?;
        let pos = self.current;
        let count = self.current_option_count();
        let canonical_index = self
            .deck
            .to_canonical(pos, display_index)
            .ok_or(TransitionError::OptionOutOfRange {
                index: display_index,
                count,
            })?;
        let (question_id, correct_index) = self
            .deck
            .question(pos)
            .map(|q| (q.id(), q.correct_index()))
            .ok_or(TransitionError::NotStarted)?;
        let is_correct = canonical_index == correct_index;

        self.answers[pos].record(canonical_index, is_correct, now)?;
        if is_correct {
            self.correct_count = self.correct_count.saturating_add(1);
        } else {
            self.incorrect_count = self.incorrect_count.saturating_add(1);
        }
        self.selected = None;
        self.last_activity_at = Some(now);
        self.phase = SessionPhase::InProgress(QuestionPhase::AnswerRevealed);

        Ok(AnswerOutcome {
            position: pos,
            question_id,
            display_index,
            canonical_index,
            correct_display_index: self.deck.to_display(pos, correct_index),
            is_correct,
        })
    }

    /// Move to the next question once the current one is revealed.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError::AnswerNotRevealed` if the current question is
    /// still pending.
    pub fn next(&mut self, now: DateTime<Utc>) -> Result<Advance, TransitionError> {
        self.ensure_question_phase(QuestionPhase::AnswerRevealed)?;
        if self.current + 1 >= self.deck.len() {
            return Ok(Advance::ReadyToFinish);
        }
        self.current += 1;
        self.selected = None;
        self.last_activity_at = Some(now);
        self.phase = SessionPhase::InProgress(self.phase_at(self.current));
        Ok(Advance::Question(self.current))
    }

    /// Step back one question. Study mode only; counts are untouched.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError::StudyOnly` in test mode, or
    /// `AtFirstQuestion` at position zero.
    pub fn previous(&mut self, now: DateTime<Utc>) -> Result<usize, TransitionError> {
        self.ensure_in_progress()?;
        if self.mode.is_graded() {
            return Err(TransitionError::StudyOnly);
        }
        if self.current == 0 {
            return Err(TransitionError::AtFirstQuestion);
        }
        self.current -= 1;
        self.selected = self.answers[self.current]
            .selected_index
            .and_then(|canonical| self.deck.to_display(self.current, canonical));
        self.last_activity_at = Some(now);
        self.phase = SessionPhase::InProgress(self.phase_at(self.current));
        Ok(self.current)
    }

    /// Complete the session and score it.
    ///
    /// Questions left unanswered count as neither correct nor incorrect.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` unless the session is in progress.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Result<SessionReport, TransitionError> {
        self.ensure_in_progress()?;
        let mut score = scoring::score_finished(
            self.correct_count,
            self.incorrect_count,
            self.total_u32(),
            self.deck.definition().passing_score(),
        );
        if !self.mode.is_graded() {
            score.passed = false;
        }
        self.phase = SessionPhase::Completed;
        Ok(self.report(Termination::Finished, score, now))
    }

    /// Give up on the session.
    ///
    /// Every question without a correct answer is reported as incorrect and
    /// the attempt never passes.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` unless the session is in progress.
    pub fn abandon(&mut self, now: DateTime<Utc>) -> Result<SessionReport, TransitionError> {
        self.ensure_in_progress()?;
        let score = scoring::score_abandoned(self.correct_count, self.total_u32());
        self.phase = SessionPhase::Abandoned;
        Ok(self.report(Termination::Abandoned, score, now))
    }

    //
    // ─── READ-ONLY VIEWS ───────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    #[must_use]
    pub fn deck(&self) -> &QuestionDeck {
        &self.deck
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.deck.question(self.current)
    }

    /// Option labels of the current question in display order.
    #[must_use]
    pub fn displayed_options(&self) -> Option<Vec<&str>> {
        self.deck.display_options(self.current)
    }

    /// Tentative (or, after going back in study mode, recorded) display selection.
    #[must_use]
    pub fn selected_display(&self) -> Option<usize> {
        self.selected
    }

    /// Canonical option recorded for the question at `position`.
    #[must_use]
    pub fn canonical_selected(&self, position: usize) -> Option<usize> {
        self.answers.get(position)?.selected_index
    }

    #[must_use]
    pub fn answers(&self) -> &[AnswerRecord] {
        &self.answers
    }

    #[must_use]
    pub fn correct_count(&self) -> u32 {
        self.correct_count
    }

    #[must_use]
    pub fn incorrect_count(&self) -> u32 {
        self.incorrect_count
    }

    #[must_use]
    pub fn attempt_number(&self) -> Option<u32> {
        self.attempt_number
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        let total = self.answers.len();
        let answered = self.answers.iter().filter(|a| a.is_answered()).count();
        SessionProgress {
            total,
            answered,
            remaining: total - answered,
            correct: self.correct_count,
            incorrect: self.incorrect_count,
            position: self.current,
            is_complete: self.phase.is_terminal(),
        }
    }

    /// Serializable state for the progress store.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        let started_at = self.started_at.unwrap_or(now);
        SessionSnapshot {
            mode: self.mode,
            current_question_index: self.current,
            correct_count: self.correct_count,
            incorrect_count: self.incorrect_count,
            answers: self.answers.clone(),
            started_at,
            last_activity_at: self.last_activity_at.unwrap_or(started_at),
            completed: self.phase.is_terminal(),
            attempt_number: self.attempt_number,
        }
    }

    /// Audit copy of every question and its record, in presentation order.
    #[must_use]
    pub fn answer_details(&self) -> Vec<AnswerDetail> {
        self.deck
            .questions()
            .zip(&self.answers)
            .map(|(q, rec)| AnswerDetail::from_record(q, rec))
            .collect()
    }

    //
    // ─── HELPERS ───────────────────────────────────────────────────────────────
    //

    fn phase_at(&self, pos: usize) -> QuestionPhase {
        if self.answers.get(pos).is_some_and(AnswerRecord::is_answered) {
            QuestionPhase::AnswerRevealed
        } else {
            QuestionPhase::AnswerPending
        }
    }

    fn current_option_count(&self) -> usize {
        self.deck
            .option_order(self.current)
            .map_or(0, |o| o.len())
    }

    fn total_u32(&self) -> u32 {
        u32::try_from(self.deck.len()).unwrap_or(u32::MAX)
    }

    fn report(&self, termination: Termination, score: Score, now: DateTime<Utc>) -> SessionReport {
        let started_at = self.started_at.unwrap_or(now);
        let elapsed = now.signed_duration_since(started_at).num_seconds();
        SessionReport {
            mode: self.mode,
            termination,
            score,
            attempt_number: self.attempt_number,
            started_at,
            completed_at: now,
            time_taken_secs: u64::try_from(elapsed).unwrap_or(0),
            answers_detail: self.answer_details(),
        }
    }

    fn ensure_not_started(&self) -> Result<(), TransitionError> {
        match self.phase {
            SessionPhase::NotStarted => Ok(()),
            phase if phase.is_terminal() => Err(TransitionError::Terminal(phase)),
            _ => Err(TransitionError::AlreadyStarted),
        }
    }

    fn ensure_in_progress(&self) -> Result<QuestionPhase, TransitionError> {
        match self.phase {
            SessionPhase::InProgress(q) => Ok(q),
            SessionPhase::NotStarted => Err(TransitionError::NotStarted),
            phase => Err(TransitionError::Terminal(phase)),
        }
    }

    fn ensure_question_phase(&self, wanted: QuestionPhase) -> Result<(), TransitionError> {
        let current = self.ensure_in_progress()?;
        if current == wanted {
            return Ok(());
        }
        Err(match current {
            QuestionPhase::AnswerPending => TransitionError::AnswerNotRevealed,
            QuestionPhase::AnswerRevealed => TransitionError::AnswerAlreadyRevealed,
        })
    }
}
