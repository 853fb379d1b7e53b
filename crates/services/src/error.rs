//! Shared error types for the services crate.

use thiserror::Error;

use assess_core::model::{AnswerError, DeckError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

use crate::sessions::SessionPhase;

/// A state-machine call that is not valid in the current phase.
///
/// Transitions never touch the store, so these are always caller mistakes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransitionError {
    #[error("session already started")]
    AlreadyStarted,
    #[error("session has not started")]
    NotStarted,
    #[error("session is {0:?} and accepts no further changes")]
    Terminal(SessionPhase),
    #[error("current question was already answered")]
    AnswerAlreadyRevealed,
    #[error("current question has not been answered yet")]
    AnswerNotRevealed,
    #[error("no option selected")]
    NoSelection,
    #[error("option {index} out of range for {count} options")]
    OptionOutOfRange { index: usize, count: usize },
    #[error("going back is only allowed in study mode")]
    StudyOnly,
    #[error("already at the first question")]
    AtFirstQuestion,
    #[error("restored answers do not match the deck ({expected} questions, {got} records)")]
    RestoreMismatch { expected: usize, got: usize },
    #[error(transparent)]
    Answer(#[from] AnswerError),
}

/// Errors emitted by session services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no attempts remaining ({used} of {max} used)")]
    AttemptsExhausted { used: u32, max: u32 },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Deck(#[from] DeckError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Session(#[from] SessionError),
}
