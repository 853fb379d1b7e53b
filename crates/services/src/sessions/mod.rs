mod machine;
mod plan;
mod progress;
mod resume;
mod submit;
mod sync;
mod workflow;

// Public API of the session subsystem.
pub use crate::error::{SessionError, TransitionError};
pub use machine::{
    Advance, AnswerOutcome, AssessmentSession, QuestionPhase, RestoredState, SessionPhase,
    SessionReport, Termination,
};
pub use plan::DeckBuilder;
pub use progress::SessionProgress;
pub use resume::{
    FreshReason, Reconstruction, ResumeDecision, ResumeLoader, ResumeRejected, reconstruct,
};
pub use submit::{ResultSubmitter, SubmissionOutcome};
pub use sync::ProgressSynchronizer;
pub use workflow::{RunningSession, SessionLoopService, SessionNotice, SessionOutcome};
