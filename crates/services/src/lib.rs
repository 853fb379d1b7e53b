#![forbid(unsafe_code)]

pub mod app_services;
pub mod config;
pub mod error;
pub mod schedule;
pub mod sessions;

pub use assess_core::Clock;
pub use sessions as session;

pub use app_services::AppServices;
pub use config::EngineConfig;
pub use error::{AppServicesError, SessionError, TransitionError};
pub use schedule::ScheduledTask;

pub use sessions::{
    Advance, AnswerOutcome, AssessmentSession, RunningSession, SessionLoopService, SessionNotice,
    SessionOutcome, SessionPhase, SubmissionOutcome,
};
