#![forbid(unsafe_code)]

pub mod http;
mod ledger;
pub mod repository;
pub mod sqlite;

pub use http::{HttpStore, HttpStoreConfig};
pub use repository::{
    AttemptAdmin, CallCounts, InMemoryRepository, ProgressStore, ProgressUpdate, ResultStore,
    StartSessionRequest, Storage, StorageError, SubmitResultRequest,
};
pub use sqlite::{SqliteInitError, SqliteRepository};
