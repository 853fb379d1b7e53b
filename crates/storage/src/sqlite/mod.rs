use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use assess_core::Clock;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use thiserror::Error;

use crate::repository::Storage;

mod ledger_repo;
mod mapping;
mod migrate;
mod result_repo;

/// Writers wait this long on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `SQLite`-backed progress/result store with server-side attempt rules.
///
/// Used for local play and as a reference backend; the remote API remains the
/// production store.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
    clock: Clock,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("cannot prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

impl SqliteRepository {
    /// Connect using a `sqlite:` URL, e.g. `sqlite::memory:` or a shared-cache
    /// `sqlite:file:name?mode=memory&cache=shared`.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the URL is invalid or the pool cannot open.
    pub async fn connect(database_url: &str) -> Result<Self, SqliteInitError> {
        let options = SqliteConnectOptions::from_str(database_url)?;
        Self::connect_with(options).await
    }

    /// Open (creating if needed) a database file, along with its directory.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError::Io` if the directory cannot be created, or
    /// `Sqlx` if the file cannot be opened.
    pub async fn open(path: &Path) -> Result<Self, SqliteInitError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self, SqliteInitError> {
        // The ledger rows reference `tests`; submits retry on a busy file.
        let options = options.foreign_keys(true).busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(BUSY_TIMEOUT)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            clock: Clock::default(),
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if migration queries fail.
    pub async fn migrate(&self) -> Result<(), SqliteInitError> {
        migrate::run_migrations(&self.pool).await
    }
}

impl Storage {
    /// Build a `Storage` backed by `SQLite`.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if connection or migrations cannot be
    /// completed.
    pub async fn sqlite(database_url: &str) -> Result<Self, SqliteInitError> {
        let repo = SqliteRepository::connect(database_url).await?;
        repo.migrate().await?;
        Ok(Self::from_repository(repo))
    }

    /// Build a `Storage` over a database file, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the file cannot be prepared or migrated.
    pub async fn sqlite_file(path: &Path) -> Result<Self, SqliteInitError> {
        let repo = SqliteRepository::open(path).await?;
        repo.migrate().await?;
        Ok(Self::from_repository(repo))
    }
}
