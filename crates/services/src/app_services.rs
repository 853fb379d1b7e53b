use std::path::Path;
use std::sync::Arc;

use assess_core::model::{TestDefinition, TestId};
use storage::HttpStoreConfig;
use storage::repository::{AttemptAdmin, Storage, StorageError};
use tracing::{debug, info};

use crate::Clock;
use crate::config::EngineConfig;
use crate::error::{AppServicesError, SessionError};
use crate::sessions::SessionLoopService;

/// Assembles app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    session_loop: Arc<SessionLoopService>,
    admin: Arc<dyn AttemptAdmin>,
}

impl AppServices {
    /// Wire services to an already-built `Storage`.
    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock, config: EngineConfig) -> Self {
        let session_loop = Arc::new(
            SessionLoopService::new(
                clock,
                Arc::clone(&storage.progress),
                Arc::clone(&storage.results),
            )
            .with_config(config),
        );
        Self {
            session_loop,
            admin: Arc::clone(&storage.admin),
        }
    }

    /// Build services backed by the in-memory store.
    #[must_use]
    pub fn new_in_memory(clock: Clock, config: EngineConfig) -> Self {
        Self::from_storage(&Storage::in_memory(), clock, config)
    }

    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: EngineConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock, config))
    }

    /// Build services over a `SQLite` database file, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the file cannot be opened or migrated.
    pub async fn new_sqlite_file(
        path: &Path,
        clock: Clock,
        config: EngineConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite_file(path).await?;
        Ok(Self::from_storage(&storage, clock, config))
    }

    /// Build services that talk to the remote API.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the HTTP client cannot be built.
    pub fn new_http(
        http: HttpStoreConfig,
        clock: Clock,
        config: EngineConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::http(http)?;
        Ok(Self::from_storage(&storage, clock, config))
    }

    /// Register definitions the store has never seen.
    ///
    /// Tests the store already knows keep their stored limit, whatever the
    /// local definition says. Only local backends should be seeded this way;
    /// a remote store is configured by its operators.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the lookup or the registration fails.
    pub async fn ensure_registered(
        &self,
        username: &str,
        definitions: &[Arc<TestDefinition>],
    ) -> Result<(), AppServicesError> {
        for definition in definitions {
            match self.session_loop.status(username, definition.id()).await {
                Ok(_) => {
                    debug!(test_id = %definition.id(), "test already registered");
                }
                Err(SessionError::Storage(StorageError::NotFound)) => {
                    self.admin
                        .register_test(definition.id(), definition.max_attempts())
                        .await?;
                    info!(
                        test_id = %definition.id(),
                        max_attempts = definition.max_attempts(),
                        "test registered"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Set the attempt limits of `definitions`, replacing any stored limit.
    ///
    /// This is an operator action.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Storage` if registration fails.
    pub async fn register_definitions(
        &self,
        definitions: &[Arc<TestDefinition>],
    ) -> Result<(), AppServicesError> {
        for definition in definitions {
            self.admin
                .register_test(definition.id(), definition.max_attempts())
                .await?;
            info!(test_id = %definition.id(), title = definition.title(), "test registered");
        }
        Ok(())
    }

    /// Reset a user's used attempts (and any grants) to zero.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Storage` if the store rejects the call.
    pub async fn reset_attempts(
        &self,
        username: &str,
        test_id: TestId,
    ) -> Result<(), AppServicesError> {
        self.admin.reset_attempts(username, test_id).await?;
        info!(%username, %test_id, "attempts reset");
        Ok(())
    }

    /// Grant extra attempts; returns the user's new allowance.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Storage` if the store rejects the call.
    pub async fn grant_attempts(
        &self,
        username: &str,
        test_id: TestId,
        extra: u32,
    ) -> Result<u32, AppServicesError> {
        let allowance = self.admin.grant_attempts(username, test_id, extra).await?;
        info!(%username, %test_id, extra, allowance, "attempts granted");
        Ok(allowance)
    }

    #[must_use]
    pub fn session_loop(&self) -> Arc<SessionLoopService> {
        Arc::clone(&self.session_loop)
    }

    #[must_use]
    pub fn admin(&self) -> Arc<dyn AttemptAdmin> {
        Arc::clone(&self.admin)
    }
}
