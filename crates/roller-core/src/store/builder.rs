//! Builder for SQLite-backed plan stores.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::task;
use tokio_util::sync::CancellationToken;

use super::{PlanStore, SqliteConfigStore};
use crate::{
    config::{default_database_path, resolve_namespace, RetryPolicy},
    error::{Result, RollerError},
};

/// Builds a [`PlanStore`] over a SQLite database.
#[derive(Debug, Clone, Default)]
pub struct PlanStoreBuilder {
    database_path: Option<PathBuf>,
    namespace: Option<String>,
    policy: Option<RetryPolicy>,
    cancel: Option<CancellationToken>,
}

impl PlanStoreBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a custom database file path.
    ///
    /// If not specified, uses the XDG Base Directory specification:
    /// `$XDG_DATA_HOME/roller/roller.db` or `~/.local/share/roller/roller.db`
    pub fn with_database_path<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        if let Some(path) = path {
            self.database_path = Some(path.as_ref().to_path_buf());
        }
        self
    }

    /// Sets the namespace; falls back to `ROLLER_NAMESPACE`, then
    /// `kube-system`.
    pub fn with_namespace(mut self, namespace: Option<impl Into<String>>) -> Self {
        self.namespace = namespace.map(Into::into);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Opens the database and returns the configured store.
    ///
    /// # Errors
    ///
    /// Returns `RollerError::Configuration` if no default path can be
    /// resolved, `RollerError::FileSystem` if the database directory cannot
    /// be created and `RollerError::Storage` if initialization fails.
    pub async fn build(self) -> Result<PlanStore<SqliteConfigStore>> {
        let db_path = match self.database_path {
            Some(path) => path,
            None => default_database_path()?,
        };

        let backend = task::spawn_blocking(move || SqliteConfigStore::open(&db_path))
            .await
            .map_err(|e| RollerError::Configuration {
                message: format!("Task join error: {e}"),
            })??;

        let namespace = resolve_namespace(self.namespace.as_deref());
        let mut store = PlanStore::new(Arc::new(backend), namespace);
        if let Some(policy) = self.policy {
            store = store.with_policy(policy);
        }
        if let Some(cancel) = self.cancel {
            store = store.with_cancellation(cancel);
        }
        Ok(store)
    }
}
