//! Materialized data sources and their database-scoped handle cache.
//!
//! # Concurrency Safety
//!
//! - The handle map is guarded by a `tokio::sync::RwLock`; lookups take the
//!   read lock and only a miss upgrades to the write lock, with a re-check
//! - Each database index owns an `Arc<OnceCell<BoundHandle>>`, so concurrent
//!   first requests for the same index build exactly one handle
//! - No lock is held while a handle is being built
//! - A failed build leaves the cell empty and the next caller retries

use crate::db::handle::BoundHandle;
use crate::db::pool::ConnectionPool;
use crate::error::{KvError, KvResult};
use crate::models::{ConnectionConfig, DataSourceSummary, DbIndex};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

/// A registered data source with a built pool.
///
/// Handles are cached per database index for the lifetime of the entry and
/// never evicted.
pub struct DataSourceEntry {
    name: String,
    pool: ConnectionPool,
    handles: RwLock<HashMap<DbIndex, Arc<OnceCell<BoundHandle>>>>,
    registered_at: DateTime<Utc>,
}

impl std::fmt::Debug for DataSourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceEntry")
            .field("name", &self.name)
            .field("pool", &self.pool)
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

impl DataSourceEntry {
    pub(crate) fn new(name: impl Into<String>, pool: ConnectionPool) -> Self {
        Self {
            name: name.into(),
            pool,
            handles: RwLock::new(HashMap::new()),
            registered_at: Utc::now(),
        }
    }

    /// Build the pool for `config` and wrap it in a fresh entry.
    pub(crate) async fn build(name: &str, config: &ConnectionConfig) -> KvResult<Self> {
        let pool = ConnectionPool::build(config).await?;
        Ok(Self::new(name, pool))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.pool.config()
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Handle bound to the source's default database.
    pub async fn default_handle(&self) -> KvResult<BoundHandle> {
        self.handle(self.config().default_database).await
    }

    /// Get or create the handle for `database`.
    ///
    /// Every call for the same index returns the same instance. Indices the
    /// source cannot serve fail with `UnsupportedOperation` before anything is
    /// cached.
    pub async fn handle(&self, database: DbIndex) -> KvResult<BoundHandle> {
        let config = self.config();
        if !config.allows_database(database) {
            return Err(KvError::unsupported(
                format!("select database {} on '{}'", database, self.name),
                config.database_restriction(),
            ));
        }

        let cell = {
            let handles = self.handles.read().await;
            if let Some(cell) = handles.get(&database) {
                Arc::clone(cell)
            } else {
                drop(handles);
                let mut handles = self.handles.write().await;
                // Another task may have inserted while we waited for the write lock
                Arc::clone(
                    handles
                        .entry(database)
                        .or_insert_with(|| Arc::new(OnceCell::new())),
                )
            }
        };

        let handle = cell
            .get_or_try_init(|| async {
                debug!(source = %self.name, database = database, "Creating database handle");
                self.pool.bind(&self.name, database)
            })
            .await?;

        Ok(handle.clone())
    }

    /// Indices that currently have a cached handle, ascending.
    pub async fn cached_databases(&self) -> Vec<DbIndex> {
        let handles = self.handles.read().await;
        let mut indices: Vec<DbIndex> = handles
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(index, _)| *index)
            .collect();
        indices.sort_unstable();
        indices
    }

    pub async fn summary(&self) -> DataSourceSummary {
        let config = self.config();
        DataSourceSummary {
            name: self.name.clone(),
            backend: config.backend,
            url: config.masked_url(),
            default_database: config.default_database,
            cluster_mode: config.cluster_mode,
            dynamic_database: config.dynamic_database,
            materialized: true,
            cached_databases: self.cached_databases().await,
            registered_at: Some(self.registered_at),
        }
    }
}
