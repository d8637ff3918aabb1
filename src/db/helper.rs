//! Scope-aware handles.

use crate::db::handle::BoundHandle;
use crate::db::scope::{self, ScopeKey};
use crate::db::source::DataSourceEntry;
use crate::error::{KvError, KvResult};
use crate::models::DbIndex;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Handle whose target database follows the current scope.
///
/// Each command resolves the effective database when it is issued: the
/// override set for this data source, else the ambient override, else the
/// source's default database. The bound handles it delegates to come from the
/// source's handle cache.
#[derive(Clone)]
pub struct DynamicHandle {
    entry: Arc<DataSourceEntry>,
}

impl std::fmt::Debug for DynamicHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicHandle")
            .field("source", &self.entry.name())
            .field("current_database", &self.current_database())
            .finish()
    }
}

impl DynamicHandle {
    pub(crate) fn new(entry: Arc<DataSourceEntry>) -> Self {
        Self { entry }
    }

    pub fn source(&self) -> &str {
        self.entry.name()
    }

    pub fn entry(&self) -> &Arc<DataSourceEntry> {
        &self.entry
    }

    /// Database the next command will use.
    pub fn current_database(&self) -> DbIndex {
        scope::override_for(self.entry.name()).unwrap_or(self.entry.config().default_database)
    }

    /// Bound handle for the current database.
    pub async fn current(&self) -> KvResult<BoundHandle> {
        self.entry.handle(self.current_database()).await
    }

    /// Bound handle for an explicit database, ignoring any scope.
    pub async fn ops_db(&self, database: DbIndex) -> KvResult<BoundHandle> {
        self.entry.handle(database).await
    }

    /// Run `work` with `database` selected for this data source.
    pub async fn scoped<F, Fut>(&self, database: DbIndex, work: F) -> Fut::Output
    where
        F: FnOnce(DynamicHandle) -> Fut,
        Fut: Future,
    {
        scope::run_scoped_on(database, self, work).await
    }

    /// Select `database` for this data source until cleared or until the
    /// enclosing [`with_scope`](scope::with_scope) frame ends.
    ///
    /// Fails with `Scope` outside a frame and with `UnsupportedOperation` if
    /// the source cannot serve `database`.
    pub fn set_current_database(&self, database: DbIndex) -> KvResult<()> {
        let config = self.entry.config();
        if !config.allows_database(database) {
            return Err(KvError::unsupported(
                format!("select database {} on '{}'", database, self.source()),
                config.database_restriction(),
            ));
        }
        debug!(source = %self.source(), database = database, "Setting current database");
        scope::set_override(ScopeKey::Source(self.source().to_string()), database)
    }

    /// Drop this data source's override in the current frame.
    pub fn clear_current_database(&self) -> KvResult<()> {
        scope::clear_override(&ScopeKey::Source(self.source().to_string()))
    }

    pub async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.current().await?.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        self.current().await?.set(key, value).await
    }

    pub async fn del(&self, key: &str) -> KvResult<usize> {
        self.current().await?.del(key).await
    }

    pub async fn lpush(&self, key: &str, value: &str) -> KvResult<usize> {
        self.current().await?.lpush(key, value).await
    }

    pub async fn rpush(&self, key: &str, value: &str) -> KvResult<usize> {
        self.current().await?.rpush(key, value).await
    }

    pub async fn lpop(&self, key: &str) -> KvResult<Option<String>> {
        self.current().await?.lpop(key).await
    }

    pub async fn rpop(&self, key: &str) -> KvResult<Option<String>> {
        self.current().await?.rpop(key).await
    }
}
