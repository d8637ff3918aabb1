//! Multi-source client facade.
//!
//! The entry point for callers: turns a data source name (or the default) and
//! a database index (or the source's default) into a ready handle.

use crate::db::{BoundHandle, DataSourceEntry, DataSourceRegistry, DynamicHandle};
use crate::error::KvResult;
use crate::models::{
    ConnectionConfig, DEFAULT_SOURCE, DataSourceSummary, DbIndex, check_default_alias,
};
use std::sync::Arc;
use tracing::debug;

/// Generate fixed-index accessors that route through `handle_for_index`.
macro_rules! fixed_database_accessors {
    ($($method:ident => $index:literal),* $(,)?) => {
        $(
            #[doc = concat!("Handle for database ", stringify!($index), " of `name`.")]
            pub async fn $method(&self, name: &str) -> KvResult<BoundHandle> {
                self.handle_for_index(name, $index).await
            }
        )*
    };
}

/// Client over a shared [`DataSourceRegistry`].
///
/// Cheap to clone. The name `default` always refers to the configured default
/// source; any other unknown name fails with `DataSourceNotFound` and never
/// falls back to the default.
#[derive(Debug, Clone)]
pub struct MultiSourceClient {
    registry: Arc<DataSourceRegistry>,
    default_source: String,
}

impl MultiSourceClient {
    pub fn new(registry: Arc<DataSourceRegistry>, default_source: impl Into<String>) -> Self {
        Self {
            registry,
            default_source: default_source.into(),
        }
    }

    /// Client whose default source is the one named `default`.
    pub fn with_registry(registry: Arc<DataSourceRegistry>) -> Self {
        Self::new(registry, DEFAULT_SOURCE)
    }

    pub fn registry(&self) -> &Arc<DataSourceRegistry> {
        &self.registry
    }

    pub fn default_source(&self) -> &str {
        &self.default_source
    }

    fn source_name<'a>(&'a self, name: Option<&'a str>) -> &'a str {
        match name {
            None | Some(DEFAULT_SOURCE) => &self.default_source,
            Some(name) => name,
        }
    }

    /// Resolve `(name, database)` to a cached handle.
    ///
    /// `None` picks the default source or the source's default database.
    pub async fn handle_for(
        &self,
        name: Option<&str>,
        database: Option<DbIndex>,
    ) -> KvResult<BoundHandle> {
        let source = self.source_name(name);
        debug!(source = %source, database = ?database, "Resolving handle");
        self.registry.get_or_create_handle(source, database).await
    }

    pub async fn handle_for_default_db(&self, name: &str) -> KvResult<BoundHandle> {
        self.handle_for(Some(name), None).await
    }

    pub async fn handle_for_index(&self, name: &str, database: DbIndex) -> KvResult<BoundHandle> {
        self.handle_for(Some(name), Some(database)).await
    }

    fixed_database_accessors! {
        db0 => 0,
        db1 => 1,
        db2 => 2,
        db3 => 3,
        db4 => 4,
        db5 => 5,
        db6 => 6,
        db7 => 7,
        db8 => 8,
        db9 => 9,
        db10 => 10,
        db11 => 11,
        db12 => 12,
        db13 => 13,
        db14 => 14,
        db15 => 15,
    }

    /// Register a new data source at runtime.
    ///
    /// `default` may only be registered when it is also the configured default
    /// source name, since otherwise it is an alias.
    pub async fn register_data_source(
        &self,
        name: &str,
        config: ConnectionConfig,
    ) -> KvResult<Arc<DataSourceEntry>> {
        check_default_alias(name, &self.default_source)?;
        self.registry.register(name, config).await
    }

    /// Scope-aware handle for `name`.
    pub async fn helper(&self, name: &str) -> KvResult<DynamicHandle> {
        self.registry.helper(self.source_name(Some(name))).await
    }

    /// Scope-aware handle for the default source.
    pub async fn default_helper(&self) -> KvResult<DynamicHandle> {
        self.registry.helper(&self.default_source).await
    }

    pub async fn summaries(&self) -> Vec<DataSourceSummary> {
        self.registry.summaries().await
    }
}
