//! Data source registry.
//!
//! Maps data source names to entries. A name is either *declared* (configured
//! at startup, pool not built yet) or *materialized* (pool built, handles
//! cached). Declared sources materialize on first use.
//!
//! # Concurrency Safety
//!
//! - Each name owns an `Arc<SourceSlot>` whose `OnceCell` holds the entry, so
//!   concurrent first uses of a declared source build one pool
//! - `register` claims the name under the write lock before building, then
//!   builds through the slot's `OnceCell` without holding the map lock; racing
//!   registrations see the claim and never build a pool of their own
//! - A failed build releases the claim so the name can be registered again
//! - Entries are published fully built: readers see either nothing or a usable
//!   entry
//! - Operations on different names never wait on each other's construction

use crate::db::handle::BoundHandle;
use crate::db::helper::DynamicHandle;
use crate::db::source::DataSourceEntry;
use crate::error::{KvError, KvResult};
use crate::models::{ConnectionConfig, DataSourceSummary, DbIndex, validate_source_name};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};

/// What `register`/`declare` do when the name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail with `DuplicateRegistration`.
    #[default]
    Reject,
    /// Keep the existing source and hand it back; the new configuration is discarded.
    KeepExisting,
}

struct SourceSlot {
    config: ConnectionConfig,
    entry: OnceCell<Arc<DataSourceEntry>>,
}

impl SourceSlot {
    fn declared(config: ConnectionConfig) -> Self {
        Self {
            config,
            entry: OnceCell::new(),
        }
    }
}

/// Registry of named data sources, shared by every client.
pub struct DataSourceRegistry {
    sources: RwLock<HashMap<String, Arc<SourceSlot>>>,
    policy: DuplicatePolicy,
}

impl Default for DataSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceRegistry")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DataSourceRegistry {
    /// Create an empty registry that rejects duplicate names.
    pub fn new() -> Self {
        Self::with_policy(DuplicatePolicy::default())
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Record a configured source without building its pool.
    pub async fn declare(&self, name: &str, config: ConnectionConfig) -> KvResult<()> {
        validate_source_name(name)?;
        config.validate()?;

        let mut sources = self.sources.write().await;
        if sources.contains_key(name) {
            return match self.policy {
                DuplicatePolicy::Reject => Err(KvError::duplicate_registration(name)),
                DuplicatePolicy::KeepExisting => {
                    warn!(source = %name, "Data source already known, ignoring declaration");
                    Ok(())
                }
            };
        }

        info!(source = %name, url = %config.masked_url(), "Declared data source");
        sources.insert(name.to_string(), Arc::new(SourceSlot::declared(config)));
        Ok(())
    }

    /// Build a pool for `config` and publish it under `name`.
    ///
    /// Once this returns, [`resolve`](Self::resolve) and every handle lookup
    /// for `name` succeed.
    pub async fn register(
        &self,
        name: &str,
        config: ConnectionConfig,
    ) -> KvResult<Arc<DataSourceEntry>> {
        validate_source_name(name)?;
        config.validate()?;

        // Claim the name before any async work
        let (slot, claimed) = {
            let mut sources = self.sources.write().await;
            match sources.get(name) {
                Some(slot) => (Arc::clone(slot), false),
                None => {
                    let slot = Arc::new(SourceSlot::declared(config));
                    sources.insert(name.to_string(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        }; // Lock released here

        if !claimed {
            return self.on_duplicate(name, slot).await;
        }

        info!(
            source = %name,
            url = %slot.config.masked_url(),
            cluster_mode = slot.config.cluster_mode,
            "Registering data source"
        );
        match Self::materialize(name, &slot).await {
            Ok(entry) => {
                info!(source = %name, "Registered data source");
                Ok(entry)
            }
            Err(e) => {
                warn!(source = %name, error = %e, "Registration failed, releasing name");
                let mut sources = self.sources.write().await;
                if sources
                    .get(name)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot) && !slot.entry.initialized())
                {
                    sources.remove(name);
                }
                Err(e)
            }
        }
    }

    async fn on_duplicate(
        &self,
        name: &str,
        slot: Arc<SourceSlot>,
    ) -> KvResult<Arc<DataSourceEntry>> {
        match self.policy {
            DuplicatePolicy::Reject => Err(KvError::duplicate_registration(name)),
            DuplicatePolicy::KeepExisting => {
                warn!(source = %name, "Data source already registered, keeping existing");
                let entry = Self::materialize(name, &slot).await?;

                // A failed registration may have released the name meanwhile
                let current = {
                    let mut sources = self.sources.write().await;
                    Arc::clone(
                        sources
                            .entry(name.to_string())
                            .or_insert_with(|| Arc::clone(&slot)),
                    )
                };
                if Arc::ptr_eq(&current, &slot) {
                    Ok(entry)
                } else {
                    Self::materialize(name, &current).await
                }
            }
        }
    }

    async fn materialize(name: &str, slot: &SourceSlot) -> KvResult<Arc<DataSourceEntry>> {
        let entry = slot
            .entry
            .get_or_try_init(|| async {
                info!(source = %name, url = %slot.config.masked_url(), "Materializing data source");
                DataSourceEntry::build(name, &slot.config).await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(entry))
    }

    async fn slot(&self, name: &str) -> KvResult<Arc<SourceSlot>> {
        let sources = self.sources.read().await;
        match sources.get(name) {
            Some(slot) => Ok(Arc::clone(slot)),
            None => Err(self.not_found(name, &sources)),
        }
    }

    fn not_found(&self, name: &str, sources: &HashMap<String, Arc<SourceSlot>>) -> KvError {
        if sources.is_empty() {
            return KvError::data_source_not_found(name, "No data sources are registered");
        }
        let mut known: Vec<&str> = sources.keys().map(String::as_str).collect();
        known.sort_unstable();
        KvError::data_source_not_found(
            name,
            format!("Registered data sources: {}", known.join(", ")),
        )
    }

    /// Look up a materialized entry without side effects.
    ///
    /// Declared sources whose pool has not been built yet are reported as not
    /// found; use [`entry`](Self::entry) to build them on demand.
    pub async fn resolve(&self, name: &str) -> KvResult<Arc<DataSourceEntry>> {
        let slot = self.slot(name).await?;
        match slot.entry.get() {
            Some(entry) => Ok(Arc::clone(entry)),
            None => Err(KvError::data_source_not_found(
                name,
                "The data source is declared but has not been used yet",
            )),
        }
    }

    /// Get the entry for `name`, building a declared source's pool on first use.
    pub async fn entry(&self, name: &str) -> KvResult<Arc<DataSourceEntry>> {
        let slot = self.slot(name).await?;
        Self::materialize(name, &slot).await
    }

    /// Get the cached handle for `(name, database)`, creating what is missing.
    ///
    /// `None` selects the source's default database.
    pub async fn get_or_create_handle(
        &self,
        name: &str,
        database: Option<DbIndex>,
    ) -> KvResult<BoundHandle> {
        let entry = self.entry(name).await?;
        match database {
            Some(index) => entry.handle(index).await,
            None => entry.default_handle().await,
        }
    }

    /// Scope-aware handle for `name`.
    pub async fn helper(&self, name: &str) -> KvResult<DynamicHandle> {
        Ok(DynamicHandle::new(self.entry(name).await?))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.sources.read().await.contains_key(name)
    }

    /// Declared and materialized names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let sources = self.sources.read().await;
        let mut names: Vec<String> = sources.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub async fn len(&self) -> usize {
        self.sources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sources.read().await.is_empty()
    }

    /// Describe every source, sorted by name.
    pub async fn summaries(&self) -> Vec<DataSourceSummary> {
        // Snapshot under the lock, describe outside it
        let mut slots: Vec<(String, Arc<SourceSlot>)> = {
            let sources = self.sources.read().await;
            sources
                .iter()
                .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
                .collect()
        };
        slots.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let mut summaries = Vec::with_capacity(slots.len());
        for (name, slot) in slots {
            let summary = match slot.entry.get() {
                Some(entry) => entry.summary().await,
                None => DataSourceSummary {
                    name,
                    backend: slot.config.backend,
                    url: slot.config.masked_url(),
                    default_database: slot.config.default_database,
                    cluster_mode: slot.config.cluster_mode,
                    dynamic_database: slot.config.dynamic_database,
                    materialized: false,
                    cached_databases: Vec::new(),
                    registered_at: None,
                },
            };
            summaries.push(summary);
        }
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let registry = DataSourceRegistry::new();
        let err = registry.resolve("source3").await.unwrap_err();
        assert!(matches!(err, KvError::DataSourceNotFound { .. }));
        assert!(matches!(
            registry.get_or_create_handle("source3", None).await,
            Err(KvError::DataSourceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_not_found_hint_lists_known_sources() {
        let registry = DataSourceRegistry::new();
        registry
            .register("source1", ConnectionConfig::memory("one"))
            .await
            .unwrap();
        let err = registry.resolve("nope").await.unwrap_err();
        assert!(err.suggestion().unwrap().contains("source1"));
    }

    #[tokio::test]
    async fn test_register_then_resolve() {
        let registry = DataSourceRegistry::new();
        let entry = registry
            .register("source1", ConnectionConfig::memory("one"))
            .await
            .unwrap();
        let resolved = registry.resolve("source1").await.unwrap();
        assert!(Arc::ptr_eq(&entry, &resolved));
        assert!(registry.contains("source1").await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_input() {
        let registry = DataSourceRegistry::new();
        assert!(matches!(
            registry.register("", ConnectionConfig::memory("x")).await,
            Err(KvError::Configuration { .. })
        ));
        assert!(matches!(
            registry
                .register("bad", ConnectionConfig::redis("localhost", 0))
                .await,
            Err(KvError::Configuration { .. })
        ));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_rejected_by_default() {
        let registry = DataSourceRegistry::new();
        registry
            .register("source1", ConnectionConfig::memory("one"))
            .await
            .unwrap();
        let err = registry
            .register("source1", ConnectionConfig::memory("two"))
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::DuplicateRegistration { .. }));
        assert_eq!(registry.resolve("source1").await.unwrap().config().host, "one");
    }

    #[tokio::test]
    async fn test_duplicate_keep_existing_returns_original() {
        let registry = DataSourceRegistry::with_policy(DuplicatePolicy::KeepExisting);
        let first = registry
            .register("source1", ConnectionConfig::memory("one"))
            .await
            .unwrap();
        let second = registry
            .register("source1", ConnectionConfig::memory("two"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().host, "one");
    }

    #[tokio::test]
    async fn test_declared_source_materializes_on_first_use() {
        let registry = DataSourceRegistry::new();
        registry
            .declare("lazy", ConnectionConfig::memory("lazy"))
            .await
            .unwrap();
        assert!(registry.contains("lazy").await);
        assert!(matches!(
            registry.resolve("lazy").await,
            Err(KvError::DataSourceNotFound { .. })
        ));
        assert!(!registry.summaries().await[0].materialized);

        let handle = registry.get_or_create_handle("lazy", Some(4)).await.unwrap();
        assert_eq!(handle.database(), 4);
        assert!(registry.resolve("lazy").await.is_ok());

        let summary = &registry.summaries().await[0];
        assert!(summary.materialized);
        assert_eq!(summary.cached_databases, vec![4]);
    }

    #[tokio::test]
    async fn test_declare_duplicate_follows_policy() {
        let registry = DataSourceRegistry::new();
        registry.declare("a", ConnectionConfig::memory("a")).await.unwrap();
        assert!(matches!(
            registry.declare("a", ConnectionConfig::memory("b")).await,
            Err(KvError::DuplicateRegistration { .. })
        ));
        assert!(matches!(
            registry.register("a", ConnectionConfig::memory("b")).await,
            Err(KvError::DuplicateRegistration { .. })
        ));
    }

    #[tokio::test]
    async fn test_names_are_sorted() {
        let registry = DataSourceRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.declare(name, ConnectionConfig::memory(name)).await.unwrap();
        }
        assert_eq!(registry.names().await, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_has_one_winner() {
        let registry = Arc::new(DataSourceRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry
                    .register("contended", ConnectionConfig::memory(format!("m{}", i)))
                    .await
            }));
        }

        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert!(matches!(e, KvError::DuplicateRegistration { .. })),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.len().await, 1);
    }

    /// Accept TCP connections without ever answering, counting them.
    fn silent_listener() -> (u16, Arc<AtomicUsize>) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        std::thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });
        (port, accepted)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_builds_one_pool() {
        let (port, accepted) = silent_listener();
        let registry = Arc::new(DataSourceRegistry::new());
        let barrier = Arc::new(Barrier::new(8));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            tasks.push(tokio::spawn(async move {
                let config = ConnectionConfig::redis("127.0.0.1", port).with_pool_options(
                    PoolOptions {
                        connect_eagerly: Some(true),
                        min_connections: Some(1),
                        connect_timeout_secs: Some(1),
                        acquire_timeout_secs: Some(1),
                        ..Default::default()
                    },
                );
                barrier.wait().await;
                registry.register("contended", config).await
            }));
        }

        let mut duplicates = 0;
        let mut failed_builds = 0;
        for task in tasks {
            match task.await.unwrap() {
                Err(KvError::DuplicateRegistration { .. }) => duplicates += 1,
                Err(_) => failed_builds += 1,
                Ok(_) => panic!("server never answers, registration cannot succeed"),
            }
        }

        assert_eq!(duplicates, 7);
        assert_eq!(failed_builds, 1);
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        // The failed build released its claim
        assert!(!registry.contains("contended").await);
        registry
            .register("contended", ConnectionConfig::memory("retry"))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_keep_existing_shares_one_entry() {
        let registry = Arc::new(DataSourceRegistry::with_policy(DuplicatePolicy::KeepExisting));
        let mut tasks = Vec::new();
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry
                    .register("contended", ConnectionConfig::memory(format!("m{}", i)))
                    .await
                    .unwrap()
            }));
        }

        let mut entries = Vec::new();
        for task in tasks {
            entries.push(task.await.unwrap());
        }
        assert!(entries.iter().all(|e| Arc::ptr_eq(e, &entries[0])));
        let resolved = registry.resolve("contended").await.unwrap();
        assert!(Arc::ptr_eq(&resolved, &entries[0]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_shares_entry_and_handle() {
        let registry = Arc::new(DataSourceRegistry::new());
        registry
            .declare("shared", ConnectionConfig::memory("shared"))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.get_or_create_handle("shared", Some(2)).await.unwrap()
            }));
        }
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }
        assert!(handles.iter().all(|h| h.same(&handles[0])));
    }
}
