//! Multi-datasource Redis access layer.
//!
//! Address any number of independently configured Redis instances ("data
//! sources") and their logical databases through one client. Data sources can
//! be registered while the process runs, handles are cached per
//! (source, database) pair, and task-scoped overrides cover code that cannot
//! pass the database explicitly.
//!
//! ```no_run
//! use kv_multisource::{ConnectionConfig, DataSourceRegistry, MultiSourceClient};
//! use std::sync::Arc;
//!
//! # async fn demo() -> kv_multisource::KvResult<()> {
//! let client = MultiSourceClient::with_registry(Arc::new(DataSourceRegistry::new()));
//! client
//!     .register_data_source("source1", ConnectionConfig::redis("localhost", 6379))
//!     .await?;
//! client.db1("source1").await?.set("k", "v").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use client::MultiSourceClient;
pub use config::{Config, PoolOptions};
pub use db::{
    BoundHandle, DataSourceEntry, DataSourceRegistry, DuplicatePolicy, DynamicHandle, run_scoped,
    run_scoped_on, run_scoped_on_sync, run_scoped_sync, with_scope,
};
pub use error::{KvError, KvResult};
pub use models::{ConnectionConfig, DbIndex};
