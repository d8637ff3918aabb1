//! Data source access layer.
//!
//! This module provides:
//! - Connection pool construction per data source
//! - The registry of named data sources
//! - Per-database handle caching
//! - Task-scoped database overrides and the handles that honor them
//! - An in-process backend for tests and local runs

#[macro_use]
mod macros;
pub mod handle;
pub mod helper;
pub mod memory;
pub mod pool;
pub mod registry;
pub mod scope;
pub mod source;

pub use handle::BoundHandle;
pub use helper::DynamicHandle;
pub use memory::{MemoryDb, MemoryStore};
pub use pool::ConnectionPool;
pub use registry::{DataSourceRegistry, DuplicatePolicy};
pub use scope::{
    ScopeKey, current_override, run_scoped, run_scoped_on, run_scoped_on_sync, run_scoped_sync,
    with_scope,
};
pub use source::DataSourceEntry;
