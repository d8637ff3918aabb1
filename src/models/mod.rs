//! Data models for the multi-source access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;

// Re-export commonly used types
pub use connection::{
    BackendKind, ConnectionConfig, DEFAULT_REDIS_PORT, DEFAULT_SOURCE, DataSourceSummary, DbIndex,
    STANDARD_DATABASE_COUNT, check_default_alias, validate_source_name,
};
