//! Configuration handling for the multi-source access layer.
//!
//! This module provides configuration management via CLI arguments, environment
//! variables and an optional JSON sources file.

use crate::error::{KvError, KvResult};
use crate::models::{
    BackendKind, ConnectionConfig, DEFAULT_REDIS_PORT, DEFAULT_SOURCE, DbIndex,
    check_default_alias, validate_source_name,
};
use clap::{Parser, Subcommand};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Connection pool configuration options parsed from a data source URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Maximum connections per database pool (default: 8)
    pub max_connections: Option<u32>,
    /// Connections opened up front when `connect_eagerly` is set (default: 0)
    pub min_connections: Option<u32>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Timeout for establishing a new connection in seconds (default: 10)
    pub connect_timeout_secs: Option<u64>,
    /// Verify connectivity when the data source is built (default: false)
    pub connect_eagerly: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value.
    pub fn max_connections_or_default(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    /// Get connect_timeout with default value.
    pub fn connect_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }

    /// Get connect_eagerly with default value.
    pub fn connect_eagerly_or_default(&self) -> bool {
        self.connect_eagerly.unwrap_or(false)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        let min = self.min_connections_or_default();
        let max = self.max_connections_or_default();
        if min > max {
            return Err(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                min, max
            ));
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        if self.connect_timeout_secs == Some(0) {
            return Err("connect_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Data source configuration parsed from a CLI argument.
#[derive(Debug, Clone)]
pub struct DataSourceConfig {
    /// Data source name. From "name=url" format, or "default".
    pub name: String,
    pub connection: ConnectionConfig,
}

impl DataSourceConfig {
    /// Option keys that we extract from URL query parameters.
    const OPTION_KEYS: &'static [&'static str] = &[
        "cluster",
        "dynamic_database",
        "max_connections",
        "min_connections",
        "acquire_timeout",
        "connect_timeout",
        "connect_eagerly",
    ];

    /// Parse a data source config from a CLI argument.
    ///
    /// # Format
    ///
    /// - `url` - registers the source under the name `default`
    /// - `name=url` - named source
    ///
    /// # Examples
    ///
    /// ```text
    /// redis://localhost:6379                                # default source, db 0
    /// source1=redis://:WenPan%40123@cache:6379/10           # password-only auth, db 10
    /// source2=redis://node1:7000?cluster=true               # cluster mode
    /// orders=redis://app:pw@host/3?dynamic_database=false   # pinned to db 3
    /// scratch=memory://local/1                              # in-process store
    /// ```
    pub fn parse(s: &str) -> KvResult<Self> {
        // Split name=url format (only if '=' before '://')
        let scheme_pos = s.find("://").unwrap_or(s.len());
        let (explicit_name, url_str) = match s[..scheme_pos].find('=') {
            Some(idx) => (Some(s[..idx].trim()), &s[idx + 1..]),
            None => (None, s),
        };

        let name = explicit_name.unwrap_or(DEFAULT_SOURCE).to_string();
        validate_source_name(&name)?;

        let connection = Self::parse_url(url_str)?;
        Ok(Self { name, connection })
    }

    /// Parse a connection URL into a [`ConnectionConfig`].
    pub fn parse_url(url_str: &str) -> KvResult<ConnectionConfig> {
        let url = Url::parse(url_str)
            .map_err(|e| KvError::configuration(format!("Invalid URL: {e}")))?;

        let backend = BackendKind::from_scheme(url.scheme()).ok_or_else(|| {
            KvError::configuration(format!(
                "Unsupported scheme '{}': expected redis:// or memory://",
                url.scheme()
            ))
        })?;

        let tls = url.scheme().eq_ignore_ascii_case("rediss");

        let mut opts = Self::extract_options(&url);
        Self::reject_unknown(&opts)?;
        let cluster_mode = Self::parse_bool(&mut opts, "cluster")?.unwrap_or(false);
        let dynamic_database = Self::parse_bool(&mut opts, "dynamic_database")?.unwrap_or(true);
        let pool_options = Self::parse_pool_options(&mut opts)?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| KvError::configuration("URL is missing a host"))?;

        let port = match backend {
            BackendKind::Redis => url.port().unwrap_or(DEFAULT_REDIS_PORT),
            BackendKind::Memory => url.port().unwrap_or(0),
        };

        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(Self::decode);
        let password = url.password().map(Self::decode);

        let default_database = Self::db_index(&url)?.unwrap_or(0);

        let config = ConnectionConfig {
            backend,
            host,
            port,
            username,
            password,
            default_database,
            tls,
            cluster_mode,
            dynamic_database,
            pool_options,
        };
        config.validate()?;
        Ok(config)
    }

    /// Percent-decode a URL userinfo component.
    fn decode(raw: &str) -> String {
        percent_decode_str(raw).decode_utf8_lossy().into_owned()
    }

    fn parse_bool(opts: &mut HashMap<String, String>, key: &str) -> KvResult<Option<bool>> {
        match opts.remove(key) {
            None => Ok(None),
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(Some(true)),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(Some(false)),
            Some(v) => Err(KvError::configuration(format!(
                "{} must be true or false, got '{}'",
                key, v
            ))),
        }
    }

    fn parse_number<T: std::str::FromStr>(
        opts: &mut HashMap<String, String>,
        key: &str,
    ) -> KvResult<Option<T>> {
        match opts.remove(key) {
            None => Ok(None),
            Some(v) => v.parse().map(Some).map_err(|_| {
                KvError::configuration(format!("{} must be a number, got '{}'", key, v))
            }),
        }
    }

    /// Parse pool options from extracted URL query parameters.
    fn parse_pool_options(opts: &mut HashMap<String, String>) -> KvResult<PoolOptions> {
        Ok(PoolOptions {
            max_connections: Self::parse_number(opts, "max_connections")?,
            min_connections: Self::parse_number(opts, "min_connections")?,
            acquire_timeout_secs: Self::parse_number(opts, "acquire_timeout")?,
            connect_timeout_secs: Self::parse_number(opts, "connect_timeout")?,
            connect_eagerly: Self::parse_bool(opts, "connect_eagerly")?,
        })
    }

    /// Extract options from URL query params, keyed by lower-cased name.
    fn extract_options(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.into_owned()))
            .collect()
    }

    /// Reject unknown query parameters so typos do not fall back to defaults.
    fn reject_unknown(opts: &HashMap<String, String>) -> KvResult<()> {
        let mut unknown: Vec<&str> = opts
            .keys()
            .map(String::as_str)
            .filter(|k| !Self::OPTION_KEYS.contains(k))
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        unknown.sort_unstable();
        Err(KvError::configuration(format!(
            "Unknown URL option(s): {}",
            unknown.join(", ")
        )))
    }

    fn db_index(url: &Url) -> KvResult<Option<DbIndex>> {
        let segment = url.path().trim_matches('/');
        if segment.is_empty() {
            return Ok(None);
        }
        segment.parse().map(Some).map_err(|_| {
            KvError::configuration(format!(
                "database in URL path must be a non-negative integer, got '{}'",
                segment
            ))
        })
    }
}

/// JSON sources file.
///
/// ```json
/// {
///   "default_source": "primary",
///   "sources": {
///     "primary": { "host": "localhost", "port": 6379 },
///     "source2": { "host": "node1", "port": 7000, "cluster_mode": true }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesFile {
    #[serde(default)]
    pub default_source: Option<String>,
    #[serde(default)]
    pub sources: BTreeMap<String, ConnectionConfig>,
}

impl SourcesFile {
    /// Load and validate a sources file.
    pub fn load(path: &Path) -> KvResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            KvError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> KvResult<Self> {
        let file: SourcesFile = serde_json::from_str(contents)
            .map_err(|e| KvError::configuration(format!("Invalid sources file: {}", e)))?;
        for (name, config) in &file.sources {
            validate_source_name(name)?;
            config.validate()?;
        }
        Ok(file)
    }

    /// Convert into data source configs, preserving name order.
    pub fn into_data_sources(self) -> Vec<DataSourceConfig> {
        self.sources
            .into_iter()
            .map(|(name, connection)| DataSourceConfig { name, connection })
            .collect()
    }
}

/// Command run by the binary.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List configured data sources
    Sources,
    /// PING a data source
    Ping(Target),
    /// Read a string value
    Get {
        #[command(flatten)]
        target: Target,
        key: String,
    },
    /// Write a string value
    Set {
        #[command(flatten)]
        target: Target,
        key: String,
        value: String,
        /// Expire after this many seconds
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Delete a key
    Del {
        #[command(flatten)]
        target: Target,
        key: String,
    },
}

/// Data source and database selection shared by commands.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct Target {
    /// Data source name (defaults to the default source)
    #[arg(short, long)]
    pub source: Option<String>,
    /// Database index (defaults to the source's default database)
    #[arg(long)]
    pub db: Option<DbIndex>,
}

/// Configuration for the kv-multisource binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "kv-multisource",
    about = "Address several Redis data sources and their logical databases through one client",
    version,
    author
)]
pub struct Config {
    /// Data sources.
    /// Format: "url" or "name=url", e.g. source1=redis://:pass@host:6379/1
    /// Can be specified multiple times for multiple sources.
    #[arg(
        short = 'S',
        long = "source-url",
        value_name = "URL",
        env = "KV_SOURCE",
        value_delimiter = ','
    )]
    pub sources: Vec<String>,

    /// JSON file with additional data sources
    #[arg(long, value_name = "PATH", env = "KV_SOURCES_FILE")]
    pub sources_file: Option<PathBuf>,

    /// Name of the source used when a caller does not pick one
    #[arg(long, default_value = DEFAULT_SOURCE, env = "KV_DEFAULT_SOURCE")]
    pub default_source: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "KV_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "KV_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            sources: Vec::new(),
            sources_file: None,
            default_source: DEFAULT_SOURCE.to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            command: None,
        }
    }

    /// Parse all data source configurations, CLI entries first.
    ///
    /// The sources file may also name the default source; the CLI value wins
    /// unless it was left at `default`.
    pub fn parse_sources(&self) -> KvResult<(String, Vec<DataSourceConfig>)> {
        let mut parsed: Vec<DataSourceConfig> = self
            .sources
            .iter()
            .map(|s| DataSourceConfig::parse(s))
            .collect::<KvResult<_>>()?;

        let mut default_source = self.default_source.clone();
        if let Some(path) = &self.sources_file {
            let file = SourcesFile::load(path)?;
            if default_source == DEFAULT_SOURCE {
                if let Some(name) = &file.default_source {
                    default_source = name.clone();
                }
            }
            parsed.extend(file.into_data_sources());
        }

        let mut seen = std::collections::HashSet::new();
        for source in &parsed {
            check_default_alias(&source.name, &default_source)?;
            if !seen.insert(source.name.as_str()) {
                return Err(KvError::duplicate_registration(&source.name));
            }
        }
        Ok((default_source, parsed))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
