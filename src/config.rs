//! Run configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! whatever the binary applies from flags and environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::RetryPolicy;

/// Default node count above which the accumulator is flushed.
pub const DEFAULT_BATCH_THRESHOLD: usize = 25_000;
/// Default cap on input lines read per run.
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

/// Connection settings for the Neo4j backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neo4jConfig {
    /// Bolt URI.
    pub uri: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Target database.
    pub database: String,
    /// Connection pool size.
    pub max_connections: usize,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "neo4j://localhost:7687".into(),
            user: "neo4j".into(),
            password: "neo4j".into(),
            database: "neo4j".into(),
            max_connections: 4,
        }
    }
}

/// Everything one import run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportConfig {
    /// Newline-delimited JSON input.
    pub input: PathBuf,
    /// Maximum number of non-blank input lines to read.
    pub max_records: usize,
    /// Flush once the accumulated node count exceeds this.
    pub batch_threshold: usize,
    /// Add `REFERENCES` edges for `e`/`p` tags.
    pub link_references: bool,
    /// Create constraints and indexes before ingesting.
    pub bootstrap: bool,
    /// Store connection.
    pub neo4j: Neo4jConfig,
    /// Backoff for transient store failures.
    pub retry: RetryPolicy,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("export.json"),
            max_records: DEFAULT_MAX_RECORDS,
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            link_references: false,
            bootstrap: true,
            neo4j: Neo4jConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ImportConfig {
    /// Loads defaults overlaid with the config file.
    ///
    /// An explicit path must exist. Without one, the default location is used
    /// when present and silently skipped otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        match explicit {
            Some(path) => config.apply_file(path)?,
            None => {
                if let Some(path) = default_config_path().filter(|p| p.exists()) {
                    config.apply_file(&path)?;
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document over the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_toml(contents, Path::new("<inline>"))?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.apply_toml(&contents, path)
    }

    fn apply_toml(&mut self, contents: &str, origin: &Path) -> Result<(), ConfigError> {
        let raw: RawConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        if let Some(input) = raw.input {
            self.input = input;
        }
        if let Some(max_records) = raw.max_records {
            self.max_records = max_records;
        }
        if let Some(threshold) = raw.batch_threshold {
            self.batch_threshold = threshold;
        }
        if let Some(link) = raw.link_references {
            self.link_references = link;
        }
        if let Some(bootstrap) = raw.bootstrap {
            self.bootstrap = bootstrap;
        }
        let neo4j = raw.neo4j;
        if let Some(uri) = neo4j.uri {
            self.neo4j.uri = uri;
        }
        if let Some(user) = neo4j.user {
            self.neo4j.user = user;
        }
        if let Some(password) = neo4j.password {
            self.neo4j.password = password;
        }
        if let Some(database) = neo4j.database {
            self.neo4j.database = database;
        }
        if let Some(max_connections) = neo4j.max_connections {
            self.neo4j.max_connections = max_connections;
        }
        let retry = raw.retry;
        if let Some(max_attempts) = retry.max_attempts {
            self.retry.max_attempts = max_attempts;
        }
        if let Some(ms) = retry.base_delay_ms {
            self.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = retry.max_delay_ms {
            self.retry.max_delay = Duration::from_millis(ms);
        }
        Ok(())
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_threshold == 0 {
            return Err(ConfigError::invalid("batch_threshold", "must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.neo4j.max_connections == 0 {
            return Err(ConfigError::invalid("neo4j.max_connections", "must be at least 1"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    input: Option<PathBuf>,
    max_records: Option<usize>,
    batch_threshold: Option<usize>,
    link_references: Option<bool>,
    bootstrap: Option<bool>,
    #[serde(default)]
    neo4j: RawNeo4j,
    #[serde(default)]
    retry: RawRetry,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawNeo4j {
    uri: Option<String>,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
    max_connections: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawRetry {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

/// Failure to load or validate configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: &'static str) -> Self {
        ConfigError::Invalid { field, reason }
    }
}

/// `$CONFIG_DIR/nostr-graph/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("nostr-graph").join("config.toml"))
}
