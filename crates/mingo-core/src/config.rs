//! Context configuration

use crate::convert::DefaultConverter;
use crate::el::ElEngineType;
use mingo_common::{MingoError, Result};
use mongodb::options::{Acknowledgment, ClientOptions, WriteConcern};
use std::path::PathBuf;
use std::time::Duration;

/// Connection pool configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool (default: 0)
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool (default: 20)
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed (default: none)
    pub max_idle_time: Option<Duration>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: None,
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("mingo".to_string()),
        }
    }
}

impl PoolConfig {
    /// Set one option from a `<option name=".." value=".."/>` element.
    ///
    /// Durations are in milliseconds.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        fn millis(name: &str, value: &str) -> Result<Duration> {
            value
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| MingoError::Parse(format!("option '{}' expects milliseconds, got '{}'", name, value)))
        }
        fn size(name: &str, value: &str) -> Result<u32> {
            value
                .trim()
                .parse::<u32>()
                .map_err(|_| MingoError::Parse(format!("option '{}' expects a count, got '{}'", name, value)))
        }

        match name {
            "connectTimeout" => self.connect_timeout = Some(millis(name, value)?),
            "serverSelectionTimeout" => self.server_selection_timeout = Some(millis(name, value)?),
            "maxIdleTime" => self.max_idle_time = Some(millis(name, value)?),
            "minPoolSize" => self.min_pool_size = Some(size(name, value)?),
            "maxPoolSize" => self.max_pool_size = Some(size(name, value)?),
            "appName" => self.app_name = Some(value.to_string()),
            other => return Err(MingoError::Parse(format!("unsupported mongo option '{}'", other))),
        }
        Ok(())
    }

    /// Copy the configured values onto driver options
    pub fn apply(&self, options: &mut ClientOptions) {
        if let Some(min) = self.min_pool_size {
            options.min_pool_size = Some(min);
        }
        if let Some(max) = self.max_pool_size {
            options.max_pool_size = Some(max);
        }
        if let Some(idle) = self.max_idle_time {
            options.max_idle_time = Some(idle);
        }
        if let Some(connect) = self.connect_timeout {
            options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = self.server_selection_timeout {
            options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = &self.app_name {
            options.app_name = Some(app.clone());
        }
    }
}

/// Parse a write concern name: `acknowledged`, `unacknowledged`, `journaled`, `majority`,
/// `w<N>` or a plain node count. Case-insensitive.
pub fn parse_write_concern(name: &str) -> Result<WriteConcern> {
    let lowered = name.trim().to_ascii_lowercase();
    let mut concern = WriteConcern::default();
    match lowered.as_str() {
        "acknowledged" | "safe" => concern.w = Some(Acknowledgment::Nodes(1)),
        "unacknowledged" | "normal" => concern.w = Some(Acknowledgment::Nodes(0)),
        "journaled" | "journal_safe" => {
            concern.w = Some(Acknowledgment::Nodes(1));
            concern.journal = Some(true);
        }
        "majority" => concern.w = Some(Acknowledgment::Majority),
        other => {
            let count = other.strip_prefix('w').unwrap_or(other);
            let nodes = count
                .parse::<u32>()
                .map_err(|_| MingoError::Parse(format!("unknown write concern '{}'", name)))?;
            concern.w = Some(Acknowledgment::Nodes(nodes));
        }
    }
    Ok(concern)
}

/// MongoDB settings from the `<mongo>` element
#[derive(Debug, Clone)]
pub struct MongoConfig {
    host: String,
    port: u16,
    db_name: String,
    write_concern: Option<WriteConcern>,
    pool: PoolConfig,
}

impl MongoConfig {
    /// Validate and build the settings.
    ///
    /// # Errors
    /// `Validation` for a blank host or database name, or a zero port.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        db_name: impl Into<String>,
        write_concern: Option<WriteConcern>,
        pool: PoolConfig,
    ) -> Result<Self> {
        let host = host.into();
        let db_name = db_name.into();
        if host.trim().is_empty() {
            return Err(MingoError::Validation("mongo host must not be blank".to_string()));
        }
        if db_name.trim().is_empty() {
            return Err(MingoError::Validation("mongo dbName must not be blank".to_string()));
        }
        if port == 0 {
            return Err(MingoError::Validation("mongo port must be positive".to_string()));
        }
        Ok(Self {
            host,
            port,
            db_name,
            write_concern,
            pool,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    /// `mongodb://host:port/db`
    pub fn connection_string(&self) -> String {
        format!("mongodb://{}:{}/{}", self.host, self.port, self.db_name)
    }
}

/// Benchmark settings from `<config><benchmark .../></config>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkConfig {
    pub enabled: bool,
    /// Concurrent sink deliveries
    pub threads: usize,
    /// Pending metrics before new ones are dropped
    pub queue_size: usize,
}

impl BenchmarkConfig {
    pub const DEFAULT_THREADS: usize = 20;
    pub const DEFAULT_QUEUE_SIZE: usize = 1024;

    /// # Errors
    /// `Validation` when `threads` or `queue_size` is zero.
    pub fn new(enabled: bool, threads: usize, queue_size: usize) -> Result<Self> {
        if threads == 0 {
            return Err(MingoError::Validation("benchmark threads must be positive".to_string()));
        }
        if queue_size == 0 {
            return Err(MingoError::Validation("benchmark queueSize must be positive".to_string()));
        }
        Ok(Self {
            enabled,
            threads,
            queue_size,
        })
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threads: Self::DEFAULT_THREADS,
            queue_size: Self::DEFAULT_QUEUE_SIZE,
        }
    }
}

/// Parsed context document
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// The context file itself
    pub source: PathBuf,
    pub benchmark: BenchmarkConfig,
    /// Reload query sets when their files change
    pub watch: bool,
    /// `querySetConfig@dbName`
    pub query_set_db_name: Option<String>,
    /// Query-set files, resolved against the context file's directory
    pub query_sets: Vec<PathBuf>,
    pub engine: ElEngineType,
    pub mongo: MongoConfig,
    pub default_converter: Option<DefaultConverter>,
}
