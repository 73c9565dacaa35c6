//! Server Configuration
//!
//! The server reads a TOML file like this one:
//!
//! ```toml
//! network = "unix"
//! addr = "/run/thumbnailer.sock"
//! max_size = 1048576
//! num_workers = 4
//! temp_dir = "/var/spool/thumbnailer"
//!
//! # Optional tuning
//! queue_capacity = 2
//! response_queue_capacity = 2
//! keep_alive = true
//! idle_timeout_ms = 60000
//! # receive_timeout_ms = 5000
//! # write_timeout_ms = 5000
//! convert_program = "convert"
//! convert_timeout_ms = 4000
//! ```
//!
//! The keys `Network`, `Addr`, `MaxSize`, `NumWorkers` and `TempDir` are
//! accepted as well. Invalid or missing settings are a startup error.

use crate::handler::ConvertConfig;
use crate::net::{Endpoint, Network};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default Dispatch Queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 2;

/// Default idle time before a kept-alive connection is closed
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;

/// Errors while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_keep_alive() -> bool {
    true
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}

fn default_convert_program() -> String {
    crate::handler::convert::DEFAULT_PROGRAM.to_string()
}

fn default_convert_timeout_ms() -> u64 {
    crate::handler::convert::DEFAULT_TIMEOUT.as_millis() as u64
}

/// Configuration of a [`Server`](crate::Server).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Network to listen on
    #[serde(alias = "Network")]
    pub network: Network,

    /// Address to listen on (`host:port` or a socket path)
    #[serde(alias = "Addr")]
    pub addr: String,

    /// Maximum accepted payload size in bytes
    #[serde(alias = "MaxSize")]
    pub max_size: u32,

    /// Number of worker tasks
    #[serde(alias = "NumWorkers")]
    pub num_workers: usize,

    /// Spool directory for uploads
    #[serde(alias = "TempDir")]
    pub temp_dir: PathBuf,

    /// Capacity of the Dispatch Queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of the Response Writer's queue
    #[serde(default = "default_queue_capacity")]
    pub response_queue_capacity: usize,

    /// Keep connections open for further requests after a response
    #[serde(default = "default_keep_alive")]
    pub keep_alive: bool,

    /// How long a kept-alive connection may sit idle
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Upper bound for receiving one request; unset means no bound
    #[serde(default)]
    pub receive_timeout_ms: Option<u64>,

    /// Upper bound for writing one response; unset means no bound
    #[serde(default)]
    pub write_timeout_ms: Option<u64>,

    /// Conversion program used by the default handler
    #[serde(default = "default_convert_program")]
    pub convert_program: String,

    /// Timeout of the default handler
    #[serde(default = "default_convert_timeout_ms")]
    pub convert_timeout_ms: u64,
}

impl ServerConfig {
    /// Creates a configuration with default tuning.
    pub fn new(
        network: Network,
        addr: impl Into<String>,
        max_size: u32,
        num_workers: usize,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            network,
            addr: addr.into(),
            max_size,
            num_workers,
            temp_dir: temp_dir.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            response_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            keep_alive: true,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            receive_timeout_ms: None,
            write_timeout_ms: None,
            convert_program: default_convert_program(),
            convert_timeout_ms: default_convert_timeout_ms(),
        }
    }

    /// Loads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings that would make the server unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.is_empty() {
            return Err(ConfigError::Invalid("addr must not be empty".into()));
        }
        if self.max_size == 0 {
            return Err(ConfigError::Invalid("max_size must be positive".into()));
        }
        if self.num_workers == 0 {
            return Err(ConfigError::Invalid("num_workers must be positive".into()));
        }
        if self.queue_capacity == 0 || self.response_queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacities must be positive".into()));
        }
        if !self.temp_dir.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "temp_dir {} is not a directory",
                self.temp_dir.display()
            )));
        }
        Ok(())
    }

    /// The endpoint to listen on.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.network, self.addr.clone())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    /// Settings for the default [`ConvertHandler`](crate::handler::ConvertHandler).
    pub fn convert_config(&self) -> ConvertConfig {
        ConvertConfig {
            program: self.convert_program.clone(),
            timeout: Duration::from_millis(self.convert_timeout_ms),
            ..ConvertConfig::default()
        }
    }
}
