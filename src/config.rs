//! Client configuration
//!
//! Values come from, lowest precedence first: built-in defaults, an
//! optional TOML file, then `PIPECACHE_*` environment variables
//! (`PIPECACHE_OP_TIMEOUT_MS=500`, `PIPECACHE_AUTH__USERNAME=app`,
//! `PIPECACHE_SERVERS=10.0.0.1:11211,10.0.0.2:11211`).

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// SASL PLAIN credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of every shard, in locator order
    pub servers: Vec<String>,

    /// Default wait for a future's `get`
    pub op_timeout_ms: u64,

    pub connect_timeout_ms: u64,

    /// Cap on the exponential reconnect backoff
    pub max_reconnect_delay_ms: u64,

    pub read_buffer_size: usize,

    pub write_buffer_size: usize,

    /// Bound on operations submitted but not yet picked up by the I/O task
    pub input_queue_capacity: usize,

    pub write_queue_capacity: usize,

    /// Coalesce consecutive gets / stores into pipelined batches
    pub optimize: bool,

    pub max_batch_keys: usize,

    pub max_batch_bytes: usize,

    /// Track a rolling timeout ratio per node
    pub timeout_ratio_window: bool,

    pub auth: Option<Credentials>,

    /// How long a submission waits for a node that is authenticating
    pub auth_wait_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: vec!["127.0.0.1:11211".to_string()],
            op_timeout_ms: 2_500,
            connect_timeout_ms: 5_000,
            max_reconnect_delay_ms: 30_000,
            read_buffer_size: 16 * 1024,
            write_buffer_size: 16 * 1024,
            input_queue_capacity: 16 * 1024,
            write_queue_capacity: 8 * 1024,
            optimize: true,
            max_batch_keys: 64,
            max_batch_bytes: 16 * 1024,
            timeout_ratio_window: false,
            auth: None,
            auth_wait_ms: 1_000,
        }
    }
}

impl ClientConfig {
    /// Loads defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: ClientConfig = builder
            .add_source(
                Environment::with_prefix("PIPECACHE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("servers"),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(text)
            .map_err(|e| CacheError::InvalidArgument(format!("bad config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(CacheError::InvalidArgument(
                "at least one server is required".into(),
            ));
        }
        if let Some(bad) = self.servers.iter().find(|s| !s.contains(':')) {
            return Err(CacheError::InvalidArgument(format!(
                "server {:?} is not host:port",
                bad
            )));
        }
        let sizes = [
            ("read_buffer_size", self.read_buffer_size),
            ("write_buffer_size", self.write_buffer_size),
            ("input_queue_capacity", self.input_queue_capacity),
            ("write_queue_capacity", self.write_queue_capacity),
            ("max_batch_keys", self.max_batch_keys),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(CacheError::InvalidArgument(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn auth_wait(&self) -> Duration {
        Duration::from_millis(self.auth_wait_ms)
    }
}
