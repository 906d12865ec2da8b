//! Server Configuration
//!
//! A plain value type describing how a server listens and how much work it
//! accepts. It is built once (from defaults, command-line flags, or code) and
//! handed to [`Server::new`](crate::server::Server::new); nothing reads
//! configuration from global state.

use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use thiserror::Error;

/// Default cap on simultaneously registered connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Default number of dispatch workers (0 disables the pool)
pub const DEFAULT_WORKER_POOL_SIZE: usize = 10;

/// Default capacity of each worker's request queue
pub const DEFAULT_MAX_WORKER_TASK_LEN: usize = 1024;

/// Errors raised by [`ServerConfig::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("max_frame_size must be greater than zero")]
    ZeroMaxFrameSize,

    #[error("max_worker_task_len must be greater than zero when the worker pool is enabled")]
    ZeroWorkerQueue,

    #[error("worker_pool_size {0} exceeds the addressable shard range")]
    TooManyWorkers(usize),
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Human-readable server name, used in logs
    pub name: String,
    /// Host to bind to
    pub host: String,
    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Admission limit for live connections
    pub max_connections: usize,
    /// Largest payload accepted or sent on a connection
    pub max_frame_size: u32,
    /// Number of dispatch workers; 0 dispatches every request on its own task
    pub worker_pool_size: usize,
    /// Capacity of each worker's queue
    pub max_worker_task_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "FlashNetServer".to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            max_worker_task_len: DEFAULT_MAX_WORKER_TASK_LEN,
        }
    }
}

impl ServerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_worker_pool_size(mut self, worker_pool_size: usize) -> Self {
        self.worker_pool_size = worker_pool_size;
        self
    }

    pub fn with_max_worker_task_len(mut self, max_worker_task_len: usize) -> Self {
        self.max_worker_task_len = max_worker_task_len;
        self
    }

    /// Returns true if requests are fanned out to a worker pool.
    pub fn worker_pool_enabled(&self) -> bool {
        self.worker_pool_size > 0
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks the values that would otherwise fail at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroMaxConnections);
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::ZeroMaxFrameSize);
        }
        if self.worker_pool_enabled() {
            if self.max_worker_task_len == 0 {
                return Err(ConfigError::ZeroWorkerQueue);
            }
            // Shards are computed from u32 connection ids
            if u32::try_from(self.worker_pool_size).is_err() {
                return Err(ConfigError::TooManyWorkers(self.worker_pool_size));
            }
        }
        Ok(())
    }
}
