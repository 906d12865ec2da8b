//! Worker Pool Module
//!
//! Optional bounded concurrency for dispatch. When the configured pool size
//! is non-zero, every connection's requests run on one fixed worker chosen
//! by `conn_id % size`; otherwise each request is spawned as its own task.

pub mod pool;

pub use pool::{shard_index, WorkerPool, WorkerPoolError};
