//! Connection Module
//!
//! This module manages individual client connections to a FlashNet server.
//! Each connection runs two async tasks (reader and writer), so inbound
//! processing never contends with outbound pushes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                   (server module)                           │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept() + admission check
//!                        ▼
//!           ┌────────────────────────┐
//!           │   ConnectionManager    │  id -> Arc<Connection>
//!           └────────────┬───────────┘
//!                        │
//!                        │ start()
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Connection                              │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read frame  │───>│  Request    │───>│  Dispatch   │     │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Socket out  │<───│ Writer task │<───│   send()    │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Split I/O**: Reader and writer tasks own one socket half each
//! - **Backpressure**: `send` waits for the writer; worker queues throttle readers
//! - **Idempotent teardown**: `stop` runs exactly once per connection
//! - **Properties**: Per-connection key/value store for application state
//! - **Statistics**: Tracks connection and frame metrics

pub mod conn;
pub mod framed;
pub mod hooks;
pub mod manager;
pub mod stats;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use conn::{Connection, ConnectionError, Property};
pub use framed::{read_frame, write_frame};
pub use hooks::{ConnectionHook, LifecycleHooks};
pub use manager::ConnectionManager;
pub use stats::{ConnectionStats, StatsSnapshot};
