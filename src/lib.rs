//! # FlashNet - A Lightweight TCP Application Server Framework
//!
//! FlashNet accepts TCP clients, frames their byte streams into typed
//! messages, and routes each message to an application handler registered
//! for its message type. Handlers reply over the same connection.
//!
//! ## Features
//!
//! - **Length-prefixed framing**: `length (u32 LE) | type_id (u32 LE) | payload`
//! - **Split I/O**: Each connection runs a reader task and a writer task
//! - **Sharded workers**: Optional fixed pool that keeps per-connection order
//! - **Lifecycle hooks**: Async callbacks on connection start and stop
//! - **Admission control**: New sockets are refused past a connection limit
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              FlashNet                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│ Dispatcher  │                  │
//! │  │ (Listener)  │    │ reader task │    │ type_id ->  │                  │
//! │  └──────┬──────┘    └──────┬──────┘    │   Router    │                  │
//! │         │                  │           └──────┬──────┘                  │
//! │         ▼                  │                  │                         │
//! │  ┌─────────────┐           │      ┌───────────┴──────────────────────┐  │
//! │  │ Connection  │           └─────>│           WorkerPool             │  │
//! │  │  Manager    │                  │ ┌────────┐ ┌────────┐ ┌────────┐ │  │
//! │  │ id -> conn  │                  │ │Worker 0│ │Worker 1│ │...N    │ │  │
//! │  └─────────────┘                  │ └────────┘ └────────┘ └────────┘ │  │
//! │                                   └──────────────────────────────────┘  │
//! │                                                   │                     │
//! │                     ┌─────────────┐               │ Connection::send    │
//! │          socket <───│ writer task │<──────────────┘                     │
//! │                     └─────────────┘                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use flashnet::{router_fn, Connection, Frame, Server, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = Server::new(ServerConfig::default().with_port(8999));
//!
//!     // Reply to every type 1 message with a type 2 "pong"
//!     server.add_router(1, router_fn(|conn: Arc<Connection>, _frame: Frame| async move {
//!         conn.send(2, "pong").await?;
//!         Ok(())
//!     }))?;
//!
//!     server.set_on_conn_start(|conn| async move {
//!         conn.set_property("joined", std::time::Instant::now());
//!     });
//!
//!     server
//!         .serve(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Frame types and the wire codec
//! - [`connection`]: Connections, the connection registry, hooks and stats
//! - [`router`]: The `Router` trait and the dispatcher
//! - [`worker`]: The sharded worker pool
//! - [`server`]: Listener, accept loop and shutdown
//! - [`client`]: A framed client for the same wire format
//! - [`config`]: Server configuration
//!
//! ## Design Highlights
//!
//! ### Ordering
//!
//! With the worker pool enabled, a connection's requests always land on
//! worker `conn_id % pool_size`. Each worker drains one FIFO queue, so
//! requests from one connection are handled in arrival order. Without the
//! pool every request runs on its own task and no order is promised.
//!
//! ### Fault Isolation
//!
//! Protocol errors close only the offending connection. Unknown message
//! types are logged and dropped. Handler errors and panics are caught per
//! request and never take down a worker.

pub mod client;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod router;
pub mod server;
pub mod worker;

// Re-export commonly used types for convenience
pub use client::Client;
pub use config::{ConfigError, ServerConfig};
pub use connection::{Connection, ConnectionError, ConnectionManager, ConnectionStats};
pub use protocol::{CodecError, Frame, FrameCodec};
pub use router::{router_fn, DispatchError, Request, Router, RouterError};
pub use server::{Server, ServerError, ServerHandle};
pub use worker::{WorkerPool, WorkerPoolError};

/// The default port a FlashNet server listens on
pub const DEFAULT_PORT: u16 = 8999;

/// The default host a FlashNet server binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Version of FlashNet
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
