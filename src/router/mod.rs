//! Message Routing Module
//!
//! This module maps decoded frames to application handlers.
//!
//! ## Architecture
//!
//! ```text
//! Connection reader
//!       │
//!       ▼
//! ┌─────────────────┐
//! │    Request      │  (connection + frame)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   Dispatcher    │  (this module)
//! │                 │
//! │  - Lookup       │
//! │  - pre_handle   │
//! │  - handle       │
//! │  - post_handle  │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Connection.send │
//! └─────────────────┘
//! ```
//!
//! Routers are registered through [`Server::add_router`](crate::server::Server::add_router)
//! before the server starts.

pub mod dispatcher;
pub mod request;

pub use dispatcher::{DispatchError, Dispatcher, RouterError};
pub(crate) use dispatcher::DispatchMode;
pub use request::{router_fn, FnRouter, Request, Router};
