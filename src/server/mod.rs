//! Server Module
//!
//! [`Server`] collects routers, hooks, and configuration; [`Server::start`]
//! binds the listener and returns a [`ServerHandle`] for the running
//! instance. [`Server::serve`] does both and blocks until a shutdown future
//! completes.

pub mod tcp;

pub use tcp::{ConnectionIdGenerator, Server, ServerError, ServerHandle};
