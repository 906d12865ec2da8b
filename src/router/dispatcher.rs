//! Router Table and Dispatcher
//!
//! The table maps a frame's `type_id` to its [`Router`]. It is filled in
//! while the server is being configured (`&mut self`) and shared read-only
//! behind an `Arc` once serving starts, so registration can never race with
//! dispatch.
//!
//! ```text
//! Request ──> lookup(type_id) ──┬── missing ──> warn + drop (connection stays open)
//!                               │
//!                               └── found ────> pre_handle
//!                                               handle
//!                                               post_handle
//! ```
//!
//! A panic anywhere in the chain is caught and reported as a
//! [`DispatchError::Panicked`] instead of unwinding into the caller, which
//! may be a long-lived worker.

use crate::router::{Request, Router};
use crate::worker::{WorkerPool, WorkerPoolError};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, trace, warn};

/// Startup-time registration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// A router is already bound to this type id
    #[error("duplicate router for message type {0}")]
    DuplicateRoute(u32),
}

/// Per-request dispatch failures. None of these close the connection.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no router registered for message type {0}")]
    Unroutable(u32),

    #[error("handler for message type {type_id} failed: {error:#}")]
    Handler { type_id: u32, error: anyhow::Error },

    #[error("handler for message type {type_id} panicked: {message}")]
    Panicked { type_id: u32, message: String },
}

/// Maps message types to handler chains.
#[derive(Default)]
pub struct Dispatcher {
    routes: HashMap<u32, Box<dyn Router>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `router` to `type_id`. Binding the same id twice is an error.
    pub fn add_router<R: Router>(&mut self, type_id: u32, router: R) -> Result<(), RouterError> {
        if self.routes.contains_key(&type_id) {
            return Err(RouterError::DuplicateRoute(type_id));
        }
        self.routes.insert(type_id, Box::new(router));
        info!(type_id, "Router registered");
        Ok(())
    }

    pub fn has_route(&self, type_id: u32) -> bool {
        self.routes.contains_key(&type_id)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Runs the handler chain registered for the request's type.
    pub async fn dispatch(&self, request: Request) -> Result<(), DispatchError> {
        let type_id = request.type_id();
        let router = self
            .routes
            .get(&type_id)
            .ok_or(DispatchError::Unroutable(type_id))?;

        let chain = async {
            router.pre_handle(&request).await;
            let result = router.handle(&request).await;
            router.post_handle(&request).await;
            result
        };

        match AssertUnwindSafe(chain).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(DispatchError::Handler { type_id, error }),
            Err(panic) => Err(DispatchError::Panicked {
                type_id,
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    /// Dispatches and logs any failure; used wherever nobody awaits the result.
    pub async fn dispatch_and_report(&self, request: Request) {
        let conn = Arc::clone(request.connection());
        let Err(e) = self.dispatch(request).await else {
            return;
        };

        conn.stats().dispatch_failed();
        match &e {
            DispatchError::Unroutable(type_id) => {
                warn!(conn_id = conn.id(), type_id, "No router registered, dropping request")
            }
            DispatchError::Handler { type_id, .. } => {
                warn!(conn_id = conn.id(), type_id, error = %e, "Handler failed")
            }
            DispatchError::Panicked { type_id, .. } => {
                error!(conn_id = conn.id(), type_id, error = %e, "Handler panicked")
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.routes.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("Dispatcher").field("routes", &ids).finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// How a connection's reader hands off requests.
#[derive(Clone)]
pub(crate) enum DispatchMode {
    /// Each request gets its own task; no ordering between requests
    Spawn(Arc<Dispatcher>),
    /// Requests go to the connection's worker shard, in arrival order
    Pool(Arc<WorkerPool>),
}

impl DispatchMode {
    /// Hands a request off. In pool mode this waits while the shard is full.
    pub(crate) async fn submit(&self, request: Request) -> Result<(), WorkerPoolError> {
        match self {
            DispatchMode::Spawn(dispatcher) => {
                let dispatcher = Arc::clone(dispatcher);
                trace!(conn_id = request.connection().id(), "Spawning dispatch task");
                tokio::spawn(async move { dispatcher.dispatch_and_report(request).await });
                Ok(())
            }
            DispatchMode::Pool(pool) => pool.submit(request).await,
        }
    }
}
