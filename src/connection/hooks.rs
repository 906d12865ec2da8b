//! Connection Lifecycle Hooks
//!
//! Applications can run code when a connection starts (after its reader and
//! writer are live, so it may already `send`) and when it stops (before the
//! socket is torn down, so properties are still readable).
//!
//! Hooks are configured on the [`Server`](crate::server::Server) before it
//! starts and are frozen once it is listening.

use crate::connection::Connection;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

/// A type-erased async callback receiving the connection.
pub type ConnectionHook = Arc<dyn Fn(Arc<Connection>) -> BoxFuture<'static, ()> + Send + Sync>;

/// The pair of optional start/stop callbacks.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    on_start: Option<ConnectionHook>,
    on_stop: Option<ConnectionHook>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the callback run after a connection's tasks are running.
    pub fn set_on_start<F, Fut>(&mut self, hook: F)
    where
        F: Fn(Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_start = Some(Arc::new(move |conn| hook(conn).boxed()));
    }

    /// Sets the callback run at the start of teardown.
    pub fn set_on_stop<F, Fut>(&mut self, hook: F)
    where
        F: Fn(Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_stop = Some(Arc::new(move |conn| hook(conn).boxed()));
    }

    pub fn clear_on_start(&mut self) {
        self.on_start = None;
    }

    pub fn clear_on_stop(&mut self) {
        self.on_stop = None;
    }

    pub fn has_on_start(&self) -> bool {
        self.on_start.is_some()
    }

    pub fn has_on_stop(&self) -> bool {
        self.on_stop.is_some()
    }

    pub(crate) async fn call_on_start(&self, conn: &Arc<Connection>) {
        if let Some(hook) = &self.on_start {
            debug!(conn_id = conn.id(), "Calling on-start hook");
            call_isolated(hook, conn, "on-start").await;
        }
    }

    pub(crate) async fn call_on_stop(&self, conn: &Arc<Connection>) {
        if let Some(hook) = &self.on_stop {
            debug!(conn_id = conn.id(), "Calling on-stop hook");
            call_isolated(hook, conn, "on-stop").await;
        }
    }
}

// A panicking hook must not leave the connection half torn down.
async fn call_isolated(hook: &ConnectionHook, conn: &Arc<Connection>, which: &str) {
    let fut = hook(Arc::clone(conn));
    if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
        error!(conn_id = conn.id(), hook = which, "Lifecycle hook panicked");
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}
