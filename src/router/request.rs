//! Requests and the `Router` trait

use crate::connection::Connection;
use crate::protocol::Frame;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// One decoded frame together with the connection it arrived on.
///
/// Produced by a connection's reader and consumed by exactly one dispatch.
pub struct Request {
    conn: Arc<Connection>,
    frame: Frame,
}

impl Request {
    pub fn new(conn: Arc<Connection>, frame: Frame) -> Self {
        Self { conn, frame }
    }

    /// The originating connection; handlers reply through it.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn type_id(&self) -> u32 {
        self.frame.type_id
    }

    pub fn data(&self) -> &Bytes {
        &self.frame.payload
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("conn_id", &self.conn.id())
            .field("type_id", &self.frame.type_id)
            .field("len", &self.frame.len())
            .finish()
    }
}

/// A handler chain for one message type.
///
/// Only `handle` is required. `pre_handle` and `post_handle` default to
/// no-ops and always run, before and after `handle`, even when `handle`
/// fails.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// #[async_trait]
/// impl Router for Echo {
///     async fn handle(&self, request: &Request) -> anyhow::Result<()> {
///         request.connection().send(2, request.data()).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Router: Send + Sync + 'static {
    async fn pre_handle(&self, _request: &Request) {}

    async fn handle(&self, request: &Request) -> anyhow::Result<()>;

    async fn post_handle(&self, _request: &Request) {}
}

/// Adapts an async closure into a [`Router`] with no-op hooks.
pub struct FnRouter<F> {
    handler: F,
}

/// Builds a router from a closure taking the originating connection and the
/// frame.
///
/// ```ignore
/// server.add_router(1, router_fn(|conn: Arc<Connection>, frame: Frame| async move {
///     conn.send(2, &frame.payload).await?;
///     Ok(())
/// }))?;
/// ```
pub fn router_fn<F, Fut>(handler: F) -> FnRouter<F>
where
    F: Fn(Arc<Connection>, Frame) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnRouter { handler }
}

#[async_trait]
impl<F, Fut> Router for FnRouter<F>
where
    F: Fn(Arc<Connection>, Frame) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, request: &Request) -> anyhow::Result<()> {
        (self.handler)(Arc::clone(&request.conn), request.frame.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testutil::{connect, test_context};
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_closure_router_receives_connection_and_frame() {
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let router = router_fn(move |conn: Arc<Connection>, frame: Frame| {
            let slot = Arc::clone(&slot);
            async move {
                *slot.lock() = Some((conn.id(), frame));
                Ok(())
            }
        });

        let ctx = test_context();
        let (conn, _client) = connect(5, &ctx).await;
        let request = Request::new(Arc::clone(&conn), Frame::new(3, "hello"));
        router.handle(&request).await.unwrap();

        let (conn_id, frame) = seen.lock().take().unwrap();
        assert_eq!(conn_id, 5);
        assert_eq!(frame, Frame::new(3, "hello"));
        // The request still owns its frame after the handler ran
        assert_eq!(request.data().as_ref(), b"hello");
    }
}
