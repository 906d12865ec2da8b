//! Helpers for building connections over real loopback sockets in tests.

use crate::connection::conn::ConnectionContext;
use crate::connection::{Connection, ConnectionManager, ConnectionStats, LifecycleHooks};
use crate::protocol::FrameCodec;
use crate::router::{DispatchMode, Dispatcher};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

pub(crate) const TEST_MAX_FRAME_SIZE: u32 = 64;

pub(crate) fn test_context() -> Arc<ConnectionContext> {
    test_context_with_hooks(LifecycleHooks::new())
}

pub(crate) fn test_context_with_hooks(hooks: LifecycleHooks) -> Arc<ConnectionContext> {
    context_with(DispatchMode::Spawn(Arc::new(Dispatcher::new())), hooks)
}

pub(crate) fn context_with(dispatch: DispatchMode, hooks: LifecycleHooks) -> Arc<ConnectionContext> {
    build_context(dispatch, hooks, TEST_MAX_FRAME_SIZE)
}

/// A context whose codec accepts frames up to `max_frame_size` bytes.
pub(crate) fn test_context_with_max_frame(max_frame_size: u32) -> Arc<ConnectionContext> {
    build_context(
        DispatchMode::Spawn(Arc::new(Dispatcher::new())),
        LifecycleHooks::new(),
        max_frame_size,
    )
}

fn build_context(dispatch: DispatchMode, hooks: LifecycleHooks, max_frame_size: u32) -> Arc<ConnectionContext> {
    Arc::new(ConnectionContext {
        manager: Arc::new(ConnectionManager::new()),
        dispatch,
        hooks,
        stats: Arc::new(ConnectionStats::new()),
        codec: FrameCodec::new(max_frame_size),
    })
}

/// Returns a server-side connection (not started) and the client socket.
pub(crate) async fn connect(id: u32, ctx: &Arc<ConnectionContext>) -> (Arc<Connection>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let client = TcpStream::connect(addr).await.unwrap();
    let (server_side, _) = listener.accept().await.unwrap();

    let conn = Connection::new(id, server_side, Arc::clone(ctx)).unwrap();
    (conn, client)
}
