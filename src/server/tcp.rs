//! TCP Server
//!
//! Owns the listener and wires accepted sockets into connections.
//!
//! ```text
//!  Server (configuring)          ServerHandle (listening)
//!  ────────────────────          ────────────────────────
//!  add_router(..)        start()  accept loop ──┬─ full?  ──> drop socket
//!  set_on_conn_start(..) ──────>                └─ else   ──> id, register, start
//!  set_on_conn_stop(..)
//!                                 stop()  ──> close listener, stop every
//!                                             connection, stop workers
//! ```
//!
//! Routers and hooks can only be changed while the server is being
//! configured; `start` consumes the `Server`, so the routing table is
//! immutable once the first connection arrives.

use crate::config::{ConfigError, ServerConfig};
use crate::connection::conn::ConnectionContext;
use crate::connection::{Connection, ConnectionManager, ConnectionStats, LifecycleHooks, StatsSnapshot};
use crate::protocol::FrameCodec;
use crate::router::{DispatchMode, Dispatcher, Router, RouterError};
use crate::worker::{WorkerPool, WorkerPoolError};
use crate::VERSION;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Startup failures. Everything after `start` returns is handled per
/// connection and never surfaces here.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("worker pool error: {0}")]
    WorkerPool(#[from] WorkerPoolError),

    #[error("router registration error: {0}")]
    Router(#[from] RouterError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Hands out connection ids. Starts at 0 and wraps.
#[derive(Debug, Default)]
pub struct ConnectionIdGenerator {
    next: AtomicU32,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// A server that has not started listening yet.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    dispatcher: Dispatcher,
    hooks: LifecycleHooks,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            dispatcher: Dispatcher::new(),
            hooks: LifecycleHooks::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registers the router for `type_id`. Fails if one is already bound.
    pub fn add_router<R: Router>(&mut self, type_id: u32, router: R) -> Result<(), RouterError> {
        self.dispatcher.add_router(type_id, router)
    }

    /// Runs after a connection's reader and writer are up.
    pub fn set_on_conn_start<F, Fut>(&mut self, hook: F)
    where
        F: Fn(Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.set_on_start(hook);
    }

    /// Runs once when a connection is torn down, before its socket closes.
    pub fn set_on_conn_stop<F, Fut>(&mut self, hook: F)
    where
        F: Fn(Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.set_on_stop(hook);
    }

    pub fn clear_on_conn_start(&mut self) {
        self.hooks.clear_on_start();
    }

    pub fn clear_on_conn_stop(&mut self) {
        self.hooks.clear_on_stop();
    }

    /// Validates the config, starts the worker pool, binds, and begins
    /// accepting in the background.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let Server {
            config,
            dispatcher,
            hooks,
        } = self;
        config.validate()?;

        info!(
            name = %config.name,
            version = VERSION,
            max_connections = config.max_connections,
            max_frame_size = config.max_frame_size,
            workers = config.worker_pool_size,
            "Starting server"
        );

        let dispatcher = Arc::new(dispatcher);
        let dispatch = if config.worker_pool_enabled() {
            let pool = Arc::new(WorkerPool::new(
                config.worker_pool_size,
                config.max_worker_task_len,
                dispatcher,
            ));
            pool.start()?;
            DispatchMode::Pool(pool)
        } else {
            DispatchMode::Spawn(dispatcher)
        };

        let addr = config.bind_address();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                if let DispatchMode::Pool(pool) = &dispatch {
                    pool.stop();
                }
                return Err(ServerError::Bind { addr, source });
            }
        };
        let local_addr = listener.local_addr()?;
        info!(name = %config.name, addr = %local_addr, "Listening");

        let worker_pool = match &dispatch {
            DispatchMode::Pool(pool) => Some(Arc::clone(pool)),
            DispatchMode::Spawn(_) => None,
        };

        let manager = Arc::new(ConnectionManager::new());
        let stats = Arc::new(ConnectionStats::new());
        let ctx = Arc::new(ConnectionContext {
            manager: Arc::clone(&manager),
            dispatch,
            hooks,
            stats: Arc::clone(&stats),
            codec: FrameCodec::new(config.max_frame_size),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            ctx,
            config.max_connections,
            shutdown_rx,
        ));

        Ok(ServerHandle {
            name: config.name,
            local_addr,
            manager,
            stats,
            pool: worker_pool,
            shutdown_tx,
            accept_task: Some(accept_task),
        })
    }

    /// Starts the server, waits for `shutdown`, then stops it.
    ///
    /// ```ignore
    /// server.serve(async { let _ = tokio::signal::ctrl_c().await; }).await?;
    /// ```
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let handle = self.start().await?;
        shutdown.await;
        info!(name = %handle.name, "Shutdown signal received, stopping server...");
        handle.stop().await;
        Ok(())
    }
}

/// A running server.
///
/// Dropping the handle closes the listener; [`stop`](Self::stop) also tears
/// down every live connection and the worker pool.
#[derive(Debug)]
pub struct ServerHandle {
    name: String,
    local_addr: SocketAddr,
    manager: Arc<ConnectionManager>,
    stats: Arc<ConnectionStats>,
    pool: Option<Arc<WorkerPool>>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bound address; useful when the config asked for port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registry of live connections, e.g. for pushing to a connection by id.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stops accepting, stops every connection, then the worker pool.
    pub async fn stop(mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Accept loop ended abnormally");
            }
        }

        self.manager.clear_all().await;
        if let Some(pool) = &self.pool {
            pool.stop();
        }

        info!(name = %self.name, "Server shutdown complete");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Accepts until shutdown, enforcing the connection limit.
/// Pause after an accept error that is likely to repeat immediately.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// How long to wait before accepting again after `e`.
///
/// Errors tied to a single peer are retried at once. Anything else, such as
/// running out of file descriptors, would fail again straight away.
fn accept_backoff(e: &io::Error) -> Option<Duration> {
    match e.kind() {
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset => None,
        _ => Some(ACCEPT_ERROR_BACKOFF),
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
    max_connections: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let ids = ConnectionIdGenerator::new();

    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    if let Some(delay) = accept_backoff(&e) {
                        tokio::time::sleep(delay).await;
                    }
                    continue;
                }
            },
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
        };

        // Only this loop registers connections, so the count can only be
        // lower by the time the new one is added.
        if ctx.manager.len() >= max_connections {
            warn!(peer = %addr, max_connections, "Connection limit reached, rejecting");
            ctx.stats.connection_rejected();
            drop(stream);
            continue;
        }

        let id = ids.next_id();
        let conn = match Connection::new(id, stream, Arc::clone(&ctx)) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(peer = %addr, error = %e, "Could not set up connection");
                continue;
            }
        };

        ctx.manager.add(Arc::clone(&conn));
        tokio::spawn(async move { conn.start().await });
    }

    debug!("Accept loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::protocol::{encode, Frame};
    use crate::router::{router_fn, Request};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const PING: u32 = 1;
    const PONG: u32 = 2;
    const GREETING: u32 = 202;

    fn local_config() -> ServerConfig {
        ServerConfig::default()
            .with_name("TestServer")
            .with_host("127.0.0.1")
            .with_port(0)
            .with_max_frame_size(64)
    }

    /// Replies with the request payload under type 2.
    struct Echo;

    #[async_trait]
    impl Router for Echo {
        async fn handle(&self, request: &Request) -> anyhow::Result<()> {
            request.connection().send(PONG, request.data()).await?;
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl Router for Panics {
        async fn handle(&self, _request: &Request) -> anyhow::Result<()> {
            panic!("handler blew up");
        }
    }

    async fn expect_eof(stream: &mut TcpStream) {
        let mut buf = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf))
            .await
            .expect("server did not close the connection")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_ping_pong_with_start_hook() {
        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);

        let mut server = Server::new(local_config().with_worker_pool_size(0));
        server
            .add_router(
                PING,
                router_fn(|conn: Arc<Connection>, _frame| async move {
                    conn.send(PONG, "pong").await?;
                    Ok(())
                }),
            )
            .unwrap();
        server.set_on_conn_start(move |conn| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                let _ = conn.send(GREETING, "hello").await;
            }
        });

        let handle = server.start().await.unwrap();
        let mut client = Client::connect(handle.local_addr()).await.unwrap();

        assert_eq!(client.recv().await.unwrap(), Frame::new(GREETING, "hello"));
        assert!(started.load(Ordering::SeqCst));

        let reply = client.request(PING, "ping").await.unwrap();
        assert_eq!(reply, Frame::new(PONG, "pong"));

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_pool_preserves_per_connection_order() {
        let mut server = Server::new(local_config().with_worker_pool_size(2));
        server.add_router(PING, Echo).unwrap();
        let handle = server.start().await.unwrap();
        let addr = handle.local_addr();

        let run_client = move || async move {
            let mut client = Client::connect(addr).await.unwrap();
            for seq in 0..100u32 {
                client.send(PING, seq.to_le_bytes()).await.unwrap();
            }
            for seq in 0..100u32 {
                let frame = client.recv().await.unwrap();
                assert_eq!(frame.type_id, PONG);
                assert_eq!(&frame.payload[..], &seq.to_le_bytes()[..]);
            }
        };

        let (a, b) = tokio::join!(tokio::spawn(run_client()), tokio::spawn(run_client()));
        a.unwrap();
        b.unwrap();

        assert_eq!(handle.stats().frames_received, 200);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let mut server = Server::new(local_config());
        server.add_router(PING, Echo).unwrap();
        let handle = server.start().await.unwrap();

        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        let mut header = Vec::new();
        header.extend_from_slice(&65u32.to_le_bytes());
        header.extend_from_slice(&PING.to_le_bytes());
        stream.write_all(&header).await.unwrap();

        expect_eof(&mut stream).await;
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_no_dispatch_after_handler_stops_connection() {
        for _ in 0..10 {
            let highest = Arc::new(AtomicU32::new(0));
            let seen = Arc::clone(&highest);

            let config = local_config()
                .with_worker_pool_size(1)
                .with_max_worker_task_len(1);
            let mut server = Server::new(config);
            server
                .add_router(
                    PING,
                    router_fn(move |conn: Arc<Connection>, frame: Frame| {
                        let seen = Arc::clone(&seen);
                        async move {
                            let seq = u32::from_le_bytes(frame.payload[..4].try_into()?);
                            seen.fetch_max(seq, Ordering::SeqCst);
                            if seq == 0 {
                                conn.stop().await;
                            }
                            Ok(())
                        }
                    }),
                )
                .unwrap();
            let handle = server.start().await.unwrap();

            let mut burst = Vec::new();
            for seq in 0..200u32 {
                burst.extend_from_slice(&encode(PING, &seq.to_le_bytes()).unwrap());
            }
            let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
            let _ = stream.write_all(&burst).await;
            expect_eof(&mut stream).await;
            tokio::time::sleep(Duration::from_millis(50)).await;

            // Seq 1 may already be queued and seq 2 parked in submit
            let highest = highest.load(Ordering::SeqCst);
            assert!(highest <= 2, "frame {highest} dispatched after stop");
            handle.stop().await;
        }
    }

    #[test]
    fn test_accept_backoff_only_for_persistent_errors() {
        let emfile = io::Error::from_raw_os_error(24);
        assert_eq!(accept_backoff(&emfile), Some(ACCEPT_ERROR_BACKOFF));
        assert_eq!(
            accept_backoff(&io::Error::from(io::ErrorKind::OutOfMemory)),
            Some(ACCEPT_ERROR_BACKOFF)
        );

        assert_eq!(accept_backoff(&io::Error::from(io::ErrorKind::ConnectionAborted)), None);
        assert_eq!(accept_backoff(&io::Error::from(io::ErrorKind::ConnectionReset)), None);
    }

    #[tokio::test]
    async fn test_admission_control() {
        let mut server = Server::new(local_config().with_max_connections(1));
        server.add_router(PING, Echo).unwrap();
        let handle = server.start().await.unwrap();

        let mut first = Client::connect(handle.local_addr()).await.unwrap();
        // A round trip proves the first connection is registered
        first.request(PING, "a").await.unwrap();
        assert_eq!(handle.connections().len(), 1);

        let mut second = TcpStream::connect(handle.local_addr()).await.unwrap();
        expect_eof(&mut second).await;

        assert_eq!(handle.stats().connections_rejected, 1);
        assert_eq!(handle.connections().len(), 1);

        // The admitted connection is unaffected
        let reply = first.request(PING, "b").await.unwrap();
        assert_eq!(reply, Frame::new(PONG, "b"));

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_faulty_requests_keep_connection_open() {
        let mut server = Server::new(local_config());
        server.add_router(PING, Echo).unwrap();
        server.add_router(5, Panics).unwrap();
        let handle = server.start().await.unwrap();

        let mut client = Client::connect(handle.local_addr()).await.unwrap();
        client.send(99, "nobody home").await.unwrap();
        client.send(5, "boom").await.unwrap();

        let reply = client.request(PING, "still here").await.unwrap();
        assert_eq!(reply, Frame::new(PONG, "still here"));

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_connections() {
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);

        let mut server = Server::new(local_config());
        server.add_router(PING, Echo).unwrap();
        server.set_on_conn_stop(move |_conn| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let handle = server.start().await.unwrap();
        let addr = handle.local_addr();

        let mut client = Client::connect(addr).await.unwrap();
        client.request(PING, "x").await.unwrap();

        let manager = Arc::clone(handle.connections());
        handle.stop().await;

        assert!(manager.is_empty());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        expect_eof(client.get_mut()).await;

        // The listener is gone too
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_push_to_connection_by_id() {
        let mut server = Server::new(local_config());
        server.add_router(PING, Echo).unwrap();
        let handle = server.start().await.unwrap();

        let mut client = Client::connect(handle.local_addr()).await.unwrap();
        client.request(PING, "hi").await.unwrap();

        let id = handle.connections().ids()[0];
        let conn = handle.connections().get(id).unwrap();
        conn.send(7, "pushed").await.unwrap();
        assert_eq!(client.recv().await.unwrap(), Frame::new(7, "pushed"));

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let server = Server::new(local_config());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let serving = tokio::spawn(server.serve(async move {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let server = Server::new(local_config().with_max_connections(0));
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::Config(ConfigError::ZeroMaxConnections)));
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let server = Server::new(local_config().with_port(port));
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[test]
    fn test_duplicate_router_rejected() {
        let mut server = Server::new(local_config());
        server.add_router(PING, Echo).unwrap();
        assert_eq!(
            server.add_router(PING, Echo).unwrap_err(),
            RouterError::DuplicateRoute(PING)
        );
    }

    #[test]
    fn test_id_generator_sequence() {
        let ids = ConnectionIdGenerator::new();
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        // Sanity check the bytes a raw client would write
        let frame = encode(PING, b"ab").unwrap();
        assert_eq!(&frame[..], &[2, 0, 0, 0, 1, 0, 0, 0, b'a', b'b']);
    }
}
