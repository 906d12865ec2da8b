//! Connection
//!
//! A `Connection` owns one accepted socket for its whole life. The socket is
//! split in two and each half gets its own task:
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!   TCP in  ────> │ reader task                              │
//!                 │   read header (8B) -> check length       │
//!                 │   read payload     -> Request            │──> dispatch
//!                 └──────────────────────────────────────────┘     (spawned task
//!                                                                   or worker shard)
//!                 ┌──────────────────────────────────────────┐
//!   TCP out <──── │ writer task                              │ <── send()
//!                 │   outbound channel -> socket             │     (handlers, hooks,
//!                 └──────────────────────────────────────────┘      server pushes)
//! ```
//!
//! ## Teardown
//!
//! [`Connection::stop`] is idempotent and may be called from the reader,
//! the writer, the server, or application code. The first call:
//!
//! 1. Marks the connection closed (all later sends fail)
//! 2. Runs the on-stop hook while properties are still readable
//! 3. Raises the exit signal; both tasks drop their socket half, closing it
//! 4. Deregisters from the [`ConnectionManager`]
//! 5. Releases the outbound channel
//! 6. Waits for the writer task to shut its half down
//!
//! Step 5 takes the write side of the lock every `send` holds while handing a
//! frame to the writer, and step 6 makes sure a frame the writer already took
//! is either written or abandoned, so once `stop` returns no byte reaches the
//! socket. The reader checks the exit signal before every read and every
//! submit, so no frame is dispatched after `stop` has begun.

use crate::connection::framed::{read_frame, write_frame};
use crate::connection::hooks::LifecycleHooks;
use crate::connection::manager::ConnectionManager;
use crate::connection::stats::ConnectionStats;
use crate::protocol::{CodecError, Frame, FrameCodec};
use crate::router::{DispatchMode, Request};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Outbound hand-off capacity. One slot: a sender waits until the writer has
/// taken the previous frame.
const OUTBOUND_CAPACITY: usize = 1;

/// An opaque per-connection property value.
pub type Property = Arc<dyn Any + Send + Sync>;

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Framing error (oversized or malformed frame)
    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    /// Peer closed the stream between frames
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Stream ended in the middle of a frame
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// The connection has been stopped
    #[error("Connection closed")]
    ConnectionClosed,

    /// No live connection with this id
    #[error("Connection {0} not found")]
    NotFound(u32),

    /// No property stored under this key
    #[error("Property '{0}' not found")]
    PropertyNotFound(String),

    /// A property exists but holds a different type
    #[error("Property '{0}' has a different type")]
    PropertyTypeMismatch(String),
}

/// Everything a connection shares with the server that accepted it.
pub(crate) struct ConnectionContext {
    pub(crate) manager: Arc<ConnectionManager>,
    pub(crate) dispatch: DispatchMode,
    pub(crate) hooks: LifecycleHooks,
    pub(crate) stats: Arc<ConnectionStats>,
    pub(crate) codec: FrameCodec,
}

/// Socket halves and the outbound receiver, handed to the tasks on start.
struct ConnectionIo {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    outbound_rx: mpsc::Receiver<Bytes>,
}

/// One client connection.
pub struct Connection {
    id: u32,
    peer_addr: SocketAddr,
    closed: AtomicBool,
    outbound: tokio::sync::RwLock<Option<mpsc::Sender<Bytes>>>,
    exit_tx: watch::Sender<bool>,
    writer_done: watch::Sender<bool>,
    io: Mutex<Option<ConnectionIo>>,
    properties: RwLock<HashMap<String, Property>>,
    ctx: Arc<ConnectionContext>,
}

impl Connection {
    /// Wraps an accepted socket. Nothing runs until [`start`](Self::start).
    pub(crate) fn new(
        id: u32,
        stream: TcpStream,
        ctx: Arc<ConnectionContext>,
    ) -> io::Result<Arc<Self>> {
        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (exit_tx, _) = watch::channel(false);
        let (writer_done, _) = watch::channel(false);

        ctx.stats.connection_opened();

        Ok(Arc::new(Self {
            id,
            peer_addr,
            closed: AtomicBool::new(false),
            outbound: tokio::sync::RwLock::new(Some(outbound_tx)),
            exit_tx,
            writer_done,
            io: Mutex::new(Some(ConnectionIo {
                reader,
                writer,
                outbound_rx,
            })),
            properties: RwLock::new(HashMap::new()),
            ctx,
        }))
    }

    /// The server-assigned connection id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The client's socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Returns true once [`stop`](Self::stop) has begun.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Spawns the reader and writer tasks, then runs the on-start hook.
    ///
    /// Calling this more than once, or after `stop`, does nothing.
    pub async fn start(self: &Arc<Self>) {
        let Some(io) = self.io.lock().take() else {
            return;
        };

        // Subscribe before the closed check so a concurrent stop is observed.
        let reader_exit = self.exit_tx.subscribe();
        let writer_exit = self.exit_tx.subscribe();
        if self.is_closed() {
            // The writer will never run; release a stop waiting on it
            self.writer_done.send_replace(true);
            return;
        }

        info!(conn_id = self.id, peer = %self.peer_addr, "Connection started");

        tokio::spawn(Arc::clone(self).read_loop(io.reader, reader_exit));
        tokio::spawn(Arc::clone(self).write_loop(io.writer, io.outbound_rx, writer_exit));

        self.ctx.hooks.call_on_start(self).await;
    }

    /// Encodes a frame and hands it to the writer task.
    ///
    /// Waits until the writer accepts the frame, so a handler that produces
    /// faster than the client drains is throttled here. Acceptance does not
    /// guarantee delivery.
    pub async fn send(&self, type_id: u32, payload: impl AsRef<[u8]>) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::ConnectionClosed);
        }

        let encoded = self.ctx.codec.encode(type_id, payload.as_ref())?;

        let outbound = self.outbound.read().await;
        let tx = match outbound.as_ref() {
            Some(tx) if !self.is_closed() => tx,
            _ => return Err(ConnectionError::ConnectionClosed),
        };

        trace!(conn_id = self.id, type_id, bytes = encoded.len(), "Queued frame");
        tx.send(encoded)
            .await
            .map_err(|_| ConnectionError::ConnectionClosed)
    }

    /// Sends an already-built frame.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), ConnectionError> {
        self.send(frame.type_id, &frame.payload).await
    }

    /// Tears the connection down. Idempotent.
    pub async fn stop(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(conn_id = self.id, peer = %self.peer_addr, "Connection stopping");

        self.ctx.hooks.call_on_stop(self).await;

        // Both tasks drop their socket half on exit, which closes the socket.
        self.exit_tx.send_replace(true);
        // Never started: the halves are still parked here.
        if let Some(io) = self.io.lock().take() {
            drop(io);
            self.writer_done.send_replace(true);
        }

        self.ctx.manager.remove(self);

        self.outbound.write().await.take();

        let mut writer_done = self.writer_done.subscribe();
        let _ = writer_done.wait_for(|done| *done).await;

        self.ctx.stats.connection_closed();
    }

    /// Stores a property, replacing any previous value under `key`.
    pub fn set_property<V>(&self, key: impl Into<String>, value: V)
    where
        V: Any + Send + Sync,
    {
        self.properties.write().insert(key.into(), Arc::new(value));
    }

    /// Looks up a property as an opaque value.
    pub fn get_property(&self, key: &str) -> Result<Property, ConnectionError> {
        self.properties
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ConnectionError::PropertyNotFound(key.to_string()))
    }

    /// Looks up a property and downcasts it to `V`.
    pub fn property<V>(&self, key: &str) -> Result<Arc<V>, ConnectionError>
    where
        V: Any + Send + Sync,
    {
        self.get_property(key)?
            .downcast::<V>()
            .map_err(|_| ConnectionError::PropertyTypeMismatch(key.to_string()))
    }

    /// Removes a property, returning its value if it was present.
    pub fn remove_property(&self, key: &str) -> Option<Property> {
        self.properties.write().remove(key)
    }

    pub(crate) fn stats(&self) -> &ConnectionStats {
        &self.ctx.stats
    }

    /// Reads frames until EOF, a protocol error, or the exit signal.
    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf, mut exit: watch::Receiver<bool>) {
        debug!(conn_id = self.id, "Reader task running");

        loop {
            let frame = tokio::select! {
                biased;

                _ = exit.changed() => break,
                result = read_frame(&mut reader, &self.ctx.codec) => match result {
                    Ok(frame) => frame,
                    Err(e) => {
                        self.log_read_error(&e);
                        break;
                    }
                },
            };

            self.ctx.stats.frame_received(frame.wire_len());
            trace!(
                conn_id = self.id,
                type_id = frame.type_id,
                bytes = frame.len(),
                "Received frame"
            );

            // A frame read concurrently with stop is dropped
            if *exit.borrow() {
                break;
            }

            let request = Request::new(Arc::clone(&self), frame);
            if let Err(e) = self.ctx.dispatch.submit(request).await {
                warn!(conn_id = self.id, error = %e, "Could not submit request");
                break;
            }
        }

        drop(reader);
        self.stop().await;
        debug!(conn_id = self.id, peer = %self.peer_addr, "Reader task exited");
    }

    /// Writes queued frames until a write fails or the exit signal fires.
    async fn write_loop(
        self: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::Receiver<Bytes>,
        mut exit: watch::Receiver<bool>,
    ) {
        debug!(conn_id = self.id, "Writer task running");

        loop {
            tokio::select! {
                next = outbound.recv() => match next {
                    Some(encoded) => {
                        // A peer that stops reading must not block teardown
                        let written = tokio::select! {
                            result = write_frame(&mut writer, &encoded) => result,
                            _ = exit.changed() => break,
                        };
                        if let Err(e) = written {
                            debug!(conn_id = self.id, error = %e, "Write failed");
                            break;
                        }
                        self.ctx.stats.frame_sent(encoded.len());
                    }
                    None => break,
                },
                _ = exit.changed() => break,
            }
        }

        // Pending senders fail fast once the receiver is gone.
        drop(outbound);
        let _ = writer.shutdown().await;
        drop(writer);
        self.writer_done.send_replace(true);

        self.stop().await;
        debug!(conn_id = self.id, peer = %self.peer_addr, "Writer task exited");
    }

    fn log_read_error(&self, e: &ConnectionError) {
        match e {
            ConnectionError::ClientDisconnected => {
                debug!(conn_id = self.id, peer = %self.peer_addr, "Client disconnected")
            }
            ConnectionError::Io(io_err) if io_err.kind() == io::ErrorKind::ConnectionReset => {
                debug!(conn_id = self.id, peer = %self.peer_addr, "Connection reset by client")
            }
            ConnectionError::Codec(_) => {
                warn!(conn_id = self.id, peer = %self.peer_addr, error = %e, "Protocol violation")
            }
            _ => warn!(conn_id = self.id, peer = %self.peer_addr, error = %e, "Connection error"),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .field("properties", &self.properties.read().len())
            .finish()
    }
}
