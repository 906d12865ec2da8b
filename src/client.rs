//! Framed Client
//!
//! A minimal client that speaks the server's wire format. It is generic over
//! the stream so tests can drive it with an in-memory mock.
//!
//! ```ignore
//! let mut client = Client::connect("127.0.0.1:8999").await?;
//! let reply = client.request(1, "ping").await?;
//! println!("{}", reply);
//! ```

use crate::connection::{read_frame, write_frame, ConnectionError};
use crate::protocol::{Frame, FrameCodec};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::trace;

/// A framed connection to a server.
#[derive(Debug)]
pub struct Client<S = TcpStream> {
    stream: S,
    codec: FrameCodec,
}

impl Client<TcpStream> {
    /// Connects with the default frame size limit.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream,
            codec: FrameCodec::default(),
        }
    }

    /// Must match the server's limit for large payloads to round-trip.
    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.codec = FrameCodec::new(max_frame_size);
        self
    }

    pub async fn send(&mut self, type_id: u32, payload: impl AsRef<[u8]>) -> Result<(), ConnectionError> {
        let encoded = self.codec.encode(type_id, payload.as_ref())?;
        trace!(type_id, bytes = encoded.len(), "Client sending frame");
        write_frame(&mut self.stream, &encoded).await?;
        Ok(())
    }

    /// Waits for the next frame. Returns `ClientDisconnected` on a clean EOF.
    pub async fn recv(&mut self) -> Result<Frame, ConnectionError> {
        read_frame(&mut self.stream, &self.codec).await
    }

    /// Sends one frame and waits for the next frame back.
    pub async fn request(&mut self, type_id: u32, payload: impl AsRef<[u8]>) -> Result<Frame, ConnectionError> {
        self.send(type_id, payload).await?;
        self.recv().await
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
