//! Frame I/O over async streams
//!
//! The codec is pure; this is where exact byte counts are pulled off (or
//! pushed onto) a stream. TCP may hand us a header split across several
//! segments, so every read here is a `read_exact`.

use crate::connection::ConnectionError;
use crate::protocol::{Frame, FrameCodec, HEADER_LEN};
use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads exactly one frame from `reader`.
///
/// The declared length is checked against `codec` before any payload byte is
/// read, so an oversized frame is refused without buffering it.
pub async fn read_frame<R>(reader: &mut R, codec: &FrameCodec) -> Result<Frame, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut head)
        .await
        .map_err(|e| eof_as(e, ConnectionError::ClientDisconnected))?;

    let header = codec.decode_header(&head)?;

    let mut payload = BytesMut::zeroed(header.payload_len());
    if !payload.is_empty() {
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| eof_as(e, ConnectionError::UnexpectedEof))?;
    }

    Ok(Frame::new(header.type_id, payload.freeze()))
}

/// Writes pre-encoded frame bytes verbatim and flushes.
pub async fn write_frame<W>(writer: &mut W, encoded: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(encoded).await?;
    writer.flush().await
}

fn eof_as(err: io::Error, eof: ConnectionError) -> ConnectionError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        eof
    } else {
        ConnectionError::Io(err)
    }
}
