//! Native-messaging framing.
//!
//! Every message is a 32-bit length in native byte order followed by that
//! many bytes of UTF-8 JSON. A zero-length frame is treated as end of stream.

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame a host may send to the browser (1 MiB).
pub const MAX_HOST_FRAME: usize = 1024 * 1024;

/// Largest frame accepted from the browser side (64 MiB).
pub const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;

/// Read one frame. Returns `Ok(None)` on clean EOF or a zero-length frame.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Option<Vec<u8>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_ne_bytes(header) as usize;
    if len == 0 {
        return Ok(None);
    }
    if len > max {
        return Err(CodecError::FrameTooLarge { len, max });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max: usize) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > max {
        return Err(CodecError::FrameTooLarge {
            len: payload.len(),
            max,
        });
    }

    let len = payload.len() as u32;
    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode one JSON message.
pub async fn read_message<R, T>(reader: &mut R, max: usize) -> Result<Option<T>, CodecError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader, max).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode and write one JSON message.
pub async fn write_message<W, T>(writer: &mut W, message: &T, max: usize) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(message)?;
    write_frame(writer, &bytes, max).await
}
