//! Frame Reader and Writer
//!
//! Async encode/decode of request and response frames over any ordered byte
//! stream (`AsyncRead` / `AsyncWrite`).
//!
//! ## Decoding Rules
//!
//! 1. The header is read in full before any field is looked at. Short reads
//!    are retried until the header is complete or the peer hangs up.
//! 2. A declared payload size above the receiver's maximum fails immediately.
//!    Nothing is drained, since the size may be arbitrarily large or bogus.
//! 3. A payload that ends before its declared size fails with `ShortRead`.
//!    The declared size is a commitment, never a hint.
//!
//! ## Encoding Rules
//!
//! A frame is written header first, then the payload verbatim. Response
//! frames are assembled into one buffer and written with a single
//! `write_all`, so two responses can never interleave on a connection.

use crate::protocol::types::{
    RequestHeader, ResponseHeader, REQUEST_HEADER_LEN, RESPONSE_HEADER_LEN,
};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Errors that can occur while reading or writing frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O error on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream before sending any header byte
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer closed the stream in the middle of a header
    #[error("incomplete header: got {received} of {expected} bytes")]
    IncompleteHeader { expected: usize, received: usize },

    /// The declared payload size is above the receiver's maximum
    #[error("payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: u32, max: u32 },

    /// The stream ended before the declared payload size was reached
    #[error("short read: got {received} of {expected} bytes")]
    ShortRead { expected: u64, received: u64 },

    /// The payload source ended before the declared size was sent
    #[error("payload source exhausted: {available} of {expected} bytes available")]
    SourceExhausted { expected: u64, available: u64 },

    /// Response data does not fit the 32 bit length field
    #[error("response too large: {0} bytes")]
    ResponseTooLarge(usize),
}

impl ProtocolError {
    /// Returns true when the error just means the peer went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Result type for frame operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Reads exactly `N` header bytes, retrying partial reads.
async fn read_header_bytes<R, const N: usize>(reader: &mut R) -> ProtocolResult<[u8; N]>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; N];
    let mut filled = 0;

    while filled < N {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
            return Err(ProtocolError::IncompleteHeader {
                expected: N,
                received: filled,
            });
        }
        filled += n;
    }

    Ok(buf)
}

/// Reads a request header and checks its size against `max_size`.
///
/// No payload byte is consumed; the caller decides where the payload goes.
pub async fn read_request_header<R>(reader: &mut R, max_size: u32) -> ProtocolResult<RequestHeader>
where
    R: AsyncRead + Unpin,
{
    let buf = read_header_bytes::<_, REQUEST_HEADER_LEN>(reader).await?;
    let header = RequestHeader::decode(&buf);

    if header.size > max_size {
        return Err(ProtocolError::PayloadTooLarge {
            size: header.size,
            max: max_size,
        });
    }

    Ok(header)
}

/// Copies exactly `size` bytes from `reader` to `writer`.
///
/// Returns the number of bytes copied, which always equals `size` on success.
pub async fn copy_payload<R, W>(reader: &mut R, writer: &mut W, size: u32) -> ProtocolResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let expected = u64::from(size);
    let mut limited = reader.take(expected);
    let received = tokio::io::copy(&mut limited, &mut *writer).await?;

    if received != expected {
        return Err(ProtocolError::ShortRead { expected, received });
    }

    writer.flush().await?;
    Ok(received)
}

/// Writes a request frame, streaming the payload from `source`.
///
/// If `source` yields fewer than `header.size` bytes the frame on the wire is
/// incomplete and the stream must be discarded by the caller.
pub async fn write_request<W, S>(
    writer: &mut W,
    header: &RequestHeader,
    source: &mut S,
) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
    S: AsyncRead + Unpin,
{
    writer.write_all(&header.encode()).await?;

    let expected = u64::from(header.size);
    let mut limited = source.take(expected);
    let available = tokio::io::copy(&mut limited, &mut *writer).await?;

    if available != expected {
        return Err(ProtocolError::SourceExhausted {
            expected,
            available,
        });
    }

    writer.flush().await?;
    Ok(())
}

/// Reads a response frame, rejecting data larger than `max_size` before
/// allocating for it.
pub async fn read_response<R>(reader: &mut R, max_size: u32) -> ProtocolResult<(ResponseHeader, Bytes)>
where
    R: AsyncRead + Unpin,
{
    let buf = read_header_bytes::<_, RESPONSE_HEADER_LEN>(reader).await?;
    let header = ResponseHeader::decode(&buf);

    if header.data_len > max_size {
        return Err(ProtocolError::PayloadTooLarge {
            size: header.data_len,
            max: max_size,
        });
    }

    let expected = u64::from(header.data_len);
    let mut data = Vec::with_capacity(header.data_len as usize);
    let received = reader.take(expected).read_to_end(&mut data).await? as u64;

    if received != expected {
        return Err(ProtocolError::ShortRead { expected, received });
    }

    Ok((header, Bytes::from(data)))
}

/// Encodes a complete response frame into one buffer.
pub fn encode_response(id: u64, data: &[u8]) -> ProtocolResult<BytesMut> {
    let data_len =
        u32::try_from(data.len()).map_err(|_| ProtocolError::ResponseTooLarge(data.len()))?;

    let mut frame = BytesMut::with_capacity(RESPONSE_HEADER_LEN + data.len());
    frame.put_slice(&ResponseHeader::new(id, data_len).encode());
    frame.put_slice(data);
    Ok(frame)
}

/// Writes a response frame in a single write and flushes it.
///
/// Returns the number of bytes written.
pub async fn write_response<W>(writer: &mut W, id: u64, data: &[u8]) -> ProtocolResult<usize>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_response(id, data)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(frame.len())
}
