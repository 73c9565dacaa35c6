//! Server-side Request and Response Records
//!
//! A [`Request`] exists from the moment its header and payload have been
//! received until a worker is done with it. A [`Response`] exists from a
//! successful resize until the writer has sent it.
//!
//! Both records carry the [`Origin`] connection so the answer goes back to
//! the right peer. The origin is a move-only token: whoever holds the record
//! is the only party that may write to or close the connection, and dropping
//! it closes the connection. This gives each accepted request exactly one
//! outcome, either one response or one close.

use crate::net::Connection;
use crate::protocol::RequestHeader;
use crate::spool::SpooledPayload;
use bytes::Bytes;
use std::path::Path;

/// The connection a request arrived on.
#[derive(Debug)]
pub struct Origin {
    conn_id: u64,
    stream: Connection,
}

impl Origin {
    pub(crate) fn new(conn_id: u64, stream: Connection) -> Self {
        Self { conn_id, stream }
    }

    /// Server-local id of the connection, for logging.
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub(crate) fn stream(&mut self) -> &mut Connection {
        &mut self.stream
    }

    /// Waits until the peer sends more data or hangs up.
    pub(crate) async fn readable(&self) -> std::io::Result<()> {
        self.stream.readable().await
    }
}

/// A fully received resize request.
#[derive(Debug)]
pub struct Request {
    header: RequestHeader,
    payload: SpooledPayload,
    pub(crate) origin: Origin,
}

impl Request {
    pub(crate) fn new(header: RequestHeader, payload: SpooledPayload, origin: Origin) -> Self {
        Self {
            header,
            payload,
            origin,
        }
    }

    /// Correlation id assigned by the server.
    pub fn id(&self) -> u64 {
        self.header.id
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u32 {
        self.header.size
    }

    /// Target width.
    pub fn width(&self) -> u32 {
        self.header.width
    }

    /// Target height.
    pub fn height(&self) -> u32 {
        self.header.height
    }

    /// True when no resize is wanted, only a format conversion.
    pub fn is_format_only(&self) -> bool {
        self.header.is_format_only()
    }

    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    /// Path of the spooled upload. Valid for the duration of the handler call.
    pub fn source_path(&self) -> &Path {
        self.payload.path()
    }

    /// Connection id of the origin, for logging.
    pub fn conn_id(&self) -> u64 {
        self.origin.conn_id()
    }

    pub(crate) fn into_parts(self) -> (RequestHeader, SpooledPayload, Origin) {
        (self.header, self.payload, self.origin)
    }
}

/// A completed resize, waiting to be written back.
#[derive(Debug)]
pub struct Response {
    pub id: u64,
    pub data: Bytes,
    pub(crate) origin: Origin,
}

impl Response {
    pub(crate) fn new(id: u64, data: Bytes, origin: Origin) -> Self {
        Self { id, data, origin }
    }
}
