//! Wire Frame Headers
//!
//! This module defines the fixed-layout headers that prefix every frame.
//! All integers are big-endian and there is no padding between fields.
//!
//! ## Protocol Format
//!
//! ```text
//! Request frame (20 byte header):
//! ┌──────────┬──────────┬──────────┬──────────┬─────────────────┐
//! │ id (8)   │ size (4) │ width(4) │height(4) │ payload (size)  │
//! └──────────┴──────────┴──────────┴──────────┴─────────────────┘
//!
//! Response frame (12 byte header):
//! ┌──────────┬──────────────┬──────────────────┐
//! │ id (8)   │ data_len (4) │ data (data_len)  │
//! └──────────┴──────────────┴──────────────────┘
//! ```
//!
//! The header is always read in full before any field is interpreted. There
//! is no version field; incompatible changes need client and server builds
//! to be upgraded together.

use bytes::{Buf, BufMut};
use std::fmt;

/// Length of an encoded request header.
pub const REQUEST_HEADER_LEN: usize = 20;

/// Length of an encoded response header.
pub const RESPONSE_HEADER_LEN: usize = 12;

/// Header of a request frame.
///
/// `id` is a correlation token. Clients send whatever they like (usually 0);
/// the server replaces it with its own counter value on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestHeader {
    /// Correlation id
    pub id: u64,
    /// Exact number of payload bytes following the header
    pub size: u32,
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
}

impl RequestHeader {
    /// Creates a header for a client request. The id is left at zero.
    pub fn new(size: u32, width: u32, height: u32) -> Self {
        Self {
            id: 0,
            size,
            width,
            height,
        }
    }

    /// Both dimensions zero means "convert the format, keep the size".
    pub fn is_format_only(&self) -> bool {
        self.width == 0 && self.height == 0
    }

    /// Encodes the header into its 20 byte wire form.
    pub fn encode(&self) -> [u8; REQUEST_HEADER_LEN] {
        let mut buf = [0u8; REQUEST_HEADER_LEN];
        let mut cursor = &mut buf[..];
        cursor.put_u64(self.id);
        cursor.put_u32(self.size);
        cursor.put_u32(self.width);
        cursor.put_u32(self.height);
        buf
    }

    /// Decodes a header from its 20 byte wire form.
    pub fn decode(buf: &[u8; REQUEST_HEADER_LEN]) -> Self {
        let mut cursor = &buf[..];
        Self {
            id: cursor.get_u64(),
            size: cursor.get_u32(),
            width: cursor.get_u32(),
            height: cursor.get_u32(),
        }
    }
}

impl fmt::Display for RequestHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_format_only() {
            write!(f, "#{} ({} bytes, format only)", self.id, self.size)
        } else {
            write!(
                f,
                "#{} ({} bytes, {}x{})",
                self.id, self.size, self.width, self.height
            )
        }
    }
}

/// Header of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseHeader {
    /// Correlation id, equal to the id of the answered request
    pub id: u64,
    /// Exact number of data bytes following the header
    pub data_len: u32,
}

impl ResponseHeader {
    pub fn new(id: u64, data_len: u32) -> Self {
        Self { id, data_len }
    }

    /// Encodes the header into its 12 byte wire form.
    pub fn encode(&self) -> [u8; RESPONSE_HEADER_LEN] {
        let mut buf = [0u8; RESPONSE_HEADER_LEN];
        let mut cursor = &mut buf[..];
        cursor.put_u64(self.id);
        cursor.put_u32(self.data_len);
        buf
    }

    /// Decodes a header from its 12 byte wire form.
    pub fn decode(buf: &[u8; RESPONSE_HEADER_LEN]) -> Self {
        let mut cursor = &buf[..];
        Self {
            id: cursor.get_u64(),
            data_len: cursor.get_u32(),
        }
    }
}
