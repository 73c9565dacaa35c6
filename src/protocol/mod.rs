//! Wire Protocol Implementation
//!
//! This module implements the binary framing spoken between thumbnail
//! clients and the server.
//!
//! ## Overview
//!
//! Every message is a fixed-size big-endian header followed by a raw byte
//! payload whose length the header declares. A connection carries one frame
//! at a time in each direction: one request in, one response out.
//!
//! ## Modules
//!
//! - `types`: Request/response headers and their byte layout
//! - `codec`: Async frame readers and writers with size and short-read checks
//!
//! ## Example
//!
//! ```ignore
//! use thumbnailer::protocol::{read_request_header, write_response};
//!
//! let header = read_request_header(&mut stream, config.max_size).await?;
//! // ... spool header.size bytes, resize ...
//! write_response(&mut stream, header.id, &thumbnail).await?;
//! ```

pub mod codec;
pub mod types;

// Re-export commonly used types for convenience
pub use codec::{
    copy_payload, encode_response, read_request_header, read_response, write_request,
    write_response, ProtocolError, ProtocolResult,
};
pub use types::{RequestHeader, ResponseHeader, REQUEST_HEADER_LEN, RESPONSE_HEADER_LEN};
