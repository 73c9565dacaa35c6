//! # Thumbnailer - An Image Resizing Service
//!
//! Thumbnailer accepts raw images over a small binary protocol, resizes them
//! with an external conversion backend and sends the encoded result back on
//! the same connection. The crate contains both the server and a client.
//!
//! ## Features
//!
//! - **Binary Framing**: Fixed 20 byte request and 12 byte response headers
//! - **Bounded Concurrency**: A fixed worker pool behind a bounded Dispatch
//!   Queue, so a burst of uploads applies back-pressure instead of memory
//! - **TCP or Unix Sockets**: The same protocol over either transport
//! - **Keep-Alive**: A client may send several requests on one connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Thumbnailer                                │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ Accept Loop │───>│  Dispatch   │───>│ Worker Pool │                  │
//! │  │ (Listener)  │    │   Queue     │    │ (N workers) │                  │
//! │  └──────▲──────┘    └─────────────┘    └──────┬──────┘                  │
//! │         │                                     │                         │
//! │         │ keep-alive                          ▼                         │
//! │  ┌──────┴──────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Response   │<───│  Response   │<───│   Resize    │                  │
//! │  │   Writer    │    │   Queue     │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └─────────────┘                  │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐                                     │
//! │  │  Protocol   │    │    Spool    │  uploads on disk, removed after     │
//! │  │   Codec     │    │  Directory  │  each request                       │
//! │  └─────────────┘    └─────────────┘                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use thumbnailer::{Client, Endpoint, Server, ServerConfig};
//! use thumbnailer::net::Network;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::new(Network::Tcp, "127.0.0.1:9000", 1 << 20, 4, "/tmp");
//!     let server = Server::bind(config).await?;
//!     let endpoint = server.local_endpoint()?;
//!     tokio::spawn(server.serve());
//!
//!     let mut client = Client::new(endpoint);
//!     let thumbnail = client.resize_file("photo.png", 150, 150).await?;
//!     std::fs::write("thumbnail.jpg", &thumbnail)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Wire format of requests and responses
//! - [`net`]: TCP and Unix socket transport
//! - [`spool`]: Uploaded payloads persisted in the spool directory
//! - [`handler`]: The resize capability and its ImageMagick implementation
//! - [`server`]: Accept loop, worker pool and response writer
//! - [`client`]: Connection-reusing client
//! - [`config`]: Server configuration file
//!
//! ## Design Highlights
//!
//! ### One Outcome Per Request
//!
//! A request owns its origin connection until it is answered. Whoever holds
//! the request (accept loop, queue, worker, writer) is the only party that
//! can write to or close that connection, and dropping it closes the
//! connection. Every accepted request therefore ends in exactly one response
//! or one close, never both and never neither.
//!
//! ### Back-Pressure
//!
//! The Dispatch Queue is a bounded channel. When every worker is busy and the
//! queue is full, the accept loop waits on the push and stops accepting,
//! which leaves further connections in the kernel backlog.

pub mod client;
pub mod config;
pub mod handler;
pub mod net;
pub mod protocol;
pub mod server;
pub mod spool;

// Re-export commonly used types for convenience
pub use client::{Client, ClientError};
pub use config::{ConfigError, ServerConfig};
pub use handler::{ConvertHandler, HandlerError, ResizeHandler};
pub use net::{Endpoint, Network};
pub use protocol::{ProtocolError, RequestHeader, ResponseHeader};
pub use server::{Request, Response, Server, ServerError, ServerStats};

/// The default config file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/thumbnailer.toml";

/// Version of Thumbnailer
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
