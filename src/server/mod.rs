//! Thumbnail Server
//!
//! This module wires the listening socket, the Dispatch Queue, the worker
//! pool and the response writer into one pipeline.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────┐
//!  connections ─>│     accept loop      │  (dispatch.rs, sequential)
//!        ▲       │ read header+payload  │
//!        │       │ spool, assign id     │
//!        │       └──────────┬───────────┘
//!        │                  │ Dispatch Queue (bounded mpsc, blocks when full)
//!        │                  ▼
//!        │       ┌──────────────────────┐
//!        │       │   worker 0 .. N-1    │  (worker.rs)
//!        │       │  ResizeHandler call  │──── failure: close origin
//!        │       └──────────┬───────────┘
//!        │                  │ response queue (bounded mpsc)
//!        │                  ▼
//!        │       ┌──────────────────────┐
//!        └───────│   response writer    │  (writer.rs, sequential)
//!     keep-alive └──────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! `Initializing` ([`Server::bind`]) → `Listening` → `Accepting` ⇄
//! `Receiving one connection` → `Shutdown`.
//!
//! The accept loop is single-threaded: a client that sends its request slowly
//! holds up acceptance of new connections. `receive_timeout` bounds that
//! stall when set.
//!
//! ## Shutdown
//!
//! When the accept loop stops, either on a fatal accept error or on the
//! shutdown future, queued work is drained: workers finish every request
//! already in the Dispatch Queue and the writer sends every finished
//! response before [`Server::serve_with_shutdown`] returns. A request that is
//! still being received or pushed at that moment is dropped, which closes its
//! connection and removes its spool file.

pub mod dispatch;
pub mod request;
pub mod worker;
pub mod writer;

pub use request::{Origin, Request, Response};
pub use worker::WorkerPool;
pub use writer::ResponseWriter;

use crate::config::{ConfigError, ServerConfig};
use crate::handler::{ConvertHandler, ResizeHandler};
use crate::net::{Endpoint, Listener};
use crate::protocol::ProtocolError;
use dispatch::Dispatcher;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;
use writer::KeepAlive;

/// Capacity of the channel that hands kept-alive connections back to the
/// accept loop.
const RETURNED_QUEUE_CAPACITY: usize = 64;

/// Errors produced by the server.
///
/// Only `Config`, `Bind`, `Accept` and `QueueClosed` ever leave [`Server`]; the rest are
/// local to one connection and are logged by the accept loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configuration is unusable
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The listening socket could not be bound
    #[error("cannot listen on {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting a connection failed; fatal to the accept loop
    #[error("accept failed: {0}")]
    Accept(std::io::Error),

    /// A connection broke the protocol or went away
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The payload could not be spooled
    #[error("spool error: {0}")]
    Spool(std::io::Error),

    /// A connection did not deliver its request in time
    #[error("request not received within {0:?}")]
    ReceiveTimeout(Duration),

    /// Every worker is gone; fatal to the accept loop
    #[error("dispatch queue closed")]
    QueueClosed,
}

impl ServerError {
    /// Returns true when the error just means the peer went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ServerError::Protocol(e) if e.is_disconnect())
    }
}

/// Statistics for the server pipeline
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Requests pushed onto the Dispatch Queue
    pub requests_queued: AtomicU64,
    /// Connections closed because their request could not be received
    pub requests_rejected: AtomicU64,
    /// Requests the handler completed
    pub requests_completed: AtomicU64,
    /// Requests the handler failed
    pub requests_failed: AtomicU64,
    /// Responses written to their connection
    pub responses_written: AtomicU64,
    /// Responses that could not be written
    pub responses_dropped: AtomicU64,
    /// Total request bytes read
    pub bytes_read: AtomicU64,
    /// Total response bytes written
    pub bytes_written: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a new connection and returns its id (starting at 1).
    pub fn connection_opened(&self) -> u64 {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn request_queued(&self) {
        self.requests_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_completed(&self) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_written(&self, bytes: usize) {
        self.responses_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn response_dropped(&self) {
        self.responses_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: u64) {
        self.bytes_read.fetch_add(count, Ordering::Relaxed);
    }
}

/// A bound thumbnail server.
pub struct Server {
    config: ServerConfig,
    listener: Listener,
    handler: Arc<dyn ResizeHandler>,
    stats: Arc<ServerStats>,
}

impl Server {
    /// Validates the configuration and binds the listening socket.
    ///
    /// Failure here is final; the bind is not retried.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let endpoint = config.endpoint();
        let listener = Listener::bind(&endpoint)
            .await
            .map_err(|source| ServerError::Bind {
                endpoint: endpoint.to_string(),
                source,
            })?;
        info!(endpoint = %endpoint, "Listening");

        let handler = Arc::new(ConvertHandler::new(config.convert_config()));

        Ok(Self {
            config,
            listener,
            handler,
            stats: Arc::new(ServerStats::new()),
        })
    }

    /// Replaces the default conversion handler.
    pub fn with_handler<H>(mut self, handler: H) -> Self
    where
        H: ResizeHandler + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    /// The endpoint the server is actually bound to.
    pub fn local_endpoint(&self) -> std::io::Result<Endpoint> {
        self.listener.local_endpoint()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared pipeline statistics.
    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Serves until accepting a connection fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serves until accepting fails or `shutdown` resolves, then drains the
    /// queued work.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Server {
            config,
            listener,
            handler,
            stats,
        } = self;

        let (request_tx, request_rx) = mpsc::channel(config.queue_capacity);
        let (response_tx, response_rx) = mpsc::channel(config.response_queue_capacity);
        let (returned_tx, returned_rx) = mpsc::channel(RETURNED_QUEUE_CAPACITY);

        let workers = WorkerPool::spawn(
            config.num_workers,
            request_rx,
            response_tx,
            handler,
            Arc::clone(&stats),
        );

        let keep_alive = config.keep_alive.then(|| KeepAlive {
            returned: returned_tx,
            idle_timeout: config.idle_timeout(),
        });
        let writer = ResponseWriter::spawn(
            response_rx,
            keep_alive,
            config.write_timeout(),
            Arc::clone(&stats),
        );

        info!(
            workers = config.num_workers,
            queue = config.queue_capacity,
            max_size = config.max_size,
            "Server ready"
        );

        let dispatcher = Dispatcher::new(&config, listener, request_tx, returned_rx, Arc::clone(&stats));

        let result = tokio::select! {
            result = dispatcher.run() => result,
            _ = shutdown => {
                info!("Shutdown signal received, stopping accept loop");
                Ok(())
            }
        };

        info!("Draining queued requests");
        workers.join().await;
        writer.join().await;
        info!("Server stopped");

        result
    }
}
