//! Accept Loop
//!
//! The accept loop takes one connection at a time, receives exactly one
//! request from it and pushes the request onto the Dispatch Queue.
//!
//! ## Per-connection Flow
//!
//! ```text
//! accept() or kept-alive connection
//!        │
//!        ▼
//! read 20 byte header ── size > max_size ──> close, keep accepting
//!        │
//!        ▼
//! assign correlation id, create spool file
//!        │
//!        ▼
//! copy exactly `size` bytes ── short read ──> close, remove spool file
//!        │
//!        ▼
//! push onto Dispatch Queue (waits while the queue is full)
//! ```
//!
//! Errors on one connection are logged and never end the loop. Neither do
//! transient `accept()` errors such as an aborted handshake or running out
//! of file descriptors. Any other `accept()` failure, or a Dispatch Queue
//! with no workers left, ends it.

use crate::config::ServerConfig;
use crate::net::{Connection, Listener};
use crate::protocol::{copy_payload, read_request_header, REQUEST_HEADER_LEN};
use crate::server::request::{Origin, Request};
use crate::server::{ServerError, ServerStats};
use crate::spool::SpooledPayload;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Pause before accepting again when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Returns true for accept errors that concern one connection or a passing
/// resource shortage rather than the listener itself.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) || is_fd_exhaustion(e)
}

/// EMFILE or ENFILE.
fn is_fd_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(23) | Some(24))
}

/// Where the next connection to receive from comes from.
enum Incoming {
    Accepted(io::Result<Connection>),
    Returned(Origin),
}

/// Owns the listener and feeds the Dispatch Queue.
pub struct Dispatcher {
    listener: Listener,
    requests: mpsc::Sender<Request>,
    returned: mpsc::Receiver<Origin>,
    stats: Arc<ServerStats>,
    max_size: u32,
    spool_dir: PathBuf,
    receive_timeout: Option<Duration>,
    /// Last correlation id handed out
    last_id: u64,
}

impl Dispatcher {
    pub fn new(
        config: &ServerConfig,
        listener: Listener,
        requests: mpsc::Sender<Request>,
        returned: mpsc::Receiver<Origin>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            listener,
            requests,
            returned,
            stats,
            max_size: config.max_size,
            spool_dir: config.temp_dir.clone(),
            receive_timeout: config.receive_timeout(),
            last_id: 0,
        }
    }

    /// Runs the accept loop until `accept()` fails.
    ///
    /// Dropping the returned future (or its completion) drops the queue
    /// sender, which lets the workers drain and stop.
    pub async fn run(mut self) -> Result<(), ServerError> {
        info!("Accepting connections");

        loop {
            let incoming = tokio::select! {
                biased;
                Some(origin) = self.returned.recv() => Incoming::Returned(origin),
                accepted = self.listener.accept() => Incoming::Accepted(accepted),
            };

            let origin = match incoming {
                Incoming::Returned(origin) => {
                    trace!(conn = origin.conn_id(), "Connection returned for another request");
                    origin
                }
                Incoming::Accepted(Ok(stream)) => {
                    let conn_id = self.stats.connection_opened();
                    debug!(conn = conn_id, "Connection accepted");
                    Origin::new(conn_id, stream)
                }
                Incoming::Accepted(Err(e)) if is_transient(&e) => {
                    warn!(error = %e, "Failed to accept connection, retrying");
                    if is_fd_exhaustion(&e) {
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    continue;
                }
                Incoming::Accepted(Err(e)) => {
                    error!(error = %e, "Failed to accept connection");
                    return Err(ServerError::Accept(e));
                }
            };

            let conn_id = origin.conn_id();
            let request = match self.receive(origin).await {
                Ok(request) => request,
                Err(e) if e.is_disconnect() => {
                    debug!(conn = conn_id, "Client disconnected");
                    continue;
                }
                Err(e) => {
                    warn!(conn = conn_id, error = %e, "Rejected request");
                    self.stats.request_rejected();
                    continue;
                }
            };

            debug!(conn = conn_id, request = %request.header(), "Request received");

            if let Err(mpsc::error::SendError(request)) = self.requests.send(request).await {
                // The request and its connection are dropped here.
                error!(id = request.id(), "Dispatch queue closed, no workers left");
                return Err(ServerError::QueueClosed);
            }
            self.stats.request_queued();
        }
    }

    /// Receives one request, bounded by the receive timeout if configured.
    async fn receive(&mut self, origin: Origin) -> Result<Request, ServerError> {
        match self.receive_timeout {
            Some(limit) => tokio::time::timeout(limit, self.receive_request(origin))
                .await
                .map_err(|_| ServerError::ReceiveTimeout(limit))?,
            None => self.receive_request(origin).await,
        }
    }

    /// Reads header and payload. On any error the origin is dropped, which
    /// closes the connection, and a partly written spool file is removed.
    async fn receive_request(&mut self, mut origin: Origin) -> Result<Request, ServerError> {
        let mut header = read_request_header(origin.stream(), self.max_size).await?;

        self.last_id = self.last_id.wrapping_add(1);
        header.id = self.last_id;

        let (mut payload, mut file) = SpooledPayload::create(&self.spool_dir, header.id)
            .await
            .map_err(ServerError::Spool)?;

        let received = copy_payload(origin.stream(), &mut file, header.size).await?;
        payload.set_size(received);
        self.stats.bytes_read(REQUEST_HEADER_LEN as u64 + received);

        Ok(Request::new(header, payload, origin))
    }
}
