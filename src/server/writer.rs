//! Response Writer
//!
//! A single task drains the queue of finished responses and writes each one
//! back to its origin connection. Frames are written one after another, so
//! no two responses ever interleave.
//!
//! A failed write is not retried: the response is dropped and the
//! connection closed, and the peer sees a short or missing frame.
//!
//! A peer that stops reading can hold up every other response once its
//! socket buffer is full. `write_timeout`, when set, bounds how long one
//! frame may take; a frame that misses it is dropped like a failed write.
//!
//! With keep-alive enabled, a connection whose response went out is watched
//! until the peer sends its next request and is then handed back to the
//! accept loop. Idle connections are closed after `idle_timeout`.

use crate::protocol::write_response;
use crate::server::request::{Origin, Response};
use crate::server::ServerStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Settings for handing connections back to the accept loop.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    pub returned: mpsc::Sender<Origin>,
    pub idle_timeout: Duration,
}

/// Handle of the running writer task.
#[derive(Debug)]
pub struct ResponseWriter {
    handle: JoinHandle<()>,
}

impl ResponseWriter {
    /// Spawns the writer. It runs until every response sender is dropped.
    pub fn spawn(
        responses: mpsc::Receiver<Response>,
        keep_alive: Option<KeepAlive>,
        write_timeout: Option<Duration>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            handle: tokio::spawn(writer_loop(responses, keep_alive, write_timeout, stats)),
        }
    }

    /// Waits until the writer has sent every queued response.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "Response writer task failed");
        }
    }
}

async fn writer_loop(
    mut responses: mpsc::Receiver<Response>,
    keep_alive: Option<KeepAlive>,
    write_timeout: Option<Duration>,
    stats: Arc<ServerStats>,
) {
    while let Some(response) = responses.recv().await {
        let Response {
            id,
            data,
            mut origin,
        } = response;
        let conn = origin.conn_id();

        let write = write_response(origin.stream(), id, &data);
        let written = match write_timeout {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(written) => written,
                Err(_) => {
                    stats.response_dropped();
                    warn!(id, conn, timeout = ?limit, "Response write timed out, closing connection");
                    continue;
                }
            },
            None => write.await,
        };

        match written {
            Ok(written) => {
                stats.response_written(written);
                debug!(id, conn, bytes = written, "Response sent");

                match &keep_alive {
                    Some(keep_alive) => {
                        tokio::spawn(rearm(origin, keep_alive.clone()));
                    }
                    None => {
                        let _ = origin.stream().shutdown().await;
                    }
                }
            }
            Err(e) => {
                stats.response_dropped();
                if e.is_disconnect() {
                    debug!(id, conn, error = %e, "Client gone before response");
                } else {
                    warn!(id, conn, error = %e, "Failed to write response");
                }
            }
        }
    }

    debug!("Response writer stopped");
}

/// Waits for the peer's next request and returns the connection to the
/// accept loop.
async fn rearm(origin: Origin, keep_alive: KeepAlive) {
    let conn = origin.conn_id();

    match tokio::time::timeout(keep_alive.idle_timeout, origin.readable()).await {
        Ok(Ok(())) => {
            if keep_alive.returned.send(origin).await.is_err() {
                trace!(conn, "Accept loop gone, closing connection");
            }
        }
        Ok(Err(e)) => debug!(conn, error = %e, "Kept-alive connection failed"),
        Err(_) => debug!(conn, "Idle connection closed"),
    }
}
