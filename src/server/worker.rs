//! Worker Pool
//!
//! A fixed number of tasks pull requests off the Dispatch Queue, one at a
//! time each, and run the resize handler on them.
//!
//! For every request a worker does exactly one of two things:
//! - on success, pushes a [`Response`] to the response writer;
//! - on failure, closes the origin connection and sends nothing.
//!
//! Either way the spooled upload is removed before the next request is
//! pulled.

use crate::handler::ResizeHandler;
use crate::server::request::{Request, Response};
use crate::server::ServerStats;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Handles of the running worker tasks.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers sharing one request queue.
    pub fn spawn(
        count: usize,
        requests: mpsc::Receiver<Request>,
        responses: mpsc::Sender<Response>,
        handler: Arc<dyn ResizeHandler>,
        stats: Arc<ServerStats>,
    ) -> Self {
        let requests = Arc::new(Mutex::new(requests));

        let handles = (0..count)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&requests),
                    responses.clone(),
                    Arc::clone(&handler),
                    Arc::clone(&stats),
                ))
            })
            .collect();

        Self { handles }
    }

    /// Number of workers in the pool.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits until every worker has stopped.
    ///
    /// Workers stop once the request queue is closed and empty.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    requests: Arc<Mutex<mpsc::Receiver<Request>>>,
    responses: mpsc::Sender<Response>,
    handler: Arc<dyn ResizeHandler>,
    stats: Arc<ServerStats>,
) {
    debug!(worker, "Worker started");

    loop {
        // The lock is only held while waiting for the next request.
        let next = requests.lock().await.recv().await;
        let Some(request) = next else {
            break;
        };

        process(worker, request, &responses, &handler, &stats).await;
    }

    debug!(worker, "Worker stopped");
}

/// Runs the handler on one request and routes the outcome.
///
/// The handler runs in its own task, so a panicking handler fails only its
/// request: the request is dropped while unwinding, which closes the origin
/// and removes the spool file, and the worker carries on.
async fn process(
    worker: usize,
    request: Request,
    responses: &mpsc::Sender<Response>,
    handler: &Arc<dyn ResizeHandler>,
    stats: &ServerStats,
) {
    let id = request.id();
    let conn = request.conn_id();
    let handler = Arc::clone(handler);

    let handled = tokio::spawn(async move {
        let outcome = handler.handle(&request).await;
        (request, outcome)
    })
    .await;

    let (request, outcome) = match handled {
        Ok(handled) => handled,
        Err(e) => {
            stats.request_failed();
            error!(worker, id, conn, error = %e, "Resize handler panicked, connection closed");
            return;
        }
    };

    let (header, payload, mut origin) = request.into_parts();
    payload.release().await;

    match outcome {
        Ok(data) => {
            stats.request_completed();
            debug!(worker, id = header.id, bytes = data.len(), "Request completed");

            let response = Response::new(header.id, data, origin);
            if let Err(mpsc::error::SendError(response)) = responses.send(response).await {
                warn!(worker, id = response.id, "Response writer gone, closing connection");
                stats.response_dropped();
            }
        }
        Err(e) => {
            stats.request_failed();
            warn!(
                worker,
                id = header.id,
                conn = origin.conn_id(),
                error = %e,
                "Resize failed, closing connection"
            );
            let _ = origin.stream().shutdown().await;
        }
    }
}
