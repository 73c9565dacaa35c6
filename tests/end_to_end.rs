//! End-to-end tests: a real server on a loopback socket, driven by the
//! client and by raw protocol frames.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thumbnailer::net::Connection;
use thumbnailer::protocol::{read_response, write_request};
use thumbnailer::spool::count_spooled;
use thumbnailer::{
    Client, ClientError, Endpoint, HandlerError, Network, Request, RequestHeader, ResizeHandler,
    Server, ServerConfig, ServerError, ServerStats,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;

/// Answers with `width * 10` bytes of 0xAB and fails for width 13.
/// Waits on `gate` first when one is set.
#[derive(Default)]
struct Stub {
    gate: Option<Arc<Semaphore>>,
    seen: Mutex<Vec<u64>>,
}

impl Stub {
    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ResizeHandler for Stub {
    async fn handle(&self, request: &Request) -> Result<Bytes, HandlerError> {
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| HandlerError::Other(e.to_string()))?;
        }

        self.seen.lock().unwrap().push(request.id());

        let upload = tokio::fs::read(request.source_path()).await?;
        if upload.len() != request.size() as usize {
            return Err(HandlerError::Other("spool file incomplete".into()));
        }
        if request.width() == 13 {
            return Err(HandlerError::Other("unlucky width".into()));
        }
        Ok(Bytes::from(vec![0xAB; request.width() as usize * 10]))
    }
}

struct Running {
    endpoint: Endpoint,
    stats: Arc<ServerStats>,
    spool: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl Running {
    async fn stop(mut self) -> Result<(), ServerError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}

fn spool_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("thumb-e2e-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config(spool: &Path, max_size: u32, workers: usize) -> ServerConfig {
    ServerConfig::new(Network::Tcp, "127.0.0.1:0", max_size, workers, spool)
}

async fn start<H: ResizeHandler + 'static>(config: ServerConfig, handler: H) -> Running {
    let spool = config.temp_dir.clone();
    let server = Server::bind(config).await.unwrap().with_handler(handler);
    let endpoint = server.local_endpoint().unwrap();
    let stats = server.stats();

    let (tx, rx) = oneshot::channel();
    let task = tokio::spawn(server.serve_with_shutdown(async {
        let _ = rx.await;
    }));

    Running {
        endpoint,
        stats,
        spool,
        shutdown: Some(tx),
        task,
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_resize_round_trip() {
    let server = start(config(&spool_dir("basic"), 1 << 20, 2), Stub::default()).await;
    let mut client = Client::new(server.endpoint.clone());

    let image = vec![0x42u8; 4096];
    let thumbnail = client.resize(&image, 150, 150).await.unwrap();
    assert_eq!(thumbnail.len(), 1500);
    assert!(thumbnail.iter().all(|&b| b == 0xAB));

    assert_eq!(server.stats.requests_completed.load(Ordering::Relaxed), 1);
    assert_eq!(
        server.stats.bytes_read.load(Ordering::Relaxed),
        20 + 4096
    );

    let spool = server.spool.clone();
    server.stop().await.unwrap();
    assert_eq!(count_spooled(&spool).unwrap(), 0);
}

#[tokio::test]
async fn test_keep_alive_reuses_connection() {
    let server = start(config(&spool_dir("reuse"), 1 << 20, 1), Stub::default()).await;
    let mut client = Client::new(server.endpoint.clone());

    for width in 1..=3 {
        let thumbnail = client.resize(b"image", width, width).await.unwrap();
        assert_eq!(thumbnail.len(), width as usize * 10);
    }

    assert_eq!(server.stats.connections_accepted.load(Ordering::Relaxed), 1);
    assert_eq!(server.stats.responses_written.load(Ordering::Relaxed), 3);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_without_keep_alive_client_redials() {
    let mut config = config(&spool_dir("no-keepalive"), 1 << 20, 1);
    config.keep_alive = false;
    let server = start(config, Stub::default()).await;
    let mut client = Client::new(server.endpoint.clone());

    assert_eq!(client.resize(b"one", 2, 2).await.unwrap().len(), 20);

    // The server closed after the first response, so this call fails and the
    // next one dials again.
    assert!(client.resize(b"two", 2, 2).await.is_err());
    assert!(!client.is_connected());
    assert_eq!(client.resize(b"three", 2, 2).await.unwrap().len(), 20);

    assert_eq!(server.stats.connections_accepted.load(Ordering::Relaxed), 2);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_oversized_request_rejected() {
    let server = start(config(&spool_dir("oversized"), 1024, 1), Stub::default()).await;
    let mut client = Client::new(server.endpoint.clone());

    let result = client.resize(&[0u8; 1025], 10, 10).await;
    assert!(result.is_err());
    assert!(!client.is_connected());

    // Rejected before anything was spooled.
    let stats = Arc::clone(&server.stats);
    wait_for(|| stats.requests_rejected.load(Ordering::Relaxed) == 1).await;
    assert_eq!(count_spooled(&server.spool).unwrap(), 0);

    // A request at the limit still works, on a new connection.
    let thumbnail = client.resize(&[0u8; 1024], 10, 10).await.unwrap();
    assert_eq!(thumbnail.len(), 100);

    assert_eq!(server.stats.requests_rejected.load(Ordering::Relaxed), 1);
    assert_eq!(server.stats.connections_accepted.load(Ordering::Relaxed), 2);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_handler_failure_closes_connection() {
    let server = start(config(&spool_dir("failure"), 1 << 20, 1), Stub::default()).await;
    let mut client = Client::new(server.endpoint.clone());

    let result = client.resize(b"image", 13, 13).await;
    assert!(matches!(result, Err(ClientError::Protocol(_))));
    assert!(!client.is_connected());

    assert_eq!(client.resize(b"image", 4, 4).await.unwrap().len(), 40);

    assert_eq!(server.stats.requests_failed.load(Ordering::Relaxed), 1);
    assert_eq!(server.stats.responses_written.load(Ordering::Relaxed), 1);

    let spool = server.spool.clone();
    server.stop().await.unwrap();
    assert_eq!(count_spooled(&spool).unwrap(), 0);
}

/// Panics on its first call, then answers like [`Stub`].
#[derive(Default)]
struct PanicsOnce {
    panicked: AtomicBool,
    inner: Stub,
}

#[async_trait]
impl ResizeHandler for PanicsOnce {
    async fn handle(&self, request: &Request) -> Result<Bytes, HandlerError> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("first call");
        }
        self.inner.handle(request).await
    }
}

#[tokio::test]
async fn test_handler_panic_keeps_server_running() {
    let server = start(config(&spool_dir("panic"), 1 << 20, 1), PanicsOnce::default()).await;
    let mut client = Client::new(server.endpoint.clone());

    assert!(client.resize(b"image", 3, 3).await.is_err());
    assert_eq!(client.resize(b"image", 3, 3).await.unwrap().len(), 30);
    assert!(!server.task.is_finished());

    assert_eq!(server.stats.requests_failed.load(Ordering::Relaxed), 1);
    assert_eq!(server.stats.requests_completed.load(Ordering::Relaxed), 1);

    let spool = server.spool.clone();
    server.stop().await.unwrap();
    assert_eq!(count_spooled(&spool).unwrap(), 0);
}

#[tokio::test]
async fn test_server_assigns_unique_ids() {
    let handler = Arc::new(Stub::default());
    let server = start(config(&spool_dir("ids"), 1 << 20, 2), Arc::clone(&handler)).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let mut conn = Connection::connect(&server.endpoint).await.unwrap();

        // The id the client puts on the wire is ignored.
        let mut header = RequestHeader::new(3, 1, 1);
        header.id = 999;
        let mut body: &[u8] = b"abc";
        write_request(&mut conn, &header, &mut body).await.unwrap();

        let (response, data) = read_response(&mut conn, 1024).await.unwrap();
        assert_eq!(data.len(), 10);
        ids.push(response.id);
    }

    assert_eq!(ids, vec![1, 2, 3]);
    let mut seen = handler.seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, ids);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_truncated_upload_cleaned_up() {
    let server = start(config(&spool_dir("truncated"), 1 << 20, 1), Stub::default()).await;

    let mut conn = Connection::connect(&server.endpoint).await.unwrap();
    conn.write_all(&RequestHeader::new(100, 1, 1).encode())
        .await
        .unwrap();
    conn.write_all(&[0u8; 10]).await.unwrap();
    drop(conn);

    let stats = Arc::clone(&server.stats);
    wait_for(|| stats.requests_rejected.load(Ordering::Relaxed) == 1).await;
    assert_eq!(count_spooled(&server.spool).unwrap(), 0);

    // The server keeps accepting.
    let mut client = Client::new(server.endpoint.clone());
    assert_eq!(client.resize(b"ok", 1, 1).await.unwrap().len(), 10);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_back_pressure_stops_accepting() {
    let gate = Arc::new(Semaphore::new(0));
    let mut config = config(&spool_dir("backpressure"), 1 << 20, 1);
    config.queue_capacity = 1;
    let server = start(config, Stub::gated(Arc::clone(&gate))).await;

    // One request in the worker, one in the queue, one held by the accept
    // loop waiting to push. The fourth is not accepted at all.
    let mut clients = Vec::new();
    for i in 0..4u32 {
        let endpoint = server.endpoint.clone();
        clients.push(tokio::spawn(async move {
            let mut client = Client::new(endpoint);
            client.resize(&[i as u8; 64], 1, 1).await
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let stats = Arc::clone(&server.stats);
    wait_for(|| stats.connections_accepted.load(Ordering::Relaxed) == 3).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stats.requests_queued.load(Ordering::Relaxed), 2);
    assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 3);
    assert_eq!(stats.requests_completed.load(Ordering::Relaxed), 0);

    gate.add_permits(4);
    for client in clients {
        assert_eq!(client.await.unwrap().unwrap().len(), 10);
    }
    assert_eq!(stats.requests_completed.load(Ordering::Relaxed), 4);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_drains_queued_requests() {
    let gate = Arc::new(Semaphore::new(0));
    let server = start(
        config(&spool_dir("drain"), 1 << 20, 1),
        Stub::gated(Arc::clone(&gate)),
    )
    .await;

    let mut clients = Vec::new();
    for _ in 0..2 {
        let endpoint = server.endpoint.clone();
        clients.push(tokio::spawn(async move {
            Client::new(endpoint).resize(b"queued", 5, 5).await
        }));
    }

    let stats = Arc::clone(&server.stats);
    wait_for(|| stats.requests_queued.load(Ordering::Relaxed) == 2).await;

    let spool = server.spool.clone();
    let endpoint = server.endpoint.clone();
    let stopping = tokio::spawn(server.stop());

    // Give the accept loop time to stop before releasing the workers.
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.add_permits(2);

    for client in clients {
        assert_eq!(client.await.unwrap().unwrap().len(), 50);
    }
    stopping.await.unwrap().unwrap();

    assert_eq!(stats.requests_completed.load(Ordering::Relaxed), 2);
    assert_eq!(count_spooled(&spool).unwrap(), 0);
    assert!(Client::new(endpoint).resize(b"late", 1, 1).await.is_err());
}

#[tokio::test]
async fn test_unix_socket_transport() {
    let spool = spool_dir("unix");
    let socket = spool.join("thumbnailer.sock");
    let config = ServerConfig::new(
        Network::Unix,
        socket.to_string_lossy().into_owned(),
        1 << 20,
        1,
        &spool,
    );
    let server = start(config, Stub::default()).await;

    let mut client = Client::new(Endpoint::unix(socket.to_string_lossy().into_owned()));
    assert_eq!(client.resize(b"over unix", 7, 7).await.unwrap().len(), 70);

    server.stop().await.unwrap();
    std::fs::remove_dir_all(&spool).unwrap();
}
