//! ImageMagick Resize Backend
//!
//! Runs `convert <source> [-resize WxH!] <source>.jpg`, waits for it with a
//! timeout and returns the produced file's bytes.
//!
//! On timeout the child is killed and reaped before the handler returns, so
//! a stuck conversion never outlives its request. The output file is removed
//! on every path.

use crate::handler::{HandlerError, ResizeHandler};
use crate::server::Request;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default conversion program.
pub const DEFAULT_PROGRAM: &str = "convert";

/// Default upper bound on one conversion.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

/// Configuration for [`ConvertHandler`].
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Program to run
    pub program: String,
    /// Time after which the program is killed
    pub timeout: Duration,
    /// Extension of the output file; decides the output format
    pub output_extension: String,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            timeout: DEFAULT_TIMEOUT,
            output_extension: "jpg".to_string(),
        }
    }
}

/// Removes the output file when dropped.
struct OutputFile(PathBuf);

impl Drop for OutputFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Resize handler backed by an external conversion program.
#[derive(Debug, Clone, Default)]
pub struct ConvertHandler {
    config: ConvertConfig,
}

impl ConvertHandler {
    pub fn new(config: ConvertConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    fn output_path(&self, source: &Path) -> PathBuf {
        let mut name = source.as_os_str().to_owned();
        name.push(".");
        name.push(&self.config.output_extension);
        PathBuf::from(name)
    }

    fn command(&self, request: &Request, output: &Path) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.arg(request.source_path());
        if !request.is_format_only() {
            cmd.arg("-resize")
                .arg(format!("{}x{}!", request.width(), request.height()));
        }
        cmd.arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ResizeHandler for ConvertHandler {
    async fn handle(&self, request: &Request) -> Result<Bytes, HandlerError> {
        let output = OutputFile(self.output_path(request.source_path()));

        let mut child = self
            .command(request, &output.0)
            .spawn()
            .map_err(|source| HandlerError::Spawn {
                program: self.config.program.clone(),
                source,
            })?;

        let status = match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(id = request.id(), "Aborted conversion (timeout)");
                if let Err(e) = child.kill().await {
                    warn!(id = request.id(), error = %e, "Failed to kill conversion");
                }
                return Err(HandlerError::Timeout(self.config.timeout));
            }
        };

        if !status.success() {
            return Err(HandlerError::Failed {
                status: status.to_string(),
            });
        }

        let data = tokio::fs::read(&output.0).await?;
        debug!(id = request.id(), bytes = data.len(), "Conversion finished");
        Ok(Bytes::from(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Connection, Endpoint, Listener};
    use crate::protocol::RequestHeader;
    use crate::server::request::Origin;
    use crate::spool::SpooledPayload;
    use tokio::io::AsyncWriteExt;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("thumb-convert-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Builds a request whose spooled upload holds `script`.
    ///
    /// Running the handler with `sh` as the program executes the upload as a
    /// shell script with the output path as `$1`.
    async fn request_with(dir: &Path, script: &str, width: u32, height: u32) -> Request {
        let listener = Listener::bind(&Endpoint::tcp("127.0.0.1:0")).await.unwrap();
        let endpoint = listener.local_endpoint().unwrap();
        let _client = Connection::connect(&endpoint).await.unwrap();
        let conn = listener.accept().await.unwrap();

        let (mut payload, mut file) = SpooledPayload::create(dir, 1).await.unwrap();
        file.write_all(script.as_bytes()).await.unwrap();
        file.flush().await.unwrap();
        payload.set_size(script.len() as u64);

        let header = RequestHeader {
            id: 1,
            size: script.len() as u32,
            width,
            height,
        };
        Request::new(header, payload, Origin::new(1, conn))
    }

    fn shell_handler(timeout: Duration) -> ConvertHandler {
        ConvertHandler::new(ConvertConfig {
            program: "sh".to_string(),
            timeout,
            ..Default::default()
        })
    }

    #[test]
    fn test_default_config() {
        let handler = ConvertHandler::default();
        assert_eq!(handler.config().program, "convert");
        assert_eq!(handler.config().timeout, Duration::from_secs(4));
        assert_eq!(
            handler.output_path(Path::new("/tmp/thumb-1-2.upload")),
            PathBuf::from("/tmp/thumb-1-2.upload.jpg")
        );
    }

    #[tokio::test]
    async fn test_resize_arguments() {
        let dir = test_dir("args");
        let handler = ConvertHandler::default();

        let request = request_with(&dir, "", 150, 100).await;
        let output = handler.output_path(request.source_path());
        let cmd = handler.command(&request, &output);
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(args.len(), 4);
        assert_eq!(args[1], "-resize");
        assert_eq!(args[2], "150x100!");

        let request = request_with(&dir, "", 0, 0).await;
        let cmd = handler.command(&request, &output);
        assert_eq!(cmd.as_std().get_args().count(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_successful_conversion() {
        let dir = test_dir("ok");
        let handler = shell_handler(Duration::from_secs(5));
        let request = request_with(&dir, "printf thumbnail > \"$1\"", 0, 0).await;
        let output = handler.output_path(request.source_path());

        let data = handler.handle(&request).await.unwrap();
        assert_eq!(&data[..], b"thumbnail");
        assert!(!output.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_failed_conversion() {
        let dir = test_dir("fail");
        let handler = shell_handler(Duration::from_secs(5));
        let request = request_with(&dir, "exit 3", 0, 0).await;

        let result = handler.handle(&request).await;
        assert!(matches!(result, Err(HandlerError::Failed { .. })));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_conversion_timeout_kills_child() {
        let dir = test_dir("timeout");
        let handler = shell_handler(Duration::from_millis(200));
        let request = request_with(&dir, "exec sleep 10", 0, 0).await;

        let started = std::time::Instant::now();
        let result = handler.handle(&request).await;
        assert!(matches!(result, Err(HandlerError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = test_dir("spawn");
        let handler = ConvertHandler::new(ConvertConfig {
            program: "/nonexistent/convert".to_string(),
            ..Default::default()
        });
        let request = request_with(&dir, "", 10, 10).await;

        let result = handler.handle(&request).await;
        assert!(matches!(result, Err(HandlerError::Spawn { .. })));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
