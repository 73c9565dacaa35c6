//! Thumbnail Client
//!
//! A [`Client`] keeps at most one connection to the server. It dials lazily
//! on the first call and after any failure, sends one request and waits for
//! its response.
//!
//! ## Failure Handling
//!
//! Any error while sending or receiving discards the connection, because
//! its framing state is unknown afterwards. The failed call is not retried;
//! the caller sees the error and may call again, which dials a new
//! connection.
//!
//! ## Concurrency
//!
//! Calls take `&mut self`, so a client has at most one request in flight.
//! Use one client per task for concurrent requests.
//!
//! ## Example
//!
//! ```ignore
//! use thumbnailer::{Client, Endpoint};
//!
//! let mut client = Client::new(Endpoint::unix("/run/thumbnailer.sock"));
//! let thumbnail = client.resize_file("photo.png", 150, 150).await?;
//! ```

use crate::net::{Connection, Endpoint};
use crate::protocol::{read_response, write_request, ProtocolError, RequestHeader, ResponseHeader};
use bytes::Bytes;
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::{debug, trace};

/// Default maximum accepted response size (1 MB)
pub const DEFAULT_MAX_SIZE: u32 = 1024 * 1024;

/// Errors returned by [`Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server could not be reached
    #[error("cannot connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The exchange failed; the connection has been discarded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Reading the local image failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image does not fit the 32 bit size field
    #[error("image too large: {0} bytes")]
    ImageTooLarge(u64),
}

/// Client for a thumbnail server.
#[derive(Debug)]
pub struct Client {
    endpoint: Endpoint,
    conn: Option<Connection>,
    max_size: u32,
}

impl Client {
    /// Creates a client. No connection is made until the first request.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            conn: None,
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    /// Sets the largest response the client accepts.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns true if a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Closes the connection, if any.
    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            trace!(endpoint = %self.endpoint, "Connection closed");
        }
    }

    /// Resizes an in-memory image.
    pub async fn resize(&mut self, image: &[u8], width: u32, height: u32) -> Result<Bytes, ClientError> {
        let size =
            u32::try_from(image.len()).map_err(|_| ClientError::ImageTooLarge(image.len() as u64))?;
        let mut source = image;
        self.resize_reader(&mut source, size, width, height).await
    }

    /// Resizes an image file.
    pub async fn resize_file(
        &mut self,
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
    ) -> Result<Bytes, ClientError> {
        let mut file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let size = u32::try_from(len).map_err(|_| ClientError::ImageTooLarge(len))?;
        self.resize_reader(&mut file, size, width, height).await
    }

    /// Resizes `size` bytes read from `reader`.
    ///
    /// If `reader` ends before `size` bytes the request cannot be completed
    /// and the connection is discarded.
    pub async fn resize_reader<R>(
        &mut self,
        reader: &mut R,
        size: u32,
        width: u32,
        height: u32,
    ) -> Result<Bytes, ClientError>
    where
        R: AsyncRead + Unpin,
    {
        let max_size = self.max_size;
        let header = RequestHeader::new(size, width, height);
        let conn = self.connection().await?;

        match exchange(conn, &header, reader, max_size).await {
            Ok((response, data)) => {
                trace!(id = response.id, bytes = data.len(), "Response received");
                Ok(data)
            }
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "Request failed, discarding connection");
                self.conn = None;
                Err(e.into())
            }
        }
    }

    /// Returns the open connection, dialing if there is none.
    async fn connection(&mut self) -> Result<&mut Connection, ClientError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                let conn = Connection::connect(&self.endpoint)
                    .await
                    .map_err(|source| ClientError::Connect {
                        endpoint: self.endpoint.to_string(),
                        source,
                    })?;
                debug!(endpoint = %self.endpoint, "Connected");
                conn
            }
        };
        Ok(self.conn.insert(conn))
    }
}

/// Sends one request frame and reads the matching response frame.
async fn exchange<R>(
    conn: &mut Connection,
    header: &RequestHeader,
    reader: &mut R,
    max_size: u32,
) -> Result<(ResponseHeader, Bytes), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    write_request(conn, header, reader).await?;
    read_response(conn, max_size).await
}
