//! Transport Glue
//!
//! The protocol runs over any reliable, ordered byte stream. This module
//! maps a configured network kind and address onto tokio's TCP and Unix
//! domain sockets, so the rest of the crate deals with a single
//! [`Connection`] type.

use serde::Deserialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

/// Kind of network to listen on or dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tcp,
    Unix,
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" | "tcp4" | "tcp6" => Ok(Network::Tcp),
            "unix" => Ok(Network::Unix),
            other => Err(format!("unsupported network: {}", other)),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp => write!(f, "tcp"),
            Network::Unix => write!(f, "unix"),
        }
    }
}

/// A network kind plus an address (`host:port` or a socket path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub network: Network,
    pub address: String,
}

impl Endpoint {
    pub fn new(network: Network, address: impl Into<String>) -> Self {
        Self {
            network,
            address: address.into(),
        }
    }

    pub fn tcp(address: impl Into<String>) -> Self {
        Self::new(Network::Tcp, address)
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self::new(Network::Unix, path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.network, self.address)
    }
}

/// A bound listening socket.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    /// Binds to the endpoint. Errors are returned as-is; there is no retry.
    pub async fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint.network {
            Network::Tcp => Ok(Listener::Tcp(TcpListener::bind(&endpoint.address).await?)),
            Network::Unix => Ok(Listener::Unix(UnixListener::bind(&endpoint.address)?)),
        }
    }

    /// Waits for the next connection.
    pub async fn accept(&self) -> io::Result<Connection> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                // Best effort; a peer that already hung up fails here.
                let _ = stream.set_nodelay(true);
                Ok(Connection::Tcp(stream))
            }
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Connection::Unix(stream))
            }
        }
    }

    /// Returns the endpoint the listener is actually bound to.
    ///
    /// For TCP this resolves port 0 to the port the OS picked.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        match self {
            Listener::Tcp(listener) => Ok(Endpoint::tcp(listener.local_addr()?.to_string())),
            Listener::Unix(listener) => {
                let addr = listener.local_addr()?;
                let path = addr
                    .as_pathname()
                    .map(PathBuf::from)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "unnamed unix socket"))?;
                Ok(Endpoint::unix(path.to_string_lossy().into_owned()))
            }
        }
    }
}

/// An established stream to a peer.
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Connection {
    /// Dials the endpoint.
    pub async fn connect(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint.network {
            Network::Tcp => {
                let stream = TcpStream::connect(&endpoint.address).await?;
                // Best effort; a peer that already hung up fails here.
                let _ = stream.set_nodelay(true);
                Ok(Connection::Tcp(stream))
            }
            Network::Unix => Ok(Connection::Unix(UnixStream::connect(&endpoint.address).await?)),
        }
    }

    /// Waits until the peer has sent something (or hung up).
    pub async fn readable(&self) -> io::Result<()> {
        match self {
            Connection::Tcp(stream) => stream.readable().await,
            Connection::Unix(stream) => stream.readable().await,
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Connection::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Connection::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Connection::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Connection::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
