//! Resize Handlers
//!
//! The server does not resize anything itself. Each request is handed to a
//! [`ResizeHandler`], which turns the spooled upload into encoded output
//! bytes or fails.
//!
//! ## Contract
//!
//! - The handler gets the request's target dimensions (both zero means
//!   "convert the format only") and a readable path to the uploaded bytes.
//! - It must return within bounded time and must not leave child processes
//!   behind when it fails.
//! - It must not keep using the spooled file after it returns; the worker
//!   removes the file right afterwards.
//!
//! [`ConvertHandler`] is the default and shells out to ImageMagick. Tests and
//! embedders can plug in their own implementation.

pub mod convert;

use crate::server::Request;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use convert::{ConvertConfig, ConvertHandler};

/// Errors a handler can report. All of them fail the request only.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The conversion process could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The conversion did not finish in time and was killed
    #[error("conversion timed out after {0:?}")]
    Timeout(Duration),

    /// The conversion process exited unsuccessfully
    #[error("conversion failed: {status}")]
    Failed { status: String },

    /// Reading the input or output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other handler-specific failure
    #[error("{0}")]
    Other(String),
}

/// Capability that resizes one spooled request.
#[async_trait]
pub trait ResizeHandler: Send + Sync {
    /// Produces the encoded output for `request`.
    async fn handle(&self, request: &Request) -> Result<Bytes, HandlerError>;
}

#[async_trait]
impl<H: ResizeHandler + ?Sized> ResizeHandler for Arc<H> {
    async fn handle(&self, request: &Request) -> Result<Bytes, HandlerError> {
        (**self).handle(request).await
    }
}

#[async_trait]
impl<H: ResizeHandler + ?Sized> ResizeHandler for Box<H> {
    async fn handle(&self, request: &Request) -> Result<Bytes, HandlerError> {
        (**self).handle(request).await
    }
}
