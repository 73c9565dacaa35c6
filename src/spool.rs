//! Spooled Upload Payloads
//!
//! Uploaded image bytes are written to a file in the spool directory so the
//! resize backend gets a stable, complete input it can open by path.
//!
//! A [`SpooledPayload`] owns its file exclusively. The worker that finishes a
//! request calls [`SpooledPayload::release`]; anything that drops the payload
//! without releasing it (a failed receive, a request abandoned at shutdown)
//! still removes the file in `Drop`.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tracing::{trace, warn};

/// File name prefix of every spooled upload.
pub const SPOOL_PREFIX: &str = "thumb-";

/// File name suffix of every spooled upload.
pub const SPOOL_SUFFIX: &str = ".upload";

/// An uploaded payload persisted in the spool directory.
#[derive(Debug)]
pub struct SpooledPayload {
    /// `None` once the file has been removed
    path: Option<PathBuf>,
    size: u64,
}

impl SpooledPayload {
    /// Creates an empty spool file for request `id` and returns it opened
    /// for writing.
    ///
    /// The name combines the process id and the request id, which is unique
    /// for the lifetime of one server process.
    pub async fn create(dir: &Path, id: u64) -> io::Result<(Self, File)> {
        let path = dir.join(format!(
            "{}{}-{}{}",
            SPOOL_PREFIX,
            std::process::id(),
            id,
            SPOOL_SUFFIX
        ));
        let file = File::create(&path).await?;
        trace!(path = %path.display(), "Spool file created");

        Ok((
            Self {
                path: Some(path),
                size: 0,
            },
            file,
        ))
    }

    /// Records how many bytes were written to the file.
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// Number of payload bytes in the file.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Path of the spooled file, readable until the payload is released.
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Removes the spool file.
    pub async fn release(mut self) {
        if let Some(path) = self.path.take() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => trace!(path = %path.display(), "Spool file removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove spool file"),
            }
        }
    }
}

impl Drop for SpooledPayload {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove spool file");
                }
            }
        }
    }
}

/// Counts the spool files currently present in `dir`.
pub fn count_spooled(dir: &Path) -> io::Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(SPOOL_PREFIX) && name.ends_with(SPOOL_SUFFIX) {
            count += 1;
        }
    }
    Ok(count)
}
