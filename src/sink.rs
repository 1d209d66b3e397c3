//! Sinks: write-once, append-only byte containers.
//!
//! A sink is identified by a key: a path below the store root on a
//! filesystem, or an object name in an S3 bucket. Writes must be contiguous
//! and non-decreasing; a finalized sink accepts no further writes (enforced
//! by consuming the sink).

mod file;
#[cfg(feature = "s3")]
mod s3;

use std::path::PathBuf;
#[cfg(feature = "s3")]
use std::sync::Arc;

use crate::error::ZarrError;

pub use file::FileSink;
#[cfg(feature = "s3")]
pub use s3::S3Sink;

#[cfg(feature = "s3")]
use crate::s3::S3ConnectionPool;

/// A write-once, append-only byte container.
pub trait Sink: Send {
    /// Write `bytes` at `offset`. Offsets must be contiguous across
    /// successive calls; a gap or overlap is rejected.
    ///
    /// # Errors
    /// Returns [`ZarrError::InvalidArgument`] on a non-contiguous offset, or
    /// the underlying store error.
    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), ZarrError>;

    /// Force durability of the bytes written so far.
    ///
    /// # Errors
    /// Returns the underlying store error.
    fn flush(&mut self) -> Result<(), ZarrError>;

    /// Close the sink. Multipart S3 uploads are completed with their
    /// accumulated parts; files are synced and closed.
    ///
    /// # Errors
    /// Returns the underlying store error.
    fn finalize(self: Box<Self>) -> Result<(), ZarrError>;
}

/// Creates sinks for store-relative keys on one backend.
///
/// Keys use `/` separators; the filesystem backend maps the components onto
/// platform paths below the store root.
#[derive(Clone)]
pub enum SinkCreator {
    /// Sinks are files below a root directory.
    Filesystem {
        /// The store root directory.
        root: PathBuf,
    },
    /// Sinks are objects below a key prefix in a bucket.
    #[cfg(feature = "s3")]
    S3 {
        /// The connection pool sinks draw from.
        pool: Arc<S3ConnectionPool>,
        /// The object key prefix, without a trailing `/`.
        prefix: String,
    },
}

impl SinkCreator {
    /// Open a fresh sink for a store-relative key.
    ///
    /// # Errors
    /// Returns [`ZarrError::IOError`] if a file or its parent directories
    /// cannot be created.
    pub fn make_sink(&self, key: &str) -> Result<Box<dyn Sink>, ZarrError> {
        match self {
            Self::Filesystem { root } => {
                let mut path = root.clone();
                path.extend(key.split('/'));
                Ok(Box::new(FileSink::new(&path)?))
            }
            #[cfg(feature = "s3")]
            Self::S3 { pool, prefix } => {
                let object = if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}/{key}")
                };
                Ok(Box::new(S3Sink::new(object, pool.clone())))
            }
        }
    }
}
