//! Error handling for `zarrs_stream`.

use thiserror::Error;

/// An error arising while configuring or running a Zarr stream.
#[derive(Debug, Error)]
pub enum ZarrError {
    /// An argument (settings field, dimension, frame) is invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An index (frame, chunk, or shard) is out of bounds.
    #[error("invalid index: {0}")]
    InvalidIndex(u64),
    /// Index arithmetic overflowed a 64-bit unsigned integer.
    #[error("arithmetic overflow in index calculation")]
    Overflow,
    /// The requested functionality is recognised but not implemented.
    #[error("not yet implemented: {0}")]
    NotYetImplemented(&'static str),
    /// An IO error from the filesystem.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// An error from the S3 client or connection pool.
    #[error("S3 error: {0}")]
    S3Error(String),
    /// An error serializing metadata JSON.
    #[error(transparent)]
    InvalidJSON(#[from] serde_json::Error),
    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<&str> for ZarrError {
    fn from(err: &str) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<String> for ZarrError {
    fn from(err: String) -> Self {
        Self::InvalidArgument(err)
    }
}

#[cfg(feature = "s3")]
impl From<s3::error::S3Error> for ZarrError {
    fn from(err: s3::error::S3Error) -> Self {
        Self::S3Error(err.to_string())
    }
}
