//! A library for streaming frame-by-frame writing of [Zarr](https://zarr.dev)
//! V2 and V3 arrays to filesystem and S3 stores.
//!
//! `zarrs_stream` accepts a sequence of equally-shaped image frames from an
//! acquisition source and persists them as a chunked, optionally sharded,
//! optionally compressed, optionally multi-resolution Zarr dataset:
//!  - frames scatter into per-chunk buffers as they arrive; completed chunks
//!    are compressed and written by a pool of worker threads,
//!  - Zarr V3 chunks aggregate into shard files with a trailing index,
//!  - an optional image pyramid is produced by 2x2 box downsampling, and
//!  - the dataset carries OME-NGFF 0.4 `multiscales` metadata at its root.
//!
//! The stream is the only entry point: build a [`ZarrStreamSettings`], create
//! a [`ZarrStream`], call [`append`](ZarrStream::append) once per frame, and
//! [`stop`](ZarrStream::stop) to flush and write metadata.
//!
//! ```no_run
//! use zarrs_stream::{
//!     DataType, Dimension, DimensionKind, ZarrStream, ZarrStreamSettings, ZarrVersion,
//! };
//!
//! fn main() -> Result<(), zarrs_stream::ZarrError> {
//!     let settings = ZarrStreamSettings {
//!         store_path: "acquisition.zarr".to_string(),
//!         s3: None,
//!         dimensions: vec![
//!             Dimension::new("t", DimensionKind::Time, 0, 32, 0)?,
//!             Dimension::new("y", DimensionKind::Space, 1080, 540, 0)?,
//!             Dimension::new("x", DimensionKind::Space, 1920, 960, 0)?,
//!         ],
//!         data_type: DataType::UInt8,
//!         compression: None,
//!         multiscale: false,
//!     };
//!
//!     let mut stream = ZarrStream::new(settings, ZarrVersion::V2)?;
//!     let frame = vec![0u8; 1920 * 1080];
//!     for _ in 0..32 {
//!         stream.append(&frame)?;
//!     }
//!     stream.stop()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Crate features
//!  - `blosc` (default): blosc chunk compression (`lz4` and `zstd`).
//!  - `s3`: the S3 store backend.
//!
//! Log records are emitted through the [`log`] facade; install any logger
//! implementation to receive them.

mod array_writer;
pub mod codec;
pub mod config;
pub mod data_type;
pub mod dimension;
mod error;
pub mod metadata;
#[cfg(feature = "s3")]
pub mod s3;
mod scaler;
pub mod sink;
pub mod stream;
pub mod thread_pool;

pub use crate::{
    codec::{BloscCodec, BloscCompressionParams, BloscShuffle},
    data_type::DataType,
    dimension::{Dimension, DimensionKind, Dimensions},
    error::ZarrError,
    stream::{S3Settings, ZarrStream, ZarrStreamSettings, ZarrVersion},
};
