//! The streaming facade: settings, validation, and the append/stop lifecycle.
//!
//! A [`ZarrStream`] owns the full writer chain (one array writer per pyramid
//! level, with a [`FrameScaler`](crate::scaler) between adjacent levels), the
//! flush thread pool, and the optional S3 connection pool. Frames enter
//! through [`ZarrStream::append`]; [`ZarrStream::stop`] drains all in-flight
//! work, writes the metadata documents, and re-arms the stream for another
//! acquisition over the same store.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::array_writer::{ArrayWriter, ArrayWriterConfig};
use crate::codec::BloscCompressionParams;
use crate::config::global_config;
use crate::data_type::DataType;
use crate::dimension::{Dimension, Dimensions};
use crate::error::ZarrError;
use crate::metadata::{
    EntryPointMetadataV3, GroupMetadataV2, GroupMetadataV3, OmeMultiscalesAttributes,
};
#[cfg(feature = "s3")]
use crate::s3::S3ConnectionPool;
use crate::scaler::{scaled_dimensions, FrameScaler};
use crate::sink::SinkCreator;
use crate::thread_pool::ThreadPool;

/// The Zarr storage format version to write.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ZarrVersion {
    /// Zarr storage specification version 2.
    V2,
    /// Zarr storage specification version 3, with sharding.
    V3,
}

/// The location and credentials of an S3-compatible store.
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// The service endpoint, e.g. `https://s3.amazonaws.com` or a MinIO URL.
    pub endpoint: String,
    /// The bucket receiving the dataset. Must already exist.
    pub bucket_name: String,
    /// The access key id.
    pub access_key_id: String,
    /// The secret access key.
    pub secret_access_key: String,
}

/// The settings document for a stream, validated once at construction.
#[derive(Debug, Clone)]
pub struct ZarrStreamSettings {
    /// The dataset root: a filesystem path, or an object key prefix (plain,
    /// or `s3://bucket/prefix`) when S3 settings are present.
    pub store_path: String,
    /// S3 location and credentials; [`None`] writes to the filesystem.
    pub s3: Option<S3Settings>,
    /// The ordered dimension list, outermost first. The innermost two are
    /// the image height and width.
    pub dimensions: Vec<Dimension>,
    /// The element type of every frame.
    pub data_type: DataType,
    /// Blosc chunk compression, or [`None`] for raw chunks.
    pub compression: Option<BloscCompressionParams>,
    /// Whether to write an image pyramid of downsampled levels.
    pub multiscale: bool,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum StreamState {
    /// Configured and ready for the first frame.
    Armed,
    /// Frames are flowing.
    Running,
}

/// A streaming writer for one Zarr dataset.
///
/// Dropping the stream stops it, flushing partial chunks and writing final
/// metadata; errors during an implicit stop are logged and swallowed, so
/// prefer calling [`ZarrStream::stop`] explicitly.
pub struct ZarrStream {
    version: ZarrVersion,
    dimensions: Dimensions,
    frame_bytes: u64,
    sinks: SinkCreator,
    thread_pool: Arc<ThreadPool>,
    writers: Vec<ArrayWriter>,
    scalers: Vec<FrameScaler>,
    frame_counter: u64,
    state: StreamState,
    /// The first flush failure reported by a worker; latched until the
    /// stream is dropped.
    error: Arc<Mutex<Option<String>>>,
}

impl ZarrStream {
    /// Validate `settings` and build the writer chain, in state armed.
    ///
    /// # Errors
    /// Returns [`ZarrError::InvalidArgument`] for malformed settings, a
    /// nonexistent bucket, or an invalid dimension list.
    pub fn new(settings: ZarrStreamSettings, version: ZarrVersion) -> Result<Self, ZarrError> {
        if settings.store_path.is_empty() {
            return Err(ZarrError::InvalidArgument(
                "the store path must not be empty".to_string(),
            ));
        }
        #[cfg(not(feature = "blosc"))]
        if settings.compression.is_some() {
            return Err(ZarrError::NotYetImplemented(
                "compressed streams require the `blosc` feature",
            ));
        }

        let dimensions = Dimensions::new(settings.dimensions)?;
        let frame_bytes = dimensions.frame_bytes(settings.data_type);

        let error = Arc::new(Mutex::new(None));
        let thread_pool = Arc::new(make_thread_pool(error.clone()));
        let sinks = make_sink_creator(&settings.store_path, settings.s3.as_ref())?;

        // One set of dimensions per pyramid level, halving until the image
        // plane is a single pixel.
        let mut level_dimensions = vec![dimensions.clone()];
        if settings.multiscale {
            let mut current = dimensions.clone();
            while let Some(next) = scaled_dimensions(&current)? {
                level_dimensions.push(next.clone());
                current = next;
            }
        }

        let writers = level_dimensions
            .iter()
            .enumerate()
            .map(|(level, dims)| {
                ArrayWriter::new(
                    version,
                    ArrayWriterConfig {
                        dimensions: dims.clone(),
                        data_type: settings.data_type,
                        level_of_detail: level,
                        compression: settings.compression,
                    },
                    sinks.clone(),
                    thread_pool.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let scalers = level_dimensions[..level_dimensions.len() - 1]
            .iter()
            .map(|dims| FrameScaler::new(dims, settings.data_type))
            .collect();

        log::debug!(
            "armed a Zarr {version:?} stream with {} level(s) at {:?}",
            writers.len(),
            settings.store_path
        );

        Ok(Self {
            version,
            dimensions,
            frame_bytes,
            sinks,
            thread_pool,
            writers,
            scalers,
            frame_counter: 0,
            state: StreamState::Armed,
            error,
        })
    }

    /// The number of frames appended since the stream was armed.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_counter
    }

    /// The number of pyramid levels, including full resolution.
    #[must_use]
    pub fn n_levels(&self) -> usize {
        self.writers.len()
    }

    /// Append one frame of exactly `width * height * element_bytes` bytes.
    ///
    /// Blocks when the flush job queue is full.
    ///
    /// # Errors
    /// Returns [`ZarrError::InvalidArgument`] for a mis-sized frame and
    /// [`ZarrError::InternalError`] after a flush job has failed; the stream
    /// then fast-fails every subsequent append until it is dropped.
    pub fn append(&mut self, frame: &[u8]) -> Result<(), ZarrError> {
        if let Some(message) = self.error.lock().clone() {
            return Err(ZarrError::InternalError(format!(
                "a flush job failed: {message}"
            )));
        }
        if frame.len() as u64 != self.frame_bytes {
            return Err(ZarrError::InvalidArgument(format!(
                "expected a frame of {} bytes, got {}",
                self.frame_bytes,
                frame.len()
            )));
        }

        self.state = StreamState::Running;
        self.dispatch_frame(0, frame)?;
        self.frame_counter += 1;
        Ok(())
    }

    /// Write a frame at `level` and propagate it down the scaler chain.
    fn dispatch_frame(&mut self, level: usize, frame: &[u8]) -> Result<(), ZarrError> {
        self.writers[level].write_frame(frame)?;
        let mut current: Option<Vec<u8>> = None;
        for scaler in level..self.scalers.len() {
            let input: &[u8] = current.as_deref().unwrap_or(frame);
            let Some(next) = self.scalers[scaler].scale_frame(input) else {
                return Ok(());
            };
            self.writers[scaler + 1].write_frame(&next)?;
            current = Some(next);
        }
        Ok(())
    }

    /// Drain in-flight work, flush partial chunks, write all metadata, and
    /// re-arm the stream for another acquisition on a fresh thread pool.
    ///
    /// # Errors
    /// Returns [`ZarrError::InternalError`] if a flush job failed; the
    /// metadata documents are then not written, leaving the partial run's
    /// chunks without a manifest that claims them.
    pub fn stop(&mut self) -> Result<(), ZarrError> {
        if self.state != StreamState::Running {
            return Ok(());
        }

        // Unpaired frames cascade down one level and keep scaling from
        // there, exactly as if they had arrived as normal frames.
        for level in 0..self.scalers.len() {
            if let Some(residual) = self.scalers[level].take_residual() {
                self.dispatch_frame(level + 1, &residual)?;
            }
        }

        for writer in &mut self.writers {
            writer.finalize()?;
        }
        self.thread_pool.await_stop();

        if let Some(message) = self.error.lock().clone() {
            return Err(ZarrError::InternalError(format!(
                "a flush job failed: {message}"
            )));
        }

        // Every chunk is durable; the manifests may now claim them.
        for writer in &self.writers {
            writer.write_metadata()?;
        }
        self.write_group_metadata()?;

        self.thread_pool = Arc::new(make_thread_pool(self.error.clone()));
        for writer in &mut self.writers {
            writer.reset(self.thread_pool.clone())?;
        }
        self.frame_counter = 0;
        self.state = StreamState::Armed;
        log::debug!("stream stopped and re-armed");
        Ok(())
    }

    /// Write the group-level documents for the configured format.
    fn write_group_metadata(&self) -> Result<(), ZarrError> {
        let multiscales = OmeMultiscalesAttributes::new(&self.dimensions, self.writers.len());
        match self.version {
            ZarrVersion::V2 => {
                self.write_json(".zgroup", &GroupMetadataV2::default())?;
                self.write_json(".zattrs", &multiscales)?;
            }
            ZarrVersion::V3 => {
                self.write_json("zarr.json", &EntryPointMetadataV3::default())?;
                self.write_json(
                    "meta/root.group.json",
                    &GroupMetadataV3 {
                        attributes: multiscales.to_attributes()?,
                    },
                )?;
            }
        }
        Ok(())
    }

    fn write_json<T: serde::Serialize>(&self, key: &str, document: &T) -> Result<(), ZarrError> {
        let mut sink = self.sinks.make_sink(key)?;
        sink.write(0, &serde_json::to_vec_pretty(document)?)?;
        sink.finalize()
    }
}

impl Drop for ZarrStream {
    fn drop(&mut self) {
        if self.state == StreamState::Running {
            if let Err(err) = self.stop() {
                log::error!("failed to stop stream on drop: {err}");
            }
        }
    }
}

fn make_thread_pool(error: Arc<Mutex<Option<String>>>) -> ThreadPool {
    let workers = global_config().thread_pool_workers();
    ThreadPool::new(workers, move |message| {
        log::error!("flush job failed: {message}");
        let mut latched = error.lock();
        if latched.is_none() {
            *latched = Some(message.to_string());
        }
    })
}

/// Resolve the store backend from the settings.
fn make_sink_creator(
    store_path: &str,
    s3: Option<&S3Settings>,
) -> Result<SinkCreator, ZarrError> {
    match s3 {
        #[cfg(feature = "s3")]
        Some(settings) => {
            let prefix = s3_key_prefix(store_path, &settings.bucket_name)?;
            let pool = Arc::new(S3ConnectionPool::new(
                global_config().s3_connections(),
                settings,
            )?);
            let connection = pool.get_connection().ok_or_else(|| {
                ZarrError::S3Error("the S3 connection pool is shutting down".to_string())
            })?;
            let exists = connection.bucket_exists();
            pool.return_connection(connection);
            if !exists? {
                return Err(ZarrError::InvalidArgument(format!(
                    "bucket {:?} does not exist",
                    settings.bucket_name
                )));
            }
            Ok(SinkCreator::S3 { pool, prefix })
        }
        #[cfg(not(feature = "s3"))]
        Some(_) => Err(ZarrError::NotYetImplemented(
            "S3 stores require the `s3` feature",
        )),
        None if store_path.starts_with("s3://") => Err(ZarrError::InvalidArgument(
            "an s3:// store path requires S3 settings".to_string(),
        )),
        None => Ok(SinkCreator::Filesystem {
            root: PathBuf::from(store_path),
        }),
    }
}

/// The object key prefix for a dataset, from a plain prefix or an
/// `s3://bucket/prefix` URI naming the configured bucket.
#[cfg(feature = "s3")]
fn s3_key_prefix(store_path: &str, bucket_name: &str) -> Result<String, ZarrError> {
    let prefix = if let Some(rest) = store_path.strip_prefix("s3://") {
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket != bucket_name {
            return Err(ZarrError::InvalidArgument(format!(
                "store path names bucket {bucket:?} but the settings name {bucket_name:?}"
            )));
        }
        prefix
    } else {
        store_path
    };
    Ok(prefix.trim_matches('/').to_string())
}
