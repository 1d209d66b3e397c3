//! Array writers: chunk assembly and flushing for one level of detail.
//!
//! A writer owns one slab of chunk buffers, the chunks sharing the current
//! append-dimension chunk index. Frames scatter into the buffers tile by
//! tile; when the append dimension advances past a chunk boundary the slab is
//! flushed and fresh buffers take its place, so a writer never holds more
//! than one slab of uncompressed data.
//!
//! The Zarr V2 and V3 writers share this core and differ in how a flushed
//! chunk reaches the store: V2 writes one sink per chunk, V3 aggregates
//! chunks into shards with a trailing index.

mod zarr_v2;
mod zarr_v3;

use std::sync::Arc;

use crate::codec::BloscCompressionParams;
use crate::data_type::DataType;
use crate::dimension::Dimensions;
use crate::error::ZarrError;
use crate::sink::SinkCreator;
use crate::stream::ZarrVersion;
use crate::thread_pool::ThreadPool;

pub(crate) use zarr_v2::ZarrV2Writer;
pub(crate) use zarr_v3::ZarrV3Writer;

/// The immutable configuration of one array writer.
#[derive(Clone)]
pub(crate) struct ArrayWriterConfig {
    pub dimensions: Dimensions,
    pub data_type: DataType,
    pub level_of_detail: usize,
    pub compression: Option<BloscCompressionParams>,
}

/// The lifecycle of a chunk buffer slot.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum ChunkState {
    /// No frame has written to the chunk.
    Empty,
    /// Some bytes are present; the rest is the zero fill value.
    Partial,
    /// The fill watermark reached the chunk size.
    Full,
}

/// A fixed-size byte buffer for one chunk of the current slab.
///
/// The buffer is allocated zeroed, so unwritten interior regions already
/// carry the fill value when a partial chunk is flushed.
struct ChunkBuffer {
    bytes: Vec<u8>,
    fill: usize,
    state: ChunkState,
}

impl ChunkBuffer {
    fn new(chunk_bytes: usize) -> Self {
        Self {
            bytes: vec![0; chunk_bytes],
            fill: 0,
            state: ChunkState::Empty,
        }
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.bytes.len());
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        self.fill = self.fill.max(offset + data.len());
        self.state = if self.fill == self.bytes.len() {
            ChunkState::Full
        } else {
            ChunkState::Partial
        };
    }
}

/// State shared by the V2 and V3 writers.
pub(crate) struct WriterBase {
    config: ArrayWriterConfig,
    sinks: SinkCreator,
    thread_pool: Arc<ThreadPool>,
    chunk_buffers: Vec<ChunkBuffer>,
    frames_written: u64,
    current_slab: u64,
}

impl WriterBase {
    fn new(
        config: ArrayWriterConfig,
        sinks: SinkCreator,
        thread_pool: Arc<ThreadPool>,
    ) -> Result<Self, ZarrError> {
        let mut base = Self {
            config,
            sinks,
            thread_pool,
            chunk_buffers: Vec::new(),
            frames_written: 0,
            current_slab: 0,
        };
        base.allocate_buffers()?;
        Ok(base)
    }

    fn allocate_buffers(&mut self) -> Result<(), ZarrError> {
        let n_chunks = usize::try_from(self.config.dimensions.chunks_per_slab()?)
            .map_err(|_| ZarrError::Overflow)?;
        let chunk_bytes = usize::try_from(self.config.dimensions.chunk_bytes(self.config.data_type))
            .map_err(|_| ZarrError::Overflow)?;
        self.chunk_buffers = (0..n_chunks).map(|_| ChunkBuffer::new(chunk_bytes)).collect();
        Ok(())
    }

    fn dimensions(&self) -> &Dimensions {
        &self.config.dimensions
    }

    /// Scatter one frame into the slab's chunk buffers, one tile per chunk
    /// over the image plane, row at a time.
    ///
    /// Returns `true` when the frame completed the current slab.
    fn write_frame(&mut self, frame: &[u8]) -> Result<bool, ZarrError> {
        let dims = &self.config.dimensions;
        let expected = dims.frame_bytes(self.config.data_type);
        if frame.len() as u64 != expected {
            return Err(ZarrError::InvalidArgument(format!(
                "expected a frame of {expected} bytes, got {}",
                frame.len()
            )));
        }

        // A sized outermost dimension caps the number of frames.
        if !dims[0].is_append() {
            let interior: u64 = dims.iter().skip(1).rev().skip(2).map(|d| d.array_size_px()).product();
            if self.frames_written >= dims[0].array_size_px() * interior.max(1) {
                return Err(ZarrError::InvalidIndex(self.frames_written));
            }
        }

        let frame_index = self.frames_written;
        let element_bytes = self.config.data_type.size();
        let group_offset = usize::try_from(dims.tile_group_offset(frame_index))
            .map_err(|_| ZarrError::Overflow)?;
        let internal_offset =
            usize::try_from(dims.chunk_internal_offset(frame_index, self.config.data_type)?)
                .map_err(|_| ZarrError::Overflow)?;

        let frame_width = dims.width_dim().array_size_px() as usize;
        let frame_height = dims.height_dim().array_size_px() as usize;
        let chunk_width = dims.width_dim().chunk_size_px() as usize;
        let chunk_height = dims.height_dim().chunk_size_px() as usize;
        let chunks_in_x = dims.width_dim().chunk_count() as usize;
        let chunks_in_y = dims.height_dim().chunk_count() as usize;

        for yc in 0..chunks_in_y {
            let rows = chunk_height.min(frame_height - yc * chunk_height);
            for xc in 0..chunks_in_x {
                let columns = chunk_width.min(frame_width - xc * chunk_width);
                let slot = group_offset + yc * chunks_in_x + xc;
                let buffer = &mut self.chunk_buffers[slot];
                for row in 0..rows {
                    let src = ((yc * chunk_height + row) * frame_width + xc * chunk_width)
                        * element_bytes;
                    let dst = internal_offset + row * chunk_width * element_bytes;
                    buffer.write_at(dst, &frame[src..src + columns * element_bytes]);
                }
            }
        }

        self.frames_written += 1;
        Ok(self.frames_written % dims.frames_per_slab()? == 0)
    }

    /// Take a chunk's bytes for flushing, re-arming the slot with a fresh
    /// buffer. Returns [`None`] for a slot no frame has written to.
    fn take_chunk(&mut self, slot: usize) -> Option<Vec<u8>> {
        if self.chunk_buffers[slot].state == ChunkState::Empty {
            return None;
        }
        let chunk_bytes = self.chunk_buffers[slot].bytes.len();
        let buffer = std::mem::replace(&mut self.chunk_buffers[slot], ChunkBuffer::new(chunk_bytes));
        Some(buffer.bytes)
    }

    /// Whether the current slab holds any frames not yet flushed.
    fn has_partial_slab(&self) -> Result<bool, ZarrError> {
        Ok(self.frames_written % self.config.dimensions.frames_per_slab()? != 0)
    }

    /// The chunk coordinates of a slab-local slot, over the non-append
    /// dimensions, outermost first.
    fn slot_coordinates(&self, slot: usize) -> Vec<u64> {
        let dims = &self.config.dimensions;
        let mut slot = slot as u64;
        let mut coordinates = vec![0; dims.len() - 1];
        for (coordinate, dim) in coordinates.iter_mut().rev().zip(dims.iter().skip(1).rev()) {
            *coordinate = slot % dim.chunk_count();
            slot /= dim.chunk_count();
        }
        coordinates
    }

    /// The array shape with the append extent computed from the frames
    /// actually written.
    fn shape(&self) -> Vec<u64> {
        let dims = &self.config.dimensions;
        let interior: u64 = dims.iter().skip(1).rev().skip(2).map(|d| d.array_size_px()).product();
        let append_extent = self.frames_written.div_ceil(interior.max(1));
        std::iter::once(append_extent)
            .chain(dims.iter().skip(1).map(|d| d.array_size_px()))
            .collect()
    }

    fn chunk_shape(&self) -> Vec<u64> {
        self.config
            .dimensions
            .iter()
            .map(|d| d.chunk_size_px())
            .collect()
    }

    /// Reset for a fresh acquisition on a new thread pool: frees chunk
    /// buffers, rewinds the frame counter, and drops the old pool handle.
    fn reset(&mut self, thread_pool: Arc<ThreadPool>) -> Result<(), ZarrError> {
        self.thread_pool = thread_pool;
        self.frames_written = 0;
        self.current_slab = 0;
        self.allocate_buffers()
    }
}

/// Compress (if configured) and return the stored form of a chunk.
fn encode_chunk(
    bytes: Vec<u8>,
    compression: Option<&BloscCompressionParams>,
    data_type: DataType,
) -> Result<Vec<u8>, ZarrError> {
    match compression {
        #[cfg(feature = "blosc")]
        Some(params) => params.compress(&bytes, data_type.size()),
        #[cfg(not(feature = "blosc"))]
        Some(_) => unreachable!("compression is rejected when the blosc feature is disabled"),
        None => Ok(bytes),
    }
}

/// An array writer for one level of detail, in either Zarr format.
pub(crate) enum ArrayWriter {
    V2(ZarrV2Writer),
    V3(ZarrV3Writer),
}

impl ArrayWriter {
    pub(crate) fn new(
        version: ZarrVersion,
        config: ArrayWriterConfig,
        sinks: SinkCreator,
        thread_pool: Arc<ThreadPool>,
    ) -> Result<Self, ZarrError> {
        let base = WriterBase::new(config, sinks, thread_pool)?;
        Ok(match version {
            ZarrVersion::V2 => Self::V2(ZarrV2Writer::new(base)),
            ZarrVersion::V3 => Self::V3(ZarrV3Writer::new(base)?),
        })
    }

    /// Scatter a frame into the chunk buffers, flushing completed slabs.
    pub(crate) fn write_frame(&mut self, frame: &[u8]) -> Result<(), ZarrError> {
        match self {
            Self::V2(writer) => writer.write_frame(frame),
            Self::V3(writer) => writer.write_frame(frame),
        }
    }

    /// Flush any partial slab. Flush jobs may still be in flight when this
    /// returns; the caller drains the thread pool before writing metadata.
    pub(crate) fn finalize(&mut self) -> Result<(), ZarrError> {
        match self {
            Self::V2(writer) => writer.finalize(),
            Self::V3(writer) => writer.finalize(),
        }
    }

    /// Write the per-array metadata. Called after the thread pool has
    /// drained, so every chunk the metadata describes is durable.
    pub(crate) fn write_metadata(&self) -> Result<(), ZarrError> {
        match self {
            Self::V2(writer) => writer.write_metadata(),
            Self::V3(writer) => writer.write_metadata(),
        }
    }

    /// Reset for a fresh acquisition after a stop.
    pub(crate) fn reset(&mut self, thread_pool: Arc<ThreadPool>) -> Result<(), ZarrError> {
        match self {
            Self::V2(writer) => writer.reset(thread_pool),
            Self::V3(writer) => writer.reset(thread_pool),
        }
    }
}
