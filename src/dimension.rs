//! The dimension model and chunk/shard index arithmetic.
//!
//! An ordered list of [`Dimension`]s defines an array: the outermost (first)
//! dimension may be an *append* dimension of unbounded extent, grown as
//! frames arrive, and the innermost two dimensions are the image height and
//! width. Frames are numbered by a monotonic counter which unravels over the
//! interior dimensions, innermost fastest.
//!
//! The index arithmetic in this module is pure: it maps the frame counter and
//! chunk indices to chunk buffer slots, byte offsets within chunks, and shard
//! slots, without touching any store.

use crate::data_type::DataType;
use crate::error::ZarrError;

/// The semantic kind of an axis.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DimensionKind {
    /// A spatial axis.
    Space,
    /// A channel axis.
    Channel,
    /// A time axis.
    Time,
    /// Any other axis.
    Other,
}

impl DimensionKind {
    /// The OME-NGFF axis type string for this kind.
    #[must_use]
    pub const fn ome_type(&self) -> &'static str {
        match self {
            Self::Space => "space",
            Self::Channel => "channel",
            Self::Time => "time",
            Self::Other => "other",
        }
    }
}

/// A single named axis of the array.
#[derive(Debug, Clone)]
pub struct Dimension {
    name: String,
    kind: DimensionKind,
    array_size_px: u64,
    chunk_size_px: u64,
    shard_size_chunks: u64,
}

/// The longest permitted dimension name, in bytes.
const MAX_NAME_BYTES: usize = 63;

impl Dimension {
    /// Create a new dimension.
    ///
    /// An `array_size_px` of zero marks an append dimension whose extent
    /// grows as the stream runs. A `shard_size_chunks` of zero or one means
    /// the dimension is unsharded.
    ///
    /// # Errors
    /// Returns [`ZarrError::InvalidArgument`] if the name is empty or longer
    /// than 63 bytes, or if `chunk_size_px` is zero.
    pub fn new(
        name: impl Into<String>,
        kind: DimensionKind,
        array_size_px: u64,
        chunk_size_px: u64,
        shard_size_chunks: u64,
    ) -> Result<Self, ZarrError> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_NAME_BYTES {
            return Err(ZarrError::InvalidArgument(format!(
                "dimension name {name:?} must be between 1 and {MAX_NAME_BYTES} bytes"
            )));
        }
        if chunk_size_px == 0 {
            return Err(ZarrError::InvalidArgument(format!(
                "dimension {name:?} has a zero chunk size"
            )));
        }
        Ok(Self {
            name,
            kind,
            array_size_px,
            chunk_size_px,
            shard_size_chunks,
        })
    }

    /// Get the dimension name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the dimension kind.
    #[must_use]
    pub const fn kind(&self) -> DimensionKind {
        self.kind
    }

    /// Get the array extent in pixels. Zero for the append dimension.
    #[must_use]
    pub const fn array_size_px(&self) -> u64 {
        self.array_size_px
    }

    /// Get the chunk extent in pixels.
    #[must_use]
    pub const fn chunk_size_px(&self) -> u64 {
        self.chunk_size_px
    }

    /// Get the shard extent in chunks, normalised so that an unsharded
    /// dimension reports one chunk per shard.
    #[must_use]
    pub const fn shard_size_chunks(&self) -> u64 {
        if self.shard_size_chunks == 0 {
            1
        } else {
            self.shard_size_chunks
        }
    }

    /// Whether this is the append dimension.
    #[must_use]
    pub const fn is_append(&self) -> bool {
        self.array_size_px == 0
    }

    /// The number of chunks along this dimension. The append dimension counts
    /// a single chunk, the extent of one append unit.
    #[must_use]
    pub const fn chunk_count(&self) -> u64 {
        if self.array_size_px == 0 {
            1
        } else {
            self.array_size_px.div_ceil(self.chunk_size_px)
        }
    }

    /// The number of shards along this dimension, with ragged shards at the
    /// far edge counting as whole shards.
    #[must_use]
    pub const fn shard_count(&self) -> u64 {
        self.chunk_count().div_ceil(self.shard_size_chunks())
    }
}

/// A validated, ordered list of dimensions, outermost first.
#[derive(Debug, Clone)]
pub struct Dimensions {
    dims: Vec<Dimension>,
}

impl Dimensions {
    /// Validate and wrap an ordered dimension list.
    ///
    /// # Errors
    /// Returns [`ZarrError::InvalidArgument`] if:
    ///  - there are fewer than three dimensions,
    ///  - any dimension other than the outermost is an append dimension, or
    ///  - either image dimension (the innermost two) has a zero extent.
    ///
    /// Returns [`ZarrError::Overflow`] if a single chunk, shard, or slab
    /// would exceed `u64` bytes.
    pub fn new(dims: Vec<Dimension>) -> Result<Self, ZarrError> {
        if dims.len() < 3 {
            return Err(ZarrError::InvalidArgument(format!(
                "expected at least 3 dimensions, got {}",
                dims.len()
            )));
        }
        for dim in &dims[1..] {
            if dim.is_append() {
                return Err(ZarrError::InvalidArgument(format!(
                    "append dimension {:?} must be outermost",
                    dim.name()
                )));
            }
        }

        let dimensions = Self { dims };
        // Reject configurations whose per-chunk / per-slab arithmetic cannot
        // be represented; later index math can then use plain operations.
        let chunk_px = dimensions
            .dims
            .iter()
            .try_fold(1u64, |acc, d| acc.checked_mul(d.chunk_size_px()))
            .ok_or(ZarrError::Overflow)?;
        let chunks_per_slab = dimensions.chunks_per_slab()?;
        let chunks_per_shard = dimensions.chunks_per_shard()?;
        chunk_px
            .checked_mul(8)
            .and_then(|bytes| bytes.checked_mul(chunks_per_slab))
            .and_then(|bytes| bytes.checked_mul(chunks_per_shard))
            .ok_or(ZarrError::Overflow)?;
        dimensions
            .width_dim()
            .array_size_px()
            .checked_mul(dimensions.height_dim().array_size_px())
            .and_then(|px| px.checked_mul(8))
            .ok_or(ZarrError::Overflow)?;
        dimensions.frames_per_slab()?;
        Ok(dimensions)
    }

    /// The number of dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dims.len()
    }

    /// Whether the dimension list is empty. Always false for a validated list.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Iterate over the dimensions, outermost first.
    pub fn iter(&self) -> std::slice::Iter<'_, Dimension> {
        self.dims.iter()
    }

    /// The image width dimension (innermost).
    #[must_use]
    pub fn width_dim(&self) -> &Dimension {
        &self.dims[self.dims.len() - 1]
    }

    /// The image height dimension (second innermost).
    #[must_use]
    pub fn height_dim(&self) -> &Dimension {
        &self.dims[self.dims.len() - 2]
    }

    /// The number of bytes in one frame of the given data type.
    #[must_use]
    pub fn frame_bytes(&self, data_type: DataType) -> u64 {
        self.width_dim().array_size_px() * self.height_dim().array_size_px() * data_type.size() as u64
    }

    /// The number of bytes in one chunk of the given data type.
    #[must_use]
    pub fn chunk_bytes(&self, data_type: DataType) -> u64 {
        self.dims
            .iter()
            .map(Dimension::chunk_size_px)
            .product::<u64>()
            * data_type.size() as u64
    }

    /// The number of tiles a frame contributes, one per chunk over the image
    /// plane.
    #[must_use]
    pub fn tiles_per_frame(&self) -> u64 {
        self.height_dim().chunk_count() * self.width_dim().chunk_count()
    }

    /// The number of chunk buffers in one slab: every chunk sharing the
    /// current append-dimension chunk index.
    ///
    /// # Errors
    /// Returns [`ZarrError::Overflow`] if the count exceeds `u64`.
    pub fn chunks_per_slab(&self) -> Result<u64, ZarrError> {
        self.dims[1..]
            .iter()
            .try_fold(1u64, |acc, d| acc.checked_mul(d.chunk_count()))
            .ok_or(ZarrError::Overflow)
    }

    /// The number of frames that fill one slab: one chunk extent along the
    /// append dimension times the full extent of every interior dimension.
    ///
    /// # Errors
    /// Returns [`ZarrError::Overflow`] if the count exceeds `u64`.
    pub fn frames_per_slab(&self) -> Result<u64, ZarrError> {
        self.dims[1..self.dims.len() - 2]
            .iter()
            .try_fold(self.dims[0].chunk_size_px(), |acc, d| {
                acc.checked_mul(d.array_size_px())
            })
            .ok_or(ZarrError::Overflow)
    }

    /// The number of chunks in one shard, over every dimension including the
    /// append dimension.
    ///
    /// # Errors
    /// Returns [`ZarrError::Overflow`] if the count exceeds `u64`.
    pub fn chunks_per_shard(&self) -> Result<u64, ZarrError> {
        self.dims
            .iter()
            .try_fold(1u64, |acc, d| acc.checked_mul(d.shard_size_chunks()))
            .ok_or(ZarrError::Overflow)
    }

    /// The number of chunks in one shard over the non-append dimensions only.
    #[must_use]
    pub fn chunks_per_shard_interior(&self) -> u64 {
        self.dims[1..]
            .iter()
            .map(Dimension::shard_size_chunks)
            .product()
    }

    /// The number of shards in one slab, over the non-append dimensions.
    #[must_use]
    pub fn shards_per_slab(&self) -> u64 {
        self.dims[1..].iter().map(Dimension::shard_count).product()
    }

    /// The axis coordinate of a frame along a non-image axis, obtained by
    /// successive division of the frame counter by the interior extents,
    /// innermost fastest. The append axis is unbounded and never wraps.
    fn axis_coordinate(&self, frame: u64, axis: usize) -> u64 {
        debug_assert!(axis < self.dims.len() - 2);
        let divisor: u64 = self.dims[axis + 1..self.dims.len() - 2]
            .iter()
            .map(Dimension::array_size_px)
            .product();
        let coordinate = frame / divisor;
        if axis == 0 {
            coordinate
        } else {
            coordinate % self.dims[axis].array_size_px()
        }
    }

    /// The chunk coordinate of a frame along a non-image axis.
    ///
    /// # Panics
    /// Panics in debug builds if `axis` addresses an image dimension.
    #[must_use]
    pub fn chunk_lattice_index(&self, frame: u64, axis: usize) -> u64 {
        self.axis_coordinate(frame, axis) / self.dims[axis].chunk_size_px()
    }

    /// The chunk coordinates of a frame over every non-image axis, outermost
    /// first.
    #[must_use]
    pub fn frame_chunk_lattice(&self, frame: u64) -> Vec<u64> {
        (0..self.dims.len() - 2)
            .map(|axis| self.chunk_lattice_index(frame, axis))
            .collect()
    }

    /// The slot of the first chunk buffer a frame writes to, within the slab
    /// of chunks sharing its append-dimension chunk index. Slots are
    /// row-major over the non-append chunk lattice, one slot per tile.
    ///
    /// This is periodic in the frame counter with a period of one slab.
    #[must_use]
    pub fn tile_group_offset(&self, frame: u64) -> u64 {
        let group: u64 = self.dims[1..self.dims.len() - 2]
            .iter()
            .enumerate()
            .fold(0, |acc, (i, dim)| {
                acc * dim.chunk_count() + self.chunk_lattice_index(frame, i + 1)
            });
        group * self.tiles_per_frame()
    }

    /// The byte offset within a chunk at which a frame's tile starts,
    /// computed from the frame's position modulo the chunk extent along each
    /// non-image axis.
    ///
    /// # Errors
    /// Returns [`ZarrError::Overflow`] if the offset exceeds `u64`.
    pub fn chunk_internal_offset(
        &self,
        frame: u64,
        data_type: DataType,
    ) -> Result<u64, ZarrError> {
        let tile_bytes = self.width_dim().chunk_size_px() as u128
            * self.height_dim().chunk_size_px() as u128
            * data_type.size() as u128;

        let mut tiles: u128 = 0;
        for axis in 0..self.dims.len() - 2 {
            let internal =
                self.axis_coordinate(frame, axis) % self.dims[axis].chunk_size_px();
            let multiplier: u128 = self.dims[axis + 1..self.dims.len() - 2]
                .iter()
                .map(|d| u128::from(d.chunk_size_px()))
                .product();
            tiles += u128::from(internal) * multiplier;
        }

        u64::try_from(tiles * tile_bytes).map_err(|_| ZarrError::Overflow)
    }

    /// The row-major index of the shard containing a chunk, given the chunk's
    /// slot within its slab. The append dimension's shard coordinate is
    /// tracked separately by the writer and does not participate here.
    #[must_use]
    pub fn shard_index_for_chunk(&self, chunk: u64) -> u64 {
        let mut chunk = chunk;
        let mut shard = 0;
        let mut stride = 1;
        for dim in self.dims[1..].iter().rev() {
            let coordinate = chunk % dim.chunk_count();
            chunk /= dim.chunk_count();
            shard += (coordinate / dim.shard_size_chunks()) * stride;
            stride *= dim.shard_count();
        }
        shard
    }

    /// The row-major index of a chunk within its shard, over the non-append
    /// dimensions, given the chunk's slot within its slab.
    #[must_use]
    pub fn shard_internal_index(&self, chunk: u64) -> u64 {
        let mut chunk = chunk;
        let mut internal = 0;
        let mut stride = 1;
        for dim in self.dims[1..].iter().rev() {
            let coordinate = chunk % dim.chunk_count();
            chunk /= dim.chunk_count();
            internal += (coordinate % dim.shard_size_chunks()) * stride;
            stride *= dim.shard_size_chunks();
        }
        internal
    }
}

impl std::ops::Index<usize> for Dimensions {
    type Output = Dimension;

    fn index(&self, index: usize) -> &Self::Output {
        &self.dims[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim(
        name: &str,
        kind: DimensionKind,
        array_size_px: u64,
        chunk_size_px: u64,
        shard_size_chunks: u64,
    ) -> Dimension {
        Dimension::new(name, kind, array_size_px, chunk_size_px, shard_size_chunks).unwrap()
    }

    /// t append with 5 timepoints per chunk, 2 chunks in c, 3 in z, 3 in y,
    /// 4 in x.
    fn tczyx() -> Dimensions {
        Dimensions::new(vec![
            dim("t", DimensionKind::Time, 0, 5, 0),
            dim("c", DimensionKind::Channel, 3, 2, 0),
            dim("z", DimensionKind::Space, 5, 2, 0),
            dim("y", DimensionKind::Space, 48, 16, 0),
            dim("x", DimensionKind::Space, 64, 16, 0),
        ])
        .unwrap()
    }

    #[test]
    fn dimension_validation() {
        assert!(Dimension::new("", DimensionKind::Space, 1, 1, 0).is_err());
        assert!(Dimension::new("x", DimensionKind::Space, 1, 0, 0).is_err());

        // interior append dimension is rejected
        assert!(Dimensions::new(vec![
            dim("t", DimensionKind::Time, 1, 1, 0),
            dim("z", DimensionKind::Space, 0, 1, 0),
            dim("y", DimensionKind::Space, 4, 4, 0),
            dim("x", DimensionKind::Space, 4, 4, 0),
        ])
        .is_err());

        // too few dimensions
        assert!(Dimensions::new(vec![
            dim("y", DimensionKind::Space, 4, 4, 0),
            dim("x", DimensionKind::Space, 4, 4, 0),
        ])
        .is_err());
    }

    #[test]
    fn chunk_lattice_index() {
        let dims = tczyx();
        // (frame, axis, expected)
        let cases = [
            (0, 2, 0),
            (0, 1, 0),
            (0, 0, 0),
            (2, 2, 1),
            (2, 1, 0),
            (3, 2, 1),
            (4, 2, 2),
            (5, 2, 0),
            (5, 1, 0),
            (12, 2, 1),
            (12, 1, 1),
            (12, 0, 0),
            (19, 2, 2),
            (19, 1, 0),
            (26, 2, 0),
            (26, 1, 1),
            (33, 2, 1),
            (33, 1, 0),
            (40, 2, 0),
            (40, 1, 1),
            (47, 2, 1),
            (54, 2, 2),
            (61, 2, 0),
            (68, 2, 1),
            (74, 2, 2),
            (74, 1, 1),
            (74, 0, 0),
            (75, 2, 0),
            (75, 1, 0),
            (75, 0, 1),
        ];
        for (frame, axis, expected) in cases {
            assert_eq!(
                dims.chunk_lattice_index(frame, axis),
                expected,
                "frame {frame} axis {axis}"
            );
        }

        assert_eq!(dims.frame_chunk_lattice(12), [0, 1, 1]);
        assert_eq!(dims.frame_chunk_lattice(75), [1, 0, 0]);
    }

    #[test]
    fn tile_group_offset_cycles_per_slab() {
        let dims = tczyx();
        // One full slab of 75 frames: 5 z-planes x 3 channels x 5 timepoints.
        let expected_per_cycle = [0u64, 0, 12, 12, 24];
        for frame in 0..76u64 {
            let c = (frame / 5) % 3;
            let expected = expected_per_cycle[(frame % 5) as usize] + (c / 2) * 36;
            assert_eq!(dims.tile_group_offset(frame), expected, "frame {frame}");
        }
        // Periodic with the slab length.
        assert_eq!(dims.tile_group_offset(75), dims.tile_group_offset(0));
        assert_eq!(dims.tile_group_offset(149), dims.tile_group_offset(74));
    }

    #[test]
    fn chunk_internal_offset() {
        let dims = tczyx();
        let expected = [
            0u64, 512, 0, 512, 0, 1024, 1536, 1024, 1536, 1024, 0, 512, 0, 512, 0, 2048, 2560,
            2048, 2560, 2048, 3072, 3584, 3072, 3584, 3072, 2048, 2560, 2048, 2560, 2048, 4096,
            4608, 4096, 4608, 4096, 5120, 5632, 5120, 5632, 5120, 4096, 4608, 4096, 4608, 4096,
            6144, 6656, 6144, 6656, 6144, 7168, 7680, 7168, 7680, 7168, 6144, 6656, 6144, 6656,
            6144, 8192, 8704, 8192, 8704, 8192, 9216, 9728, 9216, 9728, 9216, 8192, 8704, 8192,
            8704, 8192, 0,
        ];
        for (frame, expected) in expected.iter().enumerate() {
            assert_eq!(
                dims.chunk_internal_offset(frame as u64, DataType::UInt16)
                    .unwrap(),
                *expected,
                "frame {frame}"
            );
        }

        let chunk_bytes = dims.chunk_bytes(DataType::UInt16);
        for frame in 0..1000 {
            assert!(dims.chunk_internal_offset(frame, DataType::UInt16).unwrap() < chunk_bytes);
        }
    }

    #[test]
    fn shard_indices() {
        let dims = Dimensions::new(vec![
            dim("t", DimensionKind::Time, 0, 32, 1),
            dim("y", DimensionKind::Space, 960, 320, 2),
            dim("x", DimensionKind::Space, 1080, 270, 3),
        ])
        .unwrap();

        // (chunk, shard, internal)
        let cases = [
            (0, 0, 0),
            (1, 0, 1),
            (2, 0, 2),
            (3, 1, 0),
            (4, 0, 3),
            (5, 0, 4),
            (6, 0, 5),
            (7, 1, 3),
            (8, 2, 0),
            (9, 2, 1),
            (10, 2, 2),
            (11, 3, 0),
        ];
        for (chunk, shard, internal) in cases {
            assert_eq!(dims.shard_index_for_chunk(chunk), shard, "chunk {chunk}");
            assert_eq!(dims.shard_internal_index(chunk), internal, "chunk {chunk}");
        }
    }

    #[test]
    fn shard_partition_is_disjoint_and_complete() {
        let dims = Dimensions::new(vec![
            dim("t", DimensionKind::Time, 0, 5, 2),
            dim("c", DimensionKind::Channel, 8, 4, 2),
            dim("z", DimensionKind::Space, 6, 2, 1),
            dim("y", DimensionKind::Space, 48, 16, 1),
            dim("x", DimensionKind::Space, 64, 16, 2),
        ])
        .unwrap();

        let n_chunks = dims.chunks_per_slab().unwrap();
        let cps_interior = dims.chunks_per_shard_interior();
        let mut seen = std::collections::HashMap::new();
        for chunk in 0..n_chunks {
            let shard = dims.shard_index_for_chunk(chunk);
            let internal = dims.shard_internal_index(chunk);
            assert!(shard < dims.shards_per_slab());
            assert!(internal < cps_interior);
            // No two chunks share a (shard, internal) slot.
            assert!(seen.insert((shard, internal), chunk).is_none());
        }
    }

    #[test]
    fn slab_arithmetic() {
        let dims = tczyx();
        assert_eq!(dims.frames_per_slab().unwrap(), 75);
        assert_eq!(dims.chunks_per_slab().unwrap(), 2 * 3 * 3 * 4);
        assert_eq!(dims.tiles_per_frame(), 12);
        assert_eq!(dims.chunk_bytes(DataType::UInt16), 5 * 2 * 2 * 16 * 16 * 2);
    }

    #[test]
    fn overflow_rejected() {
        let result = Dimensions::new(vec![
            dim("t", DimensionKind::Time, 0, u64::MAX, 0),
            dim("z", DimensionKind::Space, u64::MAX, u64::MAX, 0),
            dim("y", DimensionKind::Space, 4, 4, 0),
            dim("x", DimensionKind::Space, 4, 4, 0),
        ]);
        assert!(matches!(result, Err(ZarrError::Overflow)));
    }
}
