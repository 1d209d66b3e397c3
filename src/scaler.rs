//! The multiscale frame scaler: 2x2 box downsampling between pyramid levels.
//!
//! Each level's scaler halves the image axes of incoming frames and averages
//! pairs of successive frames element-wise, so level `k+1` receives half the
//! frames of level `k` at a quarter of the pixels. Averaging runs in a
//! widened accumulator, so integer samples cannot saturate.
//!
//! Pairing is strictly sequential over the incoming frame order. The last
//! unpaired frame at stream end is emitted downsampled but unaveraged; with
//! interior dimensions, sequential pairing can also average frames across an
//! interior-axis boundary. Both behaviours are deliberate and match the
//! upstream acquisition tooling this engine feeds.

use bytemuck::Pod;

use crate::data_type::DataType;
use crate::dimension::{Dimension, Dimensions};
use crate::error::ZarrError;

/// An element type that supports widened box averaging.
trait Sample: Pod {
    fn average2(a: Self, b: Self) -> Self;
    fn average4(a: Self, b: Self, c: Self, d: Self) -> Self;
}

macro_rules! impl_sample {
    ($type:ty, $acc:ty) => {
        impl Sample for $type {
            fn average2(a: Self, b: Self) -> Self {
                ((a as $acc + b as $acc) / 2 as $acc) as $type
            }

            fn average4(a: Self, b: Self, c: Self, d: Self) -> Self {
                ((a as $acc + b as $acc + c as $acc + d as $acc) / 4 as $acc) as $type
            }
        }
    };
}

impl_sample!(u8, u32);
impl_sample!(u16, u32);
impl_sample!(u32, u64);
impl_sample!(u64, u128);
impl_sample!(i8, i32);
impl_sample!(i16, i32);
impl_sample!(i32, i64);
impl_sample!(i64, i128);
impl_sample!(f32, f64);
impl_sample!(f64, f64);

/// Downsample one image plane by 2x2 box averaging, clamping at the ragged
/// edge by repeating the last row and column.
fn downsample_plane<T: Sample>(src: &[T], width: usize, height: usize) -> Vec<T> {
    let out_width = width.div_ceil(2);
    let out_height = height.div_ceil(2);
    let mut out = Vec::with_capacity(out_width * out_height);
    for oy in 0..out_height {
        let y0 = 2 * oy;
        let y1 = (2 * oy + 1).min(height - 1);
        for ox in 0..out_width {
            let x0 = 2 * ox;
            let x1 = (2 * ox + 1).min(width - 1);
            out.push(T::average4(
                src[y0 * width + x0],
                src[y0 * width + x1],
                src[y1 * width + x0],
                src[y1 * width + x1],
            ));
        }
    }
    out
}

fn downsample_bytes<T: Sample>(frame: &[u8], width: usize, height: usize) -> Vec<u8> {
    let pixels: Vec<T> = bytemuck::pod_collect_to_vec(frame);
    let out = downsample_plane(&pixels, width, height);
    bytemuck::cast_slice(&out).to_vec()
}

fn average_bytes<T: Sample>(a: &[u8], b: &[u8]) -> Vec<u8> {
    let a: Vec<T> = bytemuck::pod_collect_to_vec(a);
    let b: Vec<T> = bytemuck::pod_collect_to_vec(b);
    let out: Vec<T> = a
        .iter()
        .zip(&b)
        .map(|(&a, &b)| T::average2(a, b))
        .collect();
    bytemuck::cast_slice(&out).to_vec()
}

fn downsample_frame(data_type: DataType, frame: &[u8], width: usize, height: usize) -> Vec<u8> {
    match data_type {
        DataType::UInt8 => downsample_bytes::<u8>(frame, width, height),
        DataType::UInt16 => downsample_bytes::<u16>(frame, width, height),
        DataType::UInt32 => downsample_bytes::<u32>(frame, width, height),
        DataType::UInt64 => downsample_bytes::<u64>(frame, width, height),
        DataType::Int8 => downsample_bytes::<i8>(frame, width, height),
        DataType::Int16 => downsample_bytes::<i16>(frame, width, height),
        DataType::Int32 => downsample_bytes::<i32>(frame, width, height),
        DataType::Int64 => downsample_bytes::<i64>(frame, width, height),
        DataType::Float32 => downsample_bytes::<f32>(frame, width, height),
        DataType::Float64 => downsample_bytes::<f64>(frame, width, height),
    }
}

fn average_frames(data_type: DataType, a: &[u8], b: &[u8]) -> Vec<u8> {
    match data_type {
        DataType::UInt8 => average_bytes::<u8>(a, b),
        DataType::UInt16 => average_bytes::<u16>(a, b),
        DataType::UInt32 => average_bytes::<u32>(a, b),
        DataType::UInt64 => average_bytes::<u64>(a, b),
        DataType::Int8 => average_bytes::<i8>(a, b),
        DataType::Int16 => average_bytes::<i16>(a, b),
        DataType::Int32 => average_bytes::<i32>(a, b),
        DataType::Int64 => average_bytes::<i64>(a, b),
        DataType::Float32 => average_bytes::<f32>(a, b),
        DataType::Float64 => average_bytes::<f64>(a, b),
    }
}

/// Produces the next pyramid level from one level's frames.
pub(crate) struct FrameScaler {
    data_type: DataType,
    width: usize,
    height: usize,
    /// A downsampled frame waiting for its averaging partner.
    partner: Option<Vec<u8>>,
}

impl FrameScaler {
    /// Create a scaler consuming frames of the given source-level dimensions.
    pub(crate) fn new(dimensions: &Dimensions, data_type: DataType) -> Self {
        Self {
            data_type,
            width: dimensions.width_dim().array_size_px() as usize,
            height: dimensions.height_dim().array_size_px() as usize,
            partner: None,
        }
    }

    /// Feed one source-level frame. Returns the next-level frame once a pair
    /// of source frames has been consumed.
    pub(crate) fn scale_frame(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let down = downsample_frame(self.data_type, frame, self.width, self.height);
        match self.partner.take() {
            Some(first) => Some(average_frames(self.data_type, &first, &down)),
            None => {
                self.partner = Some(down);
                None
            }
        }
    }

    /// Take the unpaired trailing frame at stream end, if any. It is emitted
    /// downsampled but without an averaging partner.
    pub(crate) fn take_residual(&mut self) -> Option<Vec<u8>> {
        self.partner.take()
    }
}

/// The dimensions of the next pyramid level: image axes ceil-halved with
/// chunk extents clamped to the shrunken array, other axes unchanged.
///
/// Returns [`None`] when the current level is a single pixel in both image
/// axes, ending the scaler chain.
pub(crate) fn scaled_dimensions(
    dimensions: &Dimensions,
) -> Result<Option<Dimensions>, ZarrError> {
    let width = dimensions.width_dim().array_size_px();
    let height = dimensions.height_dim().array_size_px();
    if width <= 1 && height <= 1 {
        return Ok(None);
    }

    let image_axes = dimensions.len() - 2;
    let scaled = dimensions
        .iter()
        .enumerate()
        .map(|(axis, dim)| {
            if axis < image_axes {
                Ok(dim.clone())
            } else {
                let array_size_px = dim.array_size_px().div_ceil(2);
                Dimension::new(
                    dim.name(),
                    dim.kind(),
                    array_size_px,
                    dim.chunk_size_px().min(array_size_px),
                    dim.shard_size_chunks(),
                )
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Dimensions::new(scaled).map(Some)
}
