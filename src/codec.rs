//! Blosc chunk compression.
//!
//! Chunks are compressed with one-shot blosc contexts before they are handed
//! to a sink. Only the parameters of the codec are modelled here; the
//! concrete compression libraries are whatever the linked blosc build
//! provides (`lz4` and `zstd`).

use serde::{Deserialize, Serialize};

use crate::error::ZarrError;

/// A compression library usable inside a blosc container.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BloscCodec {
    /// LZ4.
    Lz4,
    /// Zstandard.
    Zstd,
}

impl BloscCodec {
    /// The blosc compressor name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }
}

/// The shuffle filter applied before compression.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BloscShuffle {
    /// No shuffling.
    None,
    /// Byte-wise shuffling.
    Byte,
    /// Bit-wise shuffling.
    Bit,
}

impl BloscShuffle {
    /// The numeric shuffle mode blosc and the Zarr metadata use.
    #[must_use]
    pub const fn as_int(&self) -> i32 {
        match self {
            Self::None => 0,
            Self::Byte => 1,
            Self::Bit => 2,
        }
    }
}

/// Parameters for blosc chunk compression.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BloscCompressionParams {
    codec: BloscCodec,
    clevel: u8,
    shuffle: BloscShuffle,
}

impl Default for BloscCompressionParams {
    fn default() -> Self {
        Self {
            codec: BloscCodec::Lz4,
            clevel: 1,
            shuffle: BloscShuffle::Byte,
        }
    }
}

impl BloscCompressionParams {
    /// Create blosc compression parameters.
    ///
    /// # Errors
    /// Returns [`ZarrError::InvalidArgument`] if `clevel` is not in `0..=9`.
    pub fn new(codec: BloscCodec, clevel: u8, shuffle: BloscShuffle) -> Result<Self, ZarrError> {
        if clevel > 9 {
            return Err(ZarrError::InvalidArgument(format!(
                "blosc clevel {clevel} is not in 0..=9"
            )));
        }
        Ok(Self {
            codec,
            clevel,
            shuffle,
        })
    }

    /// Get the compression library.
    #[must_use]
    pub const fn codec(&self) -> BloscCodec {
        self.codec
    }

    /// Get the compression level.
    #[must_use]
    pub const fn clevel(&self) -> u8 {
        self.clevel
    }

    /// Get the shuffle filter.
    #[must_use]
    pub const fn shuffle(&self) -> BloscShuffle {
        self.shuffle
    }

    /// Compress a chunk, shuffling with the element size `typesize`.
    ///
    /// # Errors
    /// Returns [`ZarrError::InternalError`] if blosc fails to compress, which
    /// with a valid destination buffer indicates a blosc misconfiguration.
    #[cfg(feature = "blosc")]
    pub fn compress(&self, bytes: &[u8], typesize: usize) -> Result<Vec<u8>, ZarrError> {
        blosc_compress_bytes(bytes, self.clevel, self.shuffle, typesize, self.codec)
    }
}

/// The fixed header overhead blosc adds to an incompressible buffer.
#[cfg(feature = "blosc")]
const BLOSC_MAX_OVERHEAD: usize = blosc_sys::BLOSC_MAX_OVERHEAD as usize;

#[cfg(feature = "blosc")]
fn blosc_compress_bytes(
    src: &[u8],
    clevel: u8,
    shuffle: BloscShuffle,
    typesize: usize,
    codec: BloscCodec,
) -> Result<Vec<u8>, ZarrError> {
    let compressor = std::ffi::CString::new(codec.as_str())
        .map_err(|err| ZarrError::InternalError(err.to_string()))?;
    let mut dest = vec![0u8; src.len() + BLOSC_MAX_OVERHEAD];

    // SAFETY: the source and destination pointers are valid for the lengths
    // passed, and the destination is at least nbytes + BLOSC_MAX_OVERHEAD.
    let destsize = unsafe {
        blosc_sys::blosc_compress_ctx(
            i32::from(clevel),
            shuffle.as_int(),
            typesize,
            src.len(),
            src.as_ptr().cast(),
            dest.as_mut_ptr().cast(),
            dest.len(),
            compressor.as_ptr(),
            0, // automatic blocksize
            1, // jobs run one chunk per worker thread
        )
    };
    if destsize <= 0 {
        return Err(ZarrError::InternalError(format!(
            "blosc failed to compress {} bytes (status {destsize})",
            src.len()
        )));
    }
    dest.truncate(destsize as usize);
    Ok(dest)
}

/// The Zarr V2 `compressor` metadata for blosc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloscMetadataV2 {
    /// The numcodecs codec id, always `blosc`.
    pub id: String,
    /// The compression library name.
    pub cname: String,
    /// The compression level.
    pub clevel: u8,
    /// The numeric shuffle mode.
    pub shuffle: i32,
    /// The block size; zero selects it automatically.
    pub blocksize: u64,
}

impl From<&BloscCompressionParams> for BloscMetadataV2 {
    fn from(params: &BloscCompressionParams) -> Self {
        Self {
            id: "blosc".to_string(),
            cname: params.codec().as_str().to_string(),
            clevel: params.clevel(),
            shuffle: params.shuffle().as_int(),
            blocksize: 0,
        }
    }
}

/// A Zarr V3 codec descriptor for blosc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloscMetadataV3 {
    /// The codec extension URI.
    pub codec: String,
    /// The codec configuration.
    pub configuration: BloscConfigurationV3,
}

/// The configuration block of a Zarr V3 blosc codec descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloscConfigurationV3 {
    /// The block size; zero selects it automatically.
    pub blocksize: u64,
    /// The compression level.
    pub clevel: u8,
    /// The compression library name.
    pub cname: String,
    /// The numeric shuffle mode.
    pub shuffle: i32,
}

impl From<&BloscCompressionParams> for BloscMetadataV3 {
    fn from(params: &BloscCompressionParams) -> Self {
        Self {
            codec: "https://purl.org/zarr/spec/codec/blosc/1.0".to_string(),
            configuration: BloscConfigurationV3 {
                blocksize: 0,
                clevel: params.clevel(),
                cname: params.codec().as_str().to_string(),
                shuffle: params.shuffle().as_int(),
            },
        }
    }
}
