//! Element data types supported by the stream engine.

use derive_more::Display;

/// The numerical representation of array elements.
///
/// Covers the fixed-width integer and IEEE floating point types defined by
/// both the Zarr V2 and V3 core specifications.
#[derive(Debug, Display, Clone, Copy, Eq, PartialEq)]
pub enum DataType {
    /// `uint8` / `|u1`.
    UInt8,
    /// `uint16` / `<u2`.
    UInt16,
    /// `uint32` / `<u4`.
    UInt32,
    /// `uint64` / `<u8`.
    UInt64,
    /// `int8` / `|i1`.
    Int8,
    /// `int16` / `<i2`.
    Int16,
    /// `int32` / `<i4`.
    Int32,
    /// `int64` / `<i8`.
    Int64,
    /// `float32` / `<f4`.
    Float32,
    /// `float64` / `<f8`.
    Float64,
}

impl DataType {
    /// The size in bytes of an element of this data type.
    #[must_use]
    pub const fn size(&self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::UInt16 | Self::Int16 => 2,
            Self::UInt32 | Self::Int32 | Self::Float32 => 4,
            Self::UInt64 | Self::Int64 | Self::Float64 => 8,
        }
    }

    /// The Zarr V3 data type name, e.g. `uint16`.
    #[must_use]
    pub const fn name_v3(&self) -> &'static str {
        match self {
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// The Zarr V2 (NumPy) data type code with its endianness prefix.
    ///
    /// Multi-byte types are written little-endian, single-byte types carry the
    /// not-applicable prefix `|`.
    #[must_use]
    pub const fn code_v2(&self) -> &'static str {
        match self {
            Self::UInt8 => "|u1",
            Self::UInt16 => "<u2",
            Self::UInt32 => "<u4",
            Self::UInt64 => "<u8",
            Self::Int8 => "|i1",
            Self::Int16 => "<i2",
            Self::Int32 => "<i4",
            Self::Int64 => "<i8",
            Self::Float32 => "<f4",
            Self::Float64 => "<f8",
        }
    }
}
