//! Zarr metadata documents.
//!
//! Serialisable representations of the JSON documents the engine emits:
//! `.zarray`/`.zgroup`/`.zattrs` for Zarr V2, the entry-point and
//! `meta/root/...` documents for Zarr V3, and the OME-NGFF 0.4 `multiscales`
//! attributes written at the group root.
//!
//! See <https://zarr-specs.readthedocs.io/en/latest/v2/v2.0.html> and
//! <https://ngff.openmicroscopy.org/0.4/>.

use serde::{Deserialize, Serialize};

use crate::codec::{BloscCompressionParams, BloscMetadataV2, BloscMetadataV3};
use crate::data_type::DataType;
use crate::dimension::{DimensionKind, Dimensions};

/// Zarr V2 array metadata (`.zarray`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayMetadataV2 {
    /// The storage specification version. Must be `2`.
    pub zarr_format: usize,
    /// The array extent along each dimension, outermost first.
    pub shape: Vec<u64>,
    /// The chunk extent along each dimension, outermost first.
    pub chunks: Vec<u64>,
    /// The NumPy data type code with its endianness prefix.
    pub dtype: String,
    /// The chunk compressor, or `null` for raw chunks.
    pub compressor: Option<BloscMetadataV2>,
    /// The element value for uninitialised portions of the array.
    pub fill_value: i64,
    /// The chunk memory layout. Always row-major.
    pub order: String,
    /// Chunk filters. Always `null`.
    pub filters: Option<serde_json::Value>,
}

impl ArrayMetadataV2 {
    /// Create `.zarray` metadata.
    #[must_use]
    pub fn new(
        shape: Vec<u64>,
        chunks: Vec<u64>,
        data_type: DataType,
        compression: Option<&BloscCompressionParams>,
    ) -> Self {
        Self {
            zarr_format: 2,
            shape,
            chunks,
            dtype: data_type.code_v2().to_string(),
            compressor: compression.map(BloscMetadataV2::from),
            fill_value: 0,
            order: "C".to_string(),
            filters: None,
        }
    }
}

/// Zarr V2 group metadata (`.zgroup`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMetadataV2 {
    /// The storage specification version. Must be `2`.
    pub zarr_format: usize,
}

impl Default for GroupMetadataV2 {
    fn default() -> Self {
        Self { zarr_format: 2 }
    }
}

/// The Zarr V3 entry-point metadata (`zarr.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPointMetadataV3 {
    /// Protocol extensions. Always empty.
    pub extensions: Vec<serde_json::Value>,
    /// The metadata encoding URI.
    pub metadata_encoding: String,
    /// The suffix of metadata keys.
    pub metadata_key_suffix: String,
    /// The protocol version URI.
    pub zarr_format: String,
}

impl Default for EntryPointMetadataV3 {
    fn default() -> Self {
        Self {
            extensions: Vec::new(),
            metadata_encoding: "https://purl.org/zarr/spec/protocol/core/3.0".to_string(),
            metadata_key_suffix: ".json".to_string(),
            zarr_format: "https://purl.org/zarr/spec/protocol/core/3.0".to_string(),
        }
    }
}

/// Zarr V3 root group metadata (`meta/root.group.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMetadataV3 {
    /// User attributes; carries the OME-NGFF multiscales document.
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// The regular chunk grid of a Zarr V3 array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkGridMetadataV3 {
    /// The grid type, always `regular`.
    #[serde(rename = "type")]
    pub grid_type: String,
    /// The chunk key separator.
    pub separator: String,
    /// The chunk extent along each dimension, outermost first.
    pub chunk_shape: Vec<u64>,
}

/// The sharding storage transformer of a Zarr V3 array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageTransformerMetadataV3 {
    /// The transformer type.
    #[serde(rename = "type")]
    pub transformer_type: String,
    /// The transformer extension URI.
    pub extension: String,
    /// The transformer configuration.
    pub configuration: ShardingConfigurationV3,
}

/// The configuration of the sharding storage transformer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardingConfigurationV3 {
    /// The shard extent in chunks along each dimension, outermost first.
    pub chunks_per_shard: Vec<u64>,
}

/// Zarr V3 array metadata (`meta/root/<level>.array.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayMetadataV3 {
    /// The array extent along each dimension, outermost first.
    pub shape: Vec<u64>,
    /// The element data type name.
    pub data_type: String,
    /// The chunk grid.
    pub chunk_grid: ChunkGridMetadataV3,
    /// The chunk memory layout. Always row-major.
    pub chunk_memory_layout: String,
    /// The element value for uninitialised portions of the array.
    pub fill_value: i64,
    /// The codec pipeline applied to chunks before storage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codecs: Vec<BloscMetadataV3>,
    /// The storage transformers; carries the sharding configuration.
    pub storage_transformers: Vec<StorageTransformerMetadataV3>,
    /// Protocol extensions. Always empty.
    pub extensions: Vec<serde_json::Value>,
    /// User attributes.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl ArrayMetadataV3 {
    /// Create array metadata for a sharded V3 array.
    #[must_use]
    pub fn new(
        shape: Vec<u64>,
        chunk_shape: Vec<u64>,
        chunks_per_shard: Vec<u64>,
        data_type: DataType,
        compression: Option<&BloscCompressionParams>,
    ) -> Self {
        Self {
            shape,
            data_type: data_type.name_v3().to_string(),
            chunk_grid: ChunkGridMetadataV3 {
                grid_type: "regular".to_string(),
                separator: "/".to_string(),
                chunk_shape,
            },
            chunk_memory_layout: "C".to_string(),
            fill_value: 0,
            codecs: compression.map(BloscMetadataV3::from).into_iter().collect(),
            storage_transformers: vec![StorageTransformerMetadataV3 {
                transformer_type: "indexed".to_string(),
                extension: "https://purl.org/zarr/spec/storage_transformers/sharding/1.0"
                    .to_string(),
                configuration: ShardingConfigurationV3 { chunks_per_shard },
            }],
            extensions: Vec::new(),
            attributes: serde_json::Map::new(),
        }
    }
}

/// One axis of an OME-NGFF multiscale image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmeAxis {
    /// The axis name.
    pub name: String,
    /// The axis type: `space`, `channel`, `time`, or `other`.
    #[serde(rename = "type")]
    pub axis_type: String,
    /// The physical unit of the axis, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A scale coordinate transformation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmeCoordinateTransformation {
    /// The transformation type, always `scale`.
    #[serde(rename = "type")]
    pub transformation_type: String,
    /// The per-axis scale factors.
    pub scale: Vec<f64>,
}

/// One resolution level of an OME-NGFF multiscale image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmeDataset {
    /// The store-relative path of the level.
    pub path: String,
    /// The transformations mapping the level onto physical space.
    #[serde(rename = "coordinateTransformations")]
    pub coordinate_transformations: Vec<OmeCoordinateTransformation>,
}

/// An OME-NGFF 0.4 multiscale image description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmeMultiscale {
    /// The OME-NGFF version.
    pub version: String,
    /// The image name.
    pub name: String,
    /// The image axes, outermost first.
    pub axes: Vec<OmeAxis>,
    /// The resolution levels, finest first.
    pub datasets: Vec<OmeDataset>,
    /// The downscaling method.
    #[serde(rename = "type")]
    pub downscaling_type: String,
}

/// The group attributes holding the multiscales document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmeMultiscalesAttributes {
    /// The multiscale image descriptions.
    pub multiscales: Vec<OmeMultiscale>,
}

impl OmeMultiscalesAttributes {
    /// Build the multiscales document for `n_levels` pyramid levels over the
    /// level-zero dimensions. Level `i` scales the image axes by `2^i`.
    #[must_use]
    pub fn new(dimensions: &Dimensions, n_levels: usize) -> Self {
        let axes = dimensions
            .iter()
            .map(|dim| OmeAxis {
                name: dim.name().to_string(),
                axis_type: dim.kind().ome_type().to_string(),
                unit: match dim.kind() {
                    DimensionKind::Space => Some("micrometer".to_string()),
                    _ => None,
                },
            })
            .collect();

        let image_axes = dimensions.len() - 2;
        let datasets = (0..n_levels)
            .map(|level| {
                let scale = (0..dimensions.len())
                    .map(|axis| {
                        if axis >= image_axes {
                            (1u64 << level) as f64
                        } else {
                            1.0
                        }
                    })
                    .collect();
                OmeDataset {
                    path: level.to_string(),
                    coordinate_transformations: vec![OmeCoordinateTransformation {
                        transformation_type: "scale".to_string(),
                        scale,
                    }],
                }
            })
            .collect();

        Self {
            multiscales: vec![OmeMultiscale {
                version: "0.4".to_string(),
                name: "/".to_string(),
                axes,
                datasets,
                downscaling_type: "local_mean".to_string(),
            }],
        }
    }

    /// The document as a JSON attribute map.
    ///
    /// # Errors
    /// Returns an error if serialisation fails, which indicates a bug in the
    /// metadata model.
    pub fn to_attributes(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => unreachable!("multiscales attributes serialise to an object"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BloscCodec, BloscShuffle};
    use crate::dimension::Dimension;

    fn dims() -> Dimensions {
        Dimensions::new(vec![
            Dimension::new("t", DimensionKind::Time, 0, 5, 0).unwrap(),
            Dimension::new("y", DimensionKind::Space, 48, 16, 0).unwrap(),
            Dimension::new("x", DimensionKind::Space, 64, 16, 0).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn zarray_fields() {
        let params =
            BloscCompressionParams::new(BloscCodec::Zstd, 1, BloscShuffle::Byte).unwrap();
        let metadata = ArrayMetadataV2::new(
            vec![5, 48, 64],
            vec![5, 16, 16],
            DataType::UInt16,
            Some(&params),
        );
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["zarr_format"], 2);
        assert_eq!(json["dtype"], "<u2");
        assert_eq!(json["order"], "C");
        assert_eq!(json["filters"], serde_json::Value::Null);
        assert_eq!(json["fill_value"], 0);
        assert_eq!(json["compressor"]["id"], "blosc");
        assert_eq!(json["compressor"]["cname"], "zstd");

        let uncompressed =
            ArrayMetadataV2::new(vec![5, 48, 64], vec![5, 16, 16], DataType::UInt16, None);
        let json = serde_json::to_value(&uncompressed).unwrap();
        assert_eq!(json["compressor"], serde_json::Value::Null);
    }

    #[test]
    fn array_json_v3_fields() {
        let metadata = ArrayMetadataV3::new(
            vec![10, 48, 64],
            vec![5, 16, 16],
            vec![2, 1, 2],
            DataType::UInt16,
            None,
        );
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["data_type"], "uint16");
        assert_eq!(json["chunk_grid"]["type"], "regular");
        assert_eq!(json["chunk_grid"]["chunk_shape"][0], 5);
        assert_eq!(
            json["storage_transformers"][0]["configuration"]["chunks_per_shard"][2],
            2
        );
        assert!(json.get("codecs").is_none());
    }

    #[test]
    fn multiscales_scales_image_axes() {
        let attributes = OmeMultiscalesAttributes::new(&dims(), 3);
        let json = serde_json::to_value(&attributes).unwrap();
        let multiscale = &json["multiscales"][0];
        assert_eq!(multiscale["version"], "0.4");
        assert_eq!(multiscale["axes"][0]["type"], "time");
        assert_eq!(multiscale["axes"][2]["unit"], "micrometer");
        assert_eq!(multiscale["datasets"][2]["path"], "2");
        let scale = &multiscale["datasets"][2]["coordinateTransformations"][0]["scale"];
        assert_eq!(scale[0], 1.0);
        assert_eq!(scale[1], 4.0);
        assert_eq!(scale[2], 4.0);
    }
}
