//! End-to-end Zarr V2 write scenarios against a filesystem store.

use zarrs_stream::{
    BloscCodec, BloscCompressionParams, BloscShuffle, DataType, Dimension, DimensionKind,
    ZarrStream, ZarrStreamSettings, ZarrVersion,
};

fn dim(
    name: &str,
    kind: DimensionKind,
    array_size_px: u64,
    chunk_size_px: u64,
) -> Dimension {
    Dimension::new(name, kind, array_size_px, chunk_size_px, 0).unwrap()
}

fn settings(store_path: &std::path::Path, dimensions: Vec<Dimension>) -> ZarrStreamSettings {
    ZarrStreamSettings {
        store_path: store_path.to_str().unwrap().to_string(),
        s3: None,
        dimensions,
        data_type: DataType::UInt8,
        compression: None,
        multiscale: false,
    }
}

fn read_json(path: &std::path::Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[test]
fn single_frame_dataset() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path().join("single.zarr");

    let mut stream = ZarrStream::new(
        settings(
            &root,
            vec![
                dim("t", DimensionKind::Time, 0, 1),
                dim("y", DimensionKind::Space, 4, 4),
                dim("x", DimensionKind::Space, 4, 4),
            ],
        ),
        ZarrVersion::V2,
    )
    .unwrap();

    stream.append(&[42u8; 16]).unwrap();
    stream.stop().unwrap();

    let chunk = std::fs::read(root.join("0/0/0/0")).unwrap();
    assert_eq!(chunk, [42u8; 16]);

    let zarray = read_json(&root.join("0/.zarray"));
    assert_eq!(zarray["zarr_format"], 2);
    assert_eq!(zarray["shape"], serde_json::json!([1, 4, 4]));
    assert_eq!(zarray["chunks"], serde_json::json!([1, 4, 4]));
    assert_eq!(zarray["dtype"], "|u1");
    assert_eq!(zarray["compressor"], serde_json::Value::Null);
    assert_eq!(zarray["order"], "C");
    assert_eq!(zarray["fill_value"], 0);

    assert_eq!(read_json(&root.join("0/.zattrs")), serde_json::json!({}));
    assert_eq!(read_json(&root.join(".zgroup"))["zarr_format"], 2);
    let multiscales = &read_json(&root.join(".zattrs"))["multiscales"][0];
    assert_eq!(multiscales["version"], "0.4");
    assert_eq!(multiscales["datasets"][0]["path"], "0");
}

#[test]
fn ragged_interior_dimension_pads_with_zeros() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path().join("ragged.zarr");

    // Five planes with two planes per chunk: the last z-chunk holds one
    // plane of data and one of padding.
    let mut stream = ZarrStream::new(
        settings(
            &root,
            vec![
                dim("t", DimensionKind::Time, 0, 5),
                dim("z", DimensionKind::Space, 5, 2),
                dim("y", DimensionKind::Space, 48, 16),
                dim("x", DimensionKind::Space, 64, 16),
            ],
        ),
        ZarrVersion::V2,
    )
    .unwrap();

    let frame_bytes = 48 * 64;
    for frame in 0..25u32 {
        stream.append(&vec![frame as u8; frame_bytes]).unwrap();
    }
    stream.stop().unwrap();

    let zarray = read_json(&root.join("0/.zarray"));
    assert_eq!(zarray["shape"], serde_json::json!([5, 5, 48, 64]));
    assert_eq!(zarray["chunks"], serde_json::json!([5, 2, 16, 16]));

    // Every chunk file has the full chunk size, three z-chunks deep.
    let chunk_bytes = 5 * 2 * 16 * 16;
    for z in 0..3 {
        for y in 0..3 {
            for x in 0..4 {
                let path = root.join(format!("0/0/{z}/{y}/{x}"));
                assert_eq!(
                    std::fs::read(&path).unwrap().len(),
                    chunk_bytes,
                    "{path:?}"
                );
            }
        }
    }
    assert!(!root.join("0/0/3").exists());

    // The last z-chunk interleaves one plane of data with one of padding:
    // chunk layout is [t: 5][z: 2][y: 16][x: 16].
    let chunk = std::fs::read(root.join("0/0/2/0/0")).unwrap();
    let tile = 16 * 16;
    for t in 0..5 {
        let data_plane = &chunk[2 * t * tile..(2 * t + 1) * tile];
        let expected = (t * 5 + 4) as u8;
        assert!(data_plane.iter().all(|&b| b == expected), "t {t}");
        let pad_plane = &chunk[(2 * t + 1) * tile..(2 * t + 2) * tile];
        assert!(pad_plane.iter().all(|&b| b == 0), "t {t}");
    }
}

#[test]
fn uncompressed_totals_match_padded_frame_count() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path().join("totals.zarr");

    let mut stream = ZarrStream::new(
        settings(
            &root,
            vec![
                dim("t", DimensionKind::Time, 0, 7),
                dim("y", DimensionKind::Space, 48, 16),
                dim("x", DimensionKind::Space, 64, 16),
            ],
        ),
        ZarrVersion::V2,
    )
    .unwrap();

    let frame_bytes: u64 = 48 * 64;
    for _ in 0..23 {
        stream.append(&vec![1u8; frame_bytes as usize]).unwrap();
    }
    stream.stop().unwrap();

    // 23 frames pad to four chunks of seven frames along t.
    let mut total = 0;
    for t in 0..4 {
        for y in 0..3 {
            for x in 0..4 {
                total += std::fs::metadata(root.join(format!("0/{t}/{y}/{x}")))
                    .unwrap()
                    .len();
            }
        }
    }
    assert_eq!(total, 28 * frame_bytes);

    let zarray = read_json(&root.join("0/.zarray"));
    assert_eq!(zarray["shape"][0], 23);
}

#[cfg(feature = "blosc")]
#[test]
fn compressed_chunks_with_rollover() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path().join("compressed.zarr");

    let mut config = settings(
        &root,
        vec![
            dim("t", DimensionKind::Time, 0, 7),
            dim("y", DimensionKind::Space, 48, 48),
            dim("x", DimensionKind::Space, 64, 64),
        ],
    );
    config.compression =
        Some(BloscCompressionParams::new(BloscCodec::Zstd, 1, BloscShuffle::Byte).unwrap());

    let mut stream = ZarrStream::new(config, ZarrVersion::V2).unwrap();
    for frame in 0..23u32 {
        stream.append(&vec![frame as u8; 48 * 64]).unwrap();
    }
    stream.stop().unwrap();

    // Three full chunks and one partial; all compress below the raw size.
    let chunk_bytes = 7 * 48 * 64;
    for t in 0..4 {
        let path = root.join(format!("0/{t}/0/0"));
        let size = std::fs::metadata(&path).unwrap().len() as usize;
        assert!(size > 0 && size < chunk_bytes, "{path:?}: {size}");
    }
    assert!(!root.join("0/4").exists());

    let zarray = read_json(&root.join("0/.zarray"));
    assert_eq!(zarray["compressor"]["id"], "blosc");
    assert_eq!(zarray["compressor"]["cname"], "zstd");
    assert_eq!(zarray["compressor"]["clevel"], 1);
    assert_eq!(zarray["compressor"]["shuffle"], 1);
}

#[test]
fn multiscale_writes_an_image_pyramid() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path().join("pyramid.zarr");

    let mut config = settings(
        &root,
        vec![
            dim("t", DimensionKind::Time, 0, 4),
            dim("y", DimensionKind::Space, 64, 32),
            dim("x", DimensionKind::Space, 64, 32),
        ],
    );
    config.multiscale = true;

    let mut stream = ZarrStream::new(config, ZarrVersion::V2).unwrap();
    assert_eq!(stream.n_levels(), 7); // 64 -> 32 -> 16 -> 8 -> 4 -> 2 -> 1
    for _ in 0..4 {
        stream.append(&vec![100u8; 64 * 64]).unwrap();
    }
    stream.stop().unwrap();

    // Full resolution keeps all four frames, level one holds two averaged
    // frames, level two holds one.
    assert_eq!(
        read_json(&root.join("0/.zarray"))["shape"],
        serde_json::json!([4, 64, 64])
    );
    assert_eq!(
        read_json(&root.join("1/.zarray"))["shape"],
        serde_json::json!([2, 32, 32])
    );
    assert_eq!(
        read_json(&root.join("2/.zarray"))["shape"],
        serde_json::json!([1, 16, 16])
    );
    // The unpaired trailing frame cascades to the deepest level.
    assert_eq!(
        read_json(&root.join("6/.zarray"))["shape"],
        serde_json::json!([1, 1, 1])
    );

    // Averages of a constant image stay constant at every level.
    let level1 = std::fs::read(root.join("1/0/0/0")).unwrap();
    assert_eq!(level1.len(), 4 * 32 * 32);
    assert!(level1[..2 * 32 * 32].iter().all(|&b| b == 100));

    let datasets = &read_json(&root.join(".zattrs"))["multiscales"][0]["datasets"];
    assert_eq!(datasets.as_array().unwrap().len(), 7);
    assert_eq!(
        datasets[1]["coordinateTransformations"][0]["scale"],
        serde_json::json!([1.0, 2.0, 2.0])
    );
}

#[test]
fn restart_after_stop_writes_a_fresh_acquisition() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path().join("restart.zarr");

    let mut stream = ZarrStream::new(
        settings(
            &root,
            vec![
                dim("t", DimensionKind::Time, 0, 2),
                dim("y", DimensionKind::Space, 8, 8),
                dim("x", DimensionKind::Space, 8, 8),
            ],
        ),
        ZarrVersion::V2,
    )
    .unwrap();

    for _ in 0..4 {
        stream.append(&[1u8; 64]).unwrap();
    }
    stream.stop().unwrap();
    assert_eq!(read_json(&root.join("0/.zarray"))["shape"][0], 4);

    // The second acquisition reuses the armed stream and its store.
    for _ in 0..2 {
        stream.append(&[2u8; 64]).unwrap();
    }
    stream.stop().unwrap();
    assert_eq!(read_json(&root.join("0/.zarray"))["shape"][0], 2);
    assert_eq!(std::fs::read(root.join("0/0/0/0")).unwrap(), vec![2u8; 128]);
}
