//! The Zarr V3 array writer: chunks aggregate into shards with a trailing
//! index table.

use std::sync::Arc;

use itertools::Itertools;
use parking_lot::Mutex;

use crate::error::ZarrError;
use crate::metadata::ArrayMetadataV3;
use crate::sink::SinkCreator;
use crate::thread_pool::ThreadPool;

use super::{encode_chunk, WriterBase};

/// The index-table sentinel for a chunk that never received data.
const ABSENT: u64 = u64::MAX;

/// One shard's accumulating bytes and index table.
///
/// Chunk flush jobs append under the shard's mutex, in completion order; the
/// index table slot of each chunk is fixed by its position in the shard, so
/// the table stays consistent whatever order jobs finish in. The shard is
/// written out by whichever job observes the last expected chunk arrive.
struct ShardState {
    key: String,
    bytes: Vec<u8>,
    /// `(offset, nbytes)` pairs, one per chunk slot, little-endian on disk.
    table: Vec<u64>,
    appended: usize,
    /// The number of chunks this shard will receive, known once the shard's
    /// last slab has been enqueued.
    expected: Option<usize>,
    written: bool,
}

impl ShardState {
    fn new(key: String, chunks_per_shard: usize) -> Self {
        Self {
            key,
            bytes: Vec::new(),
            table: vec![ABSENT; 2 * chunks_per_shard],
            appended: 0,
            expected: None,
            written: false,
        }
    }

    /// Append one encoded chunk at the current end offset and record its
    /// index entry. Writes the shard out when the last expected chunk
    /// arrives.
    fn append_chunk(
        &mut self,
        internal_index: usize,
        encoded: &[u8],
        sinks: &SinkCreator,
    ) -> Result<(), ZarrError> {
        self.table[2 * internal_index] = self.bytes.len() as u64;
        self.table[2 * internal_index + 1] = encoded.len() as u64;
        self.bytes.extend_from_slice(encoded);
        self.appended += 1;
        if self.expected == Some(self.appended) && !self.written {
            self.write_out(sinks)?;
        }
        Ok(())
    }

    /// Mark the shard complete with its final chunk count, writing it out if
    /// every chunk has already arrived.
    fn close(&mut self, expected: usize, sinks: &SinkCreator) -> Result<(), ZarrError> {
        self.expected = Some(expected);
        if self.appended == expected && !self.written {
            self.write_out(sinks)?;
        }
        Ok(())
    }

    /// Write the shard bytes followed by the index table.
    fn write_out(&mut self, sinks: &SinkCreator) -> Result<(), ZarrError> {
        let mut table_bytes = Vec::with_capacity(self.table.len() * std::mem::size_of::<u64>());
        for entry in &self.table {
            table_bytes.extend_from_slice(&entry.to_le_bytes());
        }

        let mut sink = sinks.make_sink(&self.key)?;
        sink.write(0, &self.bytes)?;
        sink.write(self.bytes.len() as u64, &table_bytes)?;
        sink.finalize()?;

        self.written = true;
        self.bytes = Vec::new();
        Ok(())
    }
}

/// A Zarr V3 writer for one level of detail.
pub(crate) struct ZarrV3Writer {
    base: WriterBase,
    /// The open shard row: every shard whose append-dimension shard
    /// coordinate matches the current slab.
    shards: Vec<Arc<Mutex<ShardState>>>,
    /// Chunks enqueued per shard in the open row, on the appending thread.
    planned: Vec<usize>,
}

impl ZarrV3Writer {
    pub(super) fn new(base: WriterBase) -> Result<Self, ZarrError> {
        let mut writer = Self {
            base,
            shards: Vec::new(),
            planned: Vec::new(),
        };
        writer.arm_shard_row(0)?;
        Ok(writer)
    }

    pub(super) fn write_frame(&mut self, frame: &[u8]) -> Result<(), ZarrError> {
        if self.base.write_frame(frame)? {
            self.flush_slab(false)?;
            self.base.current_slab += 1;
        }
        Ok(())
    }

    pub(super) fn finalize(&mut self) -> Result<(), ZarrError> {
        if self.base.has_partial_slab()? {
            self.flush_slab(true)?;
            self.base.current_slab += 1;
        } else {
            self.close_shard_row()?;
        }
        Ok(())
    }

    pub(super) fn reset(&mut self, thread_pool: Arc<ThreadPool>) -> Result<(), ZarrError> {
        self.base.reset(thread_pool)?;
        self.arm_shard_row(0)
    }

    /// Allocate fresh shard state for the row of shards at the given
    /// append-dimension shard coordinate.
    fn arm_shard_row(&mut self, append_shard: u64) -> Result<(), ZarrError> {
        let dims = self.base.dimensions();
        let n_shards = dims.shards_per_slab() as usize;
        let chunks_per_shard = usize::try_from(dims.chunks_per_shard()?)
            .map_err(|_| ZarrError::Overflow)?;
        self.shards = (0..n_shards as u64)
            .map(|shard| {
                Arc::new(Mutex::new(ShardState::new(
                    self.shard_key(append_shard, shard),
                    chunks_per_shard,
                )))
            })
            .collect();
        self.planned = vec![0; n_shards];
        Ok(())
    }

    /// Enqueue one compress-and-append job per chunk of the current slab,
    /// closing the shard row when the append-dimension shard completes.
    fn flush_slab(&mut self, is_final: bool) -> Result<(), ZarrError> {
        let dims = self.base.dimensions();
        let append_shard_chunks = dims[0].shard_size_chunks();
        let append_internal = self.base.current_slab % append_shard_chunks;
        let interior_chunks = dims.chunks_per_shard_interior() as usize;

        for slot in 0..self.base.chunk_buffers.len() {
            let Some(bytes) = self.base.take_chunk(slot) else {
                continue;
            };
            let dims = self.base.dimensions();
            let shard = dims.shard_index_for_chunk(slot as u64) as usize;
            let internal_index = append_internal as usize * interior_chunks
                + dims.shard_internal_index(slot as u64) as usize;
            self.planned[shard] += 1;

            let state = self.shards[shard].clone();
            let sinks = self.base.sinks.clone();
            let compression = self.base.config.compression;
            let data_type = self.base.config.data_type;
            self.base.thread_pool.submit(move |err| {
                let result = encode_chunk(bytes, compression.as_ref(), data_type)
                    .and_then(|encoded| state.lock().append_chunk(internal_index, &encoded, &sinks));
                match result {
                    Ok(()) => true,
                    Err(error) => {
                        err.push_str(&format!("failed to append shard chunk: {error}"));
                        false
                    }
                }
            })?;
        }

        if is_final || append_internal + 1 == append_shard_chunks {
            self.close_shard_row()?;
            if !is_final {
                self.arm_shard_row((self.base.current_slab + 1) / append_shard_chunks)?;
            }
        }
        Ok(())
    }

    /// Fix the expected chunk count of every shard in the open row. Shards
    /// whose chunks have all arrived are written out by the close job; the
    /// rest are written by their last arriving chunk job.
    fn close_shard_row(&mut self) -> Result<(), ZarrError> {
        for (shard, &planned) in self.shards.iter().zip(&self.planned) {
            if planned == 0 {
                // No frame reached this shard; no file is written and a
                // reader treats the chunks as fill.
                continue;
            }
            let state = shard.clone();
            let sinks = self.base.sinks.clone();
            self.base.thread_pool.submit(move |err| {
                match state.lock().close(planned, &sinks) {
                    Ok(()) => true,
                    Err(error) => {
                        err.push_str(&format!("failed to close shard: {error}"));
                        false
                    }
                }
            })?;
        }
        Ok(())
    }

    /// The store key of a shard: `data/root/<level>/c<t>/<coords...>` with
    /// the append-dimension shard coordinate first.
    fn shard_key(&self, append_shard: u64, shard: u64) -> String {
        let dims = self.base.dimensions();
        let mut shard = shard;
        let mut coordinates = vec![0; dims.len() - 1];
        for (coordinate, dim) in coordinates.iter_mut().rev().zip(dims.iter().skip(1).rev()) {
            *coordinate = shard % dim.shard_count();
            shard /= dim.shard_count();
        }
        format!(
            "data/root/{}/c{append_shard}/{}",
            self.base.config.level_of_detail,
            coordinates.iter().map(|index| index.to_string()).join("/")
        )
    }

    /// Write `meta/root/<level>.array.json`.
    pub(super) fn write_metadata(&self) -> Result<(), ZarrError> {
        let dims = self.base.dimensions();
        let chunks_per_shard = dims.iter().map(|d| d.shard_size_chunks()).collect();
        let metadata = ArrayMetadataV3::new(
            self.base.shape(),
            self.base.chunk_shape(),
            chunks_per_shard,
            self.base.config.data_type,
            self.base.config.compression.as_ref(),
        );

        let key = format!("meta/root/{}.array.json", self.base.config.level_of_detail);
        let mut sink = self.base.sinks.make_sink(&key)?;
        sink.write(0, &serde_json::to_vec_pretty(&metadata)?)?;
        sink.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array_writer::ArrayWriterConfig;
    use crate::data_type::DataType;
    use crate::dimension::{Dimension, DimensionKind, Dimensions};

    /// t: 1 frame per chunk, 2 chunks per shard; y: one 4px chunk; x: two
    /// 4px chunks in one shard. One shard per row, 4 chunks per shard.
    fn writer_at(root: &std::path::Path) -> ZarrV3Writer {
        let config = ArrayWriterConfig {
            dimensions: Dimensions::new(vec![
                Dimension::new("t", DimensionKind::Time, 0, 1, 2).unwrap(),
                Dimension::new("y", DimensionKind::Space, 4, 4, 1).unwrap(),
                Dimension::new("x", DimensionKind::Space, 8, 4, 2).unwrap(),
            ])
            .unwrap(),
            data_type: DataType::UInt8,
            level_of_detail: 0,
            compression: None,
        };
        let base = WriterBase::new(
            config,
            crate::sink::SinkCreator::Filesystem {
                root: root.to_path_buf(),
            },
            Arc::new(ThreadPool::new(1, |err| panic!("{err}"))),
        )
        .unwrap();
        ZarrV3Writer::new(base).unwrap()
    }

    fn read_table(file: &[u8], chunks_per_shard: usize) -> Vec<u64> {
        let table_bytes = &file[file.len() - 16 * chunks_per_shard..];
        table_bytes
            .chunks_exact(8)
            .map(|entry| u64::from_le_bytes(entry.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn even_shards_have_chunks_and_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut writer = writer_at(tmp.path());

        let frame = vec![1u8; 32];
        for _ in 0..4 {
            writer.write_frame(&frame).unwrap();
        }
        writer.finalize().unwrap();
        writer.base.thread_pool.await_stop();
        writer.write_metadata().unwrap();

        // Two shard rows, one shard each: 4 chunks of 16 bytes + 4 index
        // entries of 16 bytes.
        for t in 0..2 {
            let path = tmp.path().join(format!("data/root/0/c{t}/0/0"));
            let file = std::fs::read(&path).unwrap();
            assert_eq!(file.len(), 4 * 16 + 4 * 16, "{path:?}");

            let table = read_table(&file, 4);
            // One worker thread flushes chunks in submission order.
            assert_eq!(table, [0, 16, 16, 16, 32, 16, 48, 16]);
        }

        let metadata: serde_json::Value = serde_json::from_slice(
            &std::fs::read(tmp.path().join("meta/root/0.array.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(metadata["data_type"], "uint8");
        assert_eq!(metadata["shape"][0], 4);
        assert_eq!(
            metadata["storage_transformers"][0]["configuration"]["chunks_per_shard"][0],
            2
        );
    }

    #[test]
    fn unfilled_shard_slots_hold_the_absent_sentinel() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut writer = writer_at(tmp.path());

        // One frame: half the shard's chunk slots are never written.
        writer.write_frame(&vec![1u8; 32]).unwrap();
        writer.finalize().unwrap();
        writer.base.thread_pool.await_stop();

        let file = std::fs::read(tmp.path().join("data/root/0/c0/0/0")).unwrap();
        assert_eq!(file.len(), 2 * 16 + 4 * 16);

        let table = read_table(&file, 4);
        assert_eq!(&table[..4], [0, 16, 16, 16]);
        assert!(table[4..].iter().all(|&entry| entry == u64::MAX));
    }

    #[test]
    fn shard_index_nbytes_sum_to_payload_length() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut writer = writer_at(tmp.path());

        for _ in 0..3 {
            writer.write_frame(&vec![1u8; 32]).unwrap();
        }
        writer.finalize().unwrap();
        writer.base.thread_pool.await_stop();

        for t in 0..2 {
            let file = std::fs::read(tmp.path().join(format!("data/root/0/c{t}/0/0"))).unwrap();
            let table = read_table(&file, 4);
            let payload: u64 = table
                .chunks_exact(2)
                .filter(|entry| entry[1] != u64::MAX)
                .map(|entry| entry[1])
                .sum();
            assert_eq!(payload as usize, file.len() - 4 * 16);
        }
    }
}
