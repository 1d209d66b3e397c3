//! The Zarr V2 array writer: one store key per chunk.

use std::sync::Arc;

use itertools::Itertools;

use crate::error::ZarrError;
use crate::metadata::ArrayMetadataV2;
use crate::thread_pool::ThreadPool;

use super::{encode_chunk, WriterBase};

/// A Zarr V2 writer for one level of detail.
pub(crate) struct ZarrV2Writer {
    base: WriterBase,
}

impl ZarrV2Writer {
    pub(super) fn new(base: WriterBase) -> Self {
        Self { base }
    }

    pub(super) fn write_frame(&mut self, frame: &[u8]) -> Result<(), ZarrError> {
        if self.base.write_frame(frame)? {
            self.flush_slab()?;
            self.base.current_slab += 1;
        }
        Ok(())
    }

    pub(super) fn finalize(&mut self) -> Result<(), ZarrError> {
        if self.base.has_partial_slab()? {
            self.flush_slab()?;
            self.base.current_slab += 1;
        }
        Ok(())
    }

    pub(super) fn reset(&mut self, thread_pool: Arc<ThreadPool>) -> Result<(), ZarrError> {
        self.base.reset(thread_pool)
    }

    /// Enqueue one compress-and-write job per chunk of the current slab.
    fn flush_slab(&mut self) -> Result<(), ZarrError> {
        for slot in 0..self.base.chunk_buffers.len() {
            let Some(bytes) = self.base.take_chunk(slot) else {
                continue;
            };
            let key = self.chunk_key(slot);
            let sinks = self.base.sinks.clone();
            let compression = self.base.config.compression;
            let data_type = self.base.config.data_type;

            self.base.thread_pool.submit(move |err| {
                let result = encode_chunk(bytes, compression.as_ref(), data_type)
                    .and_then(|encoded| {
                        let mut sink = sinks.make_sink(&key)?;
                        sink.write(0, &encoded)?;
                        sink.finalize()
                    });
                match result {
                    Ok(()) => true,
                    Err(error) => {
                        err.push_str(&format!("failed to write chunk {key:?}: {error}"));
                        false
                    }
                }
            })?;
        }
        Ok(())
    }

    /// The store key of a slab-local chunk: the level of detail, then one
    /// ASCII decimal coordinate per dimension, outermost first.
    fn chunk_key(&self, slot: usize) -> String {
        let coordinates = self.base.slot_coordinates(slot);
        std::iter::once(self.base.config.level_of_detail as u64)
            .chain(std::iter::once(self.base.current_slab))
            .chain(coordinates)
            .map(|index| index.to_string())
            .join("/")
    }

    /// Write `.zarray` and `.zattrs` at the level root.
    pub(super) fn write_metadata(&self) -> Result<(), ZarrError> {
        let level = self.base.config.level_of_detail;
        let metadata = ArrayMetadataV2::new(
            self.base.shape(),
            self.base.chunk_shape(),
            self.base.config.data_type,
            self.base.config.compression.as_ref(),
        );

        let mut sink = self.base.sinks.make_sink(&format!("{level}/.zarray"))?;
        sink.write(0, &serde_json::to_vec_pretty(&metadata)?)?;
        sink.finalize()?;

        let mut sink = self.base.sinks.make_sink(&format!("{level}/.zattrs"))?;
        sink.write(0, b"{}")?;
        sink.finalize()?;
        Ok(())
    }
}
