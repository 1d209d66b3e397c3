//! A sink writing to one S3 object, single-part or multipart.

use std::sync::Arc;

use s3::serde_types::Part;

use crate::config::global_config;
use crate::error::ZarrError;
use crate::s3::{S3Connection, S3ConnectionPool};

use super::Sink;

/// A sink backed by an S3 object.
///
/// Bytes buffer internally until a full part accumulates, which is uploaded
/// through a pooled connection. Objects smaller than one part are stored with
/// a single-part upload at finalize. S3 rejects non-final parts under 5 MiB,
/// so `flush` cannot close a partial part early; durability of the tail is
/// only guaranteed after `finalize`.
pub struct S3Sink {
    key: String,
    pool: Arc<S3ConnectionPool>,
    part_size: usize,
    buffer: Vec<u8>,
    offset: u64,
    upload_id: Option<String>,
    parts: Vec<Part>,
}

impl S3Sink {
    /// Create a sink for the object `key`, drawing connections from `pool`.
    #[must_use]
    pub fn new(key: String, pool: Arc<S3ConnectionPool>) -> Self {
        Self {
            key,
            pool,
            part_size: global_config().s3_part_size(),
            buffer: Vec::new(),
            offset: 0,
            upload_id: None,
            parts: Vec::new(),
        }
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&S3Connection) -> Result<T, ZarrError>,
    ) -> Result<T, ZarrError> {
        let connection = self.pool.get_connection().ok_or_else(|| {
            ZarrError::S3Error("the S3 connection pool is shutting down".to_string())
        })?;
        let result = op(&connection);
        self.pool.return_connection(connection);
        result
    }

    /// Upload one full part from the front of the buffer.
    fn upload_buffered_part(&mut self, final_part: bool) -> Result<(), ZarrError> {
        let part_bytes = if final_part {
            std::mem::take(&mut self.buffer)
        } else {
            let remainder = self.buffer.split_off(self.part_size);
            std::mem::replace(&mut self.buffer, remainder)
        };

        if self.upload_id.is_none() {
            let upload_id =
                self.with_connection(|connection| connection.create_multipart_upload(&self.key))?;
            self.upload_id = Some(upload_id);
        }
        let upload_id = self.upload_id.as_ref().map_or("", String::as_str).to_string();

        let part_number = self.parts.len() as u32 + 1;
        let part = self.with_connection(|connection| {
            connection.upload_part(&self.key, &upload_id, part_number, part_bytes)
        })?;
        self.parts.push(part);
        Ok(())
    }
}

impl Sink for S3Sink {
    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), ZarrError> {
        if offset != self.offset {
            return Err(ZarrError::InvalidArgument(format!(
                "non-contiguous write at offset {offset}, expected {}",
                self.offset
            )));
        }
        self.buffer.extend_from_slice(bytes);
        self.offset += bytes.len() as u64;

        while self.buffer.len() >= self.part_size {
            self.upload_buffered_part(false)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ZarrError> {
        // Full parts are uploaded as they accumulate; a partial part cannot
        // be closed early under the 5 MiB rule.
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<(), ZarrError> {
        if self.upload_id.is_none() {
            // The whole object fits in one part.
            let buffer = std::mem::take(&mut self.buffer);
            return self.with_connection(|connection| connection.put_object(&self.key, &buffer));
        }

        let result = (|| {
            if !self.buffer.is_empty() {
                self.upload_buffered_part(true)?;
            }
            let upload_id = self.upload_id.clone().unwrap_or_default();
            let parts = std::mem::take(&mut self.parts);
            self.with_connection(|connection| {
                connection.complete_multipart_upload(&self.key, &upload_id, parts)
            })
        })();

        if result.is_err() {
            if let Some(upload_id) = &self.upload_id {
                let abort = self.with_connection(|connection| {
                    connection.abort_multipart_upload(&self.key, upload_id)
                });
                if let Err(err) = abort {
                    log::warn!("failed to abort multipart upload for {:?}: {err}", self.key);
                }
            }
        }
        result
    }
}
