//! A sink writing to one file on the local filesystem.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::ZarrError;

use super::Sink;

/// A sink backed by a buffered file handle.
pub struct FileSink {
    writer: BufWriter<File>,
    offset: u64,
}

impl FileSink {
    /// Create the file at `path`, creating missing parent directories.
    ///
    /// # Errors
    /// Returns [`ZarrError::IOError`] if the directories or the file cannot
    /// be created.
    pub fn new(path: &Path) -> Result<Self, ZarrError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
            offset: 0,
        })
    }
}

impl Sink for FileSink {
    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), ZarrError> {
        if offset != self.offset {
            return Err(ZarrError::InvalidArgument(format!(
                "non-contiguous write at offset {offset}, expected {}",
                self.offset
            )));
        }
        self.writer.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ZarrError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<(), ZarrError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}
