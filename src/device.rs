//! Block source abstraction.
//!
//! The unlock pipeline issues reads at absolute byte offsets and never
//! caches; a [`BlockSource`] is anything that can satisfy such reads and
//! report its total size. Regular files and raw block devices are covered
//! by [`FileSource`]; in-memory images (tests, embedded use) go through
//! the [`std::io::Cursor`] impl.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::Result;

/// Log2 of the sector size most sources present (512-byte sectors).
pub const DEFAULT_LOG_SECTOR_SIZE: u8 = 9;

/// A readable device or image addressed by absolute byte offset.
pub trait BlockSource {
    /// Fills `buf` from `offset` bytes into the source.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Total size of the source in bytes.
    fn size(&mut self) -> Result<u64>;

    /// Log2 of the source's native sector size.
    fn log_sector_size(&self) -> u8 {
        DEFAULT_LOG_SECTOR_SIZE
    }

    /// Display name used in the passphrase prompt.
    fn name(&self) -> &str {
        "device"
    }

    /// Partition name, if the source is a partition of a larger device.
    fn partition(&self) -> Option<&str> {
        None
    }
}

/// Reborrows an `Option<&mut dyn BlockSource>` for a single call without
/// consuming the original binding, so it can be passed to several calls
/// in sequence. `Option::as_deref_mut` can't be used here: the borrow
/// checker ties its returned reference's lifetime to the outer binding's
/// lifetime for trait objects, making a second call a borrow conflict.
pub(crate) fn reborrow_detached<'a>(
    detached: &'a mut Option<&mut dyn BlockSource>,
) -> Option<&'a mut dyn BlockSource> {
    match detached {
        Some(source) => Some(&mut **source),
        None => None,
    }
}

/// A [`BlockSource`] backed by a regular file or a raw block device node.
pub struct FileSource {
    file: File,
    name: String,
    partition: Option<String>,
}

impl FileSource {
    /// Opens `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let name = path.display().to_string();
        Ok(Self {
            file,
            name,
            partition: None,
        })
    }

    /// Sets the partition name reported to the passphrase prompt.
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }
}

impl BlockSource for FileSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        // seek(End) also works for block device nodes, where metadata
        // reports a zero length.
        Ok(self.file.seek(SeekFrom::End(0))?)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn partition(&self) -> Option<&str> {
        self.partition.as_deref()
    }
}

impl<T: AsRef<[u8]>> BlockSource for Cursor<T> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)?;
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.get_ref().as_ref().len() as u64)
    }
}
