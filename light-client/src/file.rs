use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chi_types::DISK_HEADER_SIZE;

use crate::error::{Error, Result};

/// A headers file: a flat sequence of fixed-size disk records.
///
/// Offsets are pure multiplication; an all-zero record denotes an absent
/// slot inside the sparse-preallocated checkpoint region. The struct is a
/// cheap view constructed on demand, because the path a chain writes to can
/// change when files swap identities during a reorg.
pub struct HeaderFile {
    path: PathBuf,
    headers_dir: PathBuf,
}

impl HeaderFile {
    pub fn new(path: PathBuf, headers_dir: PathBuf) -> Self {
        HeaderFile { path, headers_dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Distinguishes "file missing because the user deleted all state" from
    /// "file missing inside an existing directory": both are fatal, but mean
    /// different things.
    pub fn ensure_available(&self) -> Result<()> {
        if self.path.exists() {
            Ok(())
        } else if !self.headers_dir.exists() {
            Err(Error::HeadersDirMissing)
        } else {
            Err(Error::HeaderFileMissing(self.path.clone()))
        }
    }

    /// Number of whole records in the file; zero if the file does not exist.
    pub fn size(&self) -> Result<u64> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len() / DISK_HEADER_SIZE as u64),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates the file, truncating any previous content.
    pub fn create_empty(&self) -> Result<()> {
        File::create(&self.path)?;
        Ok(())
    }

    /// Ensures the file spans at least `length` bytes of sparse zeros, used
    /// to reserve the checkpointed prefix of the best chain. A shorter
    /// existing file is recreated; its content is covered by checkpoints and
    /// will be re-downloaded.
    pub fn preallocate(&self, length: u64) -> Result<()> {
        let current = std::fs::metadata(&self.path).map(|m| m.len()).ok();
        if current.map_or(true, |len| len < length) {
            let file = File::create(&self.path)?;
            if length > 0 {
                file.set_len(length)?;
            }
        }
        Ok(())
    }

    /// Writes `data` at `offset`. When `truncate` is set and the offset is
    /// not the current end of file, everything from `offset` on is cut first.
    /// Flushed and fsynced before returning.
    pub fn write(&self, data: &[u8], offset: u64, truncate: bool, current_len: u64) -> Result<()> {
        self.ensure_available()?;
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        if truncate && offset != current_len {
            file.set_len(offset)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads the record `delta` slots into the file. `None` means the slot
    /// holds only sparse zeros.
    pub fn read_record(&self, delta: u64) -> Result<Option<[u8; DISK_HEADER_SIZE]>> {
        self.ensure_available()?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(delta * DISK_HEADER_SIZE as u64))?;
        let mut record = [0u8; DISK_HEADER_SIZE];
        file.read_exact(&mut record)?;
        if record.iter().all(|&b| b == 0) {
            Ok(None)
        } else {
            Ok(Some(record))
        }
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        self.ensure_available()?;
        Ok(std::fs::read(&self.path)?)
    }

    /// Reads up to `len` bytes starting at `offset`.
    pub fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.ensure_available()?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut data = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut data)?;
        Ok(data)
    }
}
