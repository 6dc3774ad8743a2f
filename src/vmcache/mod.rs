//! A read-only mmap-backed cache for immutable blob files, per §4.I.
//! The whole file's address range is reserved up front as an
//! anonymous mapping; physical pages are faulted in on demand by
//! `pread`-ing from the backing file, and evicted by `madvise`-ing
//! them away again. Admission/eviction follows S3-FIFO: a small queue
//! for one-hit-wonders, a main queue for anything touched twice, and a
//! ghost queue that remembers recently evicted blocks so a second
//! fault on one promotes straight back into main.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use memmap2::{Advice, MmapMut};
use parking_lot::Mutex;

use crate::error::Result;

const EVICTED: u8 = 0;
const LOCKED: u8 = 1;
const UNLOCKED: u8 = 2;
const MARKED: u8 = 3;
const LOCKED_ACCESSED: u8 = 4;
const UNLOCKED_ACCESSED: u8 = 5;

struct Queues {
    small: Vec<usize>,
    main: Vec<usize>,
    ghost: Vec<usize>,
    small_cap: usize,
    main_cap: usize,
    ghost_cap: usize,
}

/// mmap-backed cache over one file's byte range, divided into fixed
/// blocks. Per-block state lives in `states`; queue membership is
/// serialized by the single `queues` mutex, per §5's "one queue_lock
/// guards all three [FIFOs]".
pub struct VmCache {
    file: File,
    mmap: MmapMut,
    block_size: usize,
    file_len: u64,
    states: Vec<AtomicU8>,
    queues: Mutex<Queues>,
}

impl VmCache {
    /// `max_mapped_size` reserves address space for the largest this
    /// file will ever grow to (the file itself may currently be
    /// shorter); `memory_budget` bounds how many blocks are ever
    /// resident at once.
    pub fn new(file: File, max_mapped_size: usize, memory_budget: usize, block_size: usize) -> Result<Self> {
        let file_len = file.metadata()?.len();
        let n_blocks = max_mapped_size.div_ceil(block_size).max(1);
        let mmap = MmapMut::map_anon(n_blocks * block_size)?;

        let max_resident = (memory_budget / block_size).max(1);
        let small_cap = ((max_resident + 9) / 10).max(1);
        let main_cap = max_resident.saturating_sub(small_cap).max(1);
        let ghost_cap = main_cap;

        Ok(Self {
            file,
            mmap,
            block_size,
            file_len,
            states: (0..n_blocks).map(|_| AtomicU8::new(EVICTED)).collect(),
            queues: Mutex::new(Queues {
                small: Vec::new(),
                main: Vec::new(),
                ghost: Vec::new(),
                small_cap,
                main_cap,
                ghost_cap,
            }),
        })
    }

    /// Tracks a file grown by append; blocks beyond the old length may
    /// now be faulted in.
    pub fn note_grown(&mut self, new_len: u64) {
        self.file_len = new_len;
    }

    fn block_of(&self, offset: u64) -> usize {
        (offset / self.block_size as u64) as usize
    }

    /// Reads `[offset, offset+len)`, faulting in and releasing each
    /// covered block in turn.
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        let mut pos = offset;
        let mut written = 0usize;
        while written < len {
            let block = self.block_of(pos);
            let in_block = (pos % self.block_size as u64) as usize;
            let chunk = (self.block_size - in_block).min(len - written);
            self.fix_page(block)?;
            let base = block * self.block_size + in_block;
            out[written..written + chunk].copy_from_slice(&self.mmap[base..base + chunk]);
            self.unfix_page(block);
            pos += chunk as u64;
            written += chunk;
        }
        Ok(out)
    }

    /// Invalidates every block covering `[offset, offset+len)`. Used
    /// after appends so a previously cached "beyond EOF" zero block
    /// cannot shadow the real bytes just written there.
    pub fn invalidate(&self, offset: u64, len: usize) {
        if len == 0 {
            return;
        }
        let first = self.block_of(offset);
        let last = self.block_of(offset + len as u64 - 1);
        for block in first..=last {
            self.invalidate_page(block);
        }
    }

    /// Faults `block` in if necessary and marks it locked, matching
    /// the source's `FixPage` CAS loop.
    fn fix_page(&self, block: usize) -> Result<()> {
        loop {
            let state = self.states[block].load(Ordering::Acquire);
            match state {
                EVICTED | MARKED => {
                    if self.states[block]
                        .compare_exchange(state, LOCKED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        if state == EVICTED {
                            self.enqueue_to_small(block);
                        } else {
                            // A fault on a ghost entry promotes straight to
                            // `main`, per §4.I -- it already has admission
                            // history, so it skips `small` entirely.
                            self.promote_from_ghost(block);
                        }
                        self.activate(block)?;
                        return Ok(());
                    }
                }
                UNLOCKED => {
                    if self.states[block]
                        .compare_exchange(state, LOCKED_ACCESSED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return Ok(());
                    }
                }
                UNLOCKED_ACCESSED => {
                    if self.states[block]
                        .compare_exchange(state, LOCKED_ACCESSED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return Ok(());
                    }
                }
                _ => std::thread::sleep(Duration::from_micros(100)),
            }
        }
    }

    fn unfix_page(&self, block: usize) {
        loop {
            let state = self.states[block].load(Ordering::Acquire);
            let next = match state {
                LOCKED => UNLOCKED,
                LOCKED_ACCESSED => UNLOCKED_ACCESSED,
                other => {
                    debug_assert!(false, "unfix on block not locked (state {other})");
                    return;
                }
            };
            if self.states[block]
                .compare_exchange(state, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    fn invalidate_page(&self, block: usize) {
        loop {
            let state = self.states[block].load(Ordering::Acquire);
            match state {
                EVICTED => return,
                LOCKED | LOCKED_ACCESSED => std::thread::sleep(Duration::from_micros(100)),
                _ => {
                    if self.states[block]
                        .compare_exchange(state, EVICTED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        let _ = self.mmap.advise_range(Advice::DontNeed, block * self.block_size, self.block_size);
                        return;
                    }
                }
            }
        }
    }

    /// Re-reads a block's bytes from the backing file, zero-filling
    /// any tail past current EOF.
    fn activate(&self, block: usize) -> Result<()> {
        let start = (block * self.block_size) as u64;
        let base = block * self.block_size;
        let ptr = self.mmap.as_ptr().wrapping_add(base) as *mut u8;
        let region = unsafe { std::slice::from_raw_parts_mut(ptr, self.block_size) };
        region.fill(0);
        if start < self.file_len {
            let readable = ((self.file_len - start) as usize).min(self.block_size);
            self.file.read_exact_at(&mut region[..readable], start)?;
        }
        Ok(())
    }

    fn enqueue_to_small(&self, block: usize) {
        let mut q = self.queues.lock();
        q.small.push(block);
        while q.small.len() > q.small_cap {
            let head = q.small.remove(0);
            let state = self.states[head].load(Ordering::Acquire);
            if state == UNLOCKED_ACCESSED {
                if self.states[head]
                    .compare_exchange(state, UNLOCKED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    enqueue_to_main(self, &mut q, head);
                }
            } else if state == UNLOCKED
                && self.states[head]
                    .compare_exchange(UNLOCKED, MARKED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                let _ = self.mmap.advise_range(Advice::DontNeed, head * self.block_size, self.block_size);
                enqueue_to_ghost(&mut q, head);
            }
        }
    }

    /// A ghost-queue hit: the block was evicted but is still within
    /// its admission-history window, so it is re-admitted directly
    /// into `main` rather than `small`.
    fn promote_from_ghost(&self, block: usize) {
        let mut q = self.queues.lock();
        q.ghost.retain(|&b| b != block);
        enqueue_to_main(self, &mut q, block);
    }
}

/// Free function (not a method) so `enqueue_to_small`'s overflow
/// handling can call it while already holding `&mut Queues`.
fn enqueue_to_main(cache: &VmCache, q: &mut Queues, block: usize) {
    q.main.push(block);
    while q.main.len() > q.main_cap {
        let head = q.main.remove(0);
        let state = cache.states[head].load(Ordering::Acquire);
        if state == UNLOCKED_ACCESSED {
            if cache.states[head]
                .compare_exchange(state, UNLOCKED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                q.main.push(head);
            }
        } else if state == UNLOCKED
            && cache.states[head]
                .compare_exchange(UNLOCKED, EVICTED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            let _ = cache.mmap.advise_range(Advice::DontNeed, head * cache.block_size, cache.block_size);
        }
    }
}

fn enqueue_to_ghost(q: &mut Queues, block: usize) {
    q.ghost.push(block);
    while q.ghost.len() > q.ghost_cap {
        q.ghost.remove(0);
    }
}

// SAFETY: all mutable access to `mmap`'s bytes is mediated by the
// per-block atomic state machine above: a block is only written
// (`activate`) or read (`read`) while held in a `*Locked*` state, and
// two threads can only observe the same block simultaneously while
// both hold it read-locked, which is safe for shared reads of the
// same bytes.
unsafe impl Sync for VmCache {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file_with(bytes: &[u8]) -> (tempfile::TempDir, File) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(bytes).unwrap();
        }
        let f = std::fs::OpenOptions::new().read(true).open(&path).unwrap();
        (dir, f)
    }

    #[test]
    fn reads_bytes_spanning_multiple_blocks() {
        let data: Vec<u8> = (0..20000u32).map(|i| (i % 251) as u8).collect();
        let (_dir, f) = temp_file_with(&data);
        let cache = VmCache::new(f, 1 << 20, 1 << 16, 4096).unwrap();
        let got = cache.read(4090, 100).unwrap();
        assert_eq!(got, data[4090..4190]);
    }

    #[test]
    fn repeated_reads_return_same_bytes() {
        let data = vec![7u8; 8192];
        let (_dir, f) = temp_file_with(&data);
        let cache = VmCache::new(f, 1 << 20, 1 << 16, 4096).unwrap();
        for _ in 0..5 {
            assert_eq!(cache.read(0, 8192).unwrap(), data);
        }
    }

    #[test]
    fn invalidate_does_not_panic_on_evicted_block() {
        let (_dir, f) = temp_file_with(&[0u8; 4096]);
        let cache = VmCache::new(f, 1 << 20, 1 << 16, 4096).unwrap();
        cache.invalidate(0, 4096);
    }

    #[test]
    fn small_queue_eviction_does_not_corrupt_state() {
        let data = vec![1u8; 64 * 4096];
        let (_dir, f) = temp_file_with(&data);
        // Tiny budget forces small-queue overflow on nearly every read.
        let cache = VmCache::new(f, 1 << 24, 3 * 4096, 4096).unwrap();
        for i in 0..64 {
            let got = cache.read(i * 4096, 4096).unwrap();
            assert_eq!(got, vec![1u8; 4096]);
        }
    }
}
