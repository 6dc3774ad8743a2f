//! Fixed-capacity buffer of pages with LRU eviction and pinning,
//! per §4.B. Acquiring a [`PageRef`] pins the page (eviction-blocking)
//! and takes its per-page latch; dropping the reference unpins and
//! releases the latch. There is no reader/writer distinction: every
//! access takes the exclusive page latch for the duration of one
//! logical operation, per the data model's ownership note.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::config::PAGE_SIZE;
use crate::error::{Error, Result};
use crate::page::Page;
use crate::types::{Lsn, PageId};
use crate::wal::LogWriter;

struct Frame {
    page: Arc<Mutex<Page>>,
    pins: Arc<std::sync::atomic::AtomicU64>,
}

/// Protects the LRU order and the `page_id -> frame` map. Per-page
/// content is protected separately by each frame's own mutex, always
/// acquired *inside* this latch, per the locking hierarchy in §5.
struct Inner {
    frames: HashMap<PageId, Frame>,
    /// Most-recently-used at the back.
    lru: Vec<PageId>,
}

pub struct PagePool {
    capacity: usize,
    inner: Mutex<Inner>,
    file: Mutex<File>,
    /// Used to enforce the WAL rule at write-back time: a dirty page
    /// may not be flushed until its `page_lsn` is durable.
    log: Arc<LogWriter>,
}

impl PagePool {
    pub fn open(path: impl AsRef<Path>, capacity: usize, log: Arc<LogWriter>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Self {
            capacity,
            inner: Mutex::new(Inner {
                frames: HashMap::new(),
                lru: Vec::new(),
            }),
            file: Mutex::new(file),
            log,
        })
    }

    fn read_page_from_disk(&self, page_id: PageId) -> Result<Page> {
        let mut buf = [0u8; PAGE_SIZE];
        let mut file = self.file.lock();
        let offset = page_id * PAGE_SIZE as u64;
        let len = file.seek(SeekFrom::End(0))?;
        if offset + PAGE_SIZE as u64 > len {
            return Err(Error::Corrupt(format!("page {page_id} does not exist on disk")));
        }
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Page::decode(&buf)
    }

    /// Write a page's image back to disk, enforcing the WAL rule:
    /// `log.committed_lsn() >= page.page_lsn` before the write. This
    /// is the one place the rule is checked, matching §5's "Enforced
    /// at the page pool's write-back path."
    fn write_back(&self, page: &Page) -> Result<()> {
        while self.log.committed_lsn() < page.header.page_lsn {
            std::thread::sleep(std::time::Duration::from_micros(200));
        }
        let bytes = page.encode();
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page.header.page_id * PAGE_SIZE as u64))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Evicts one unpinned page via a linear scan from the LRU head,
    /// writing it back first if dirty. Returns an error only if every
    /// page is pinned (caller should retry after releasing something).
    fn evict_one(&self, inner: &mut Inner) -> Result<()> {
        let victim_pos = inner
            .lru
            .iter()
            .position(|pid| {
                inner.frames[pid]
                    .pins
                    .load(std::sync::atomic::Ordering::Acquire)
                    == 0
            })
            .ok_or_else(|| Error::Corrupt("page pool exhausted: all pages pinned".into()))?;
        let victim_id = inner.lru.remove(victim_pos);
        let frame = inner.frames.remove(&victim_id).unwrap();
        let page = frame.page.lock();
        if page.header.is_dirty() {
            self.write_back(&page)?;
            debug!("evicted dirty page {victim_id}, wrote back");
        } else {
            trace!("evicted clean page {victim_id}");
        }
        Ok(())
    }

    /// Returns a pinned reference to `page_id`, faulting it in from
    /// disk on a miss and evicting an unpinned victim if the pool is
    /// full.
    pub fn get_page(&self, page_id: PageId) -> Result<PageRef> {
        loop {
            let mut inner = self.inner.lock();
            if let Some(frame) = inner.frames.get(&page_id) {
                frame.pins.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
                if let Some(pos) = inner.lru.iter().position(|p| *p == page_id) {
                    inner.lru.remove(pos);
                }
                inner.lru.push(page_id);
                let page = Arc::clone(&frame.page);
                let pins = Arc::clone(&frame.pins);
                drop(inner);
                let guard = page.lock_arc();
                return Ok(PageRef { guard, pins });
            }

            if inner.frames.len() >= self.capacity {
                if let Err(e) = self.evict_one(&mut inner) {
                    warn!("page pool eviction failed: {e}");
                    return Err(e);
                }
                continue;
            }

            let page = self.read_page_from_disk(page_id)?;
            let pins = Arc::new(std::sync::atomic::AtomicU64::new(1));
            let page = Arc::new(Mutex::new(page));
            inner.frames.insert(
                page_id,
                Frame {
                    page: Arc::clone(&page),
                    pins: Arc::clone(&pins),
                },
            );
            inner.lru.push(page_id);
            drop(inner);
            let guard = page.lock_arc();
            return Ok(PageRef { guard, pins });
        }
    }

    /// Reads just the page header from disk, without validating the
    /// body checksum. Used by single-page recovery to learn a
    /// corrupt page's `page_type` before rebuilding its body from
    /// scratch.
    pub fn read_raw_header(&self, page_id: PageId) -> Result<crate::page::PageHeader> {
        let mut buf = [0u8; crate::page::HEADER_SIZE];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id * PAGE_SIZE as u64))?;
        file.read_exact(&mut buf)?;
        crate::page::PageHeader::decode(&buf).map_err(Error::from)
    }

    /// Install a freshly created page directly into the pool, e.g.
    /// right after allocation, without a disk round-trip.
    pub fn install_new_page(&self, page: Page) -> Result<PageRef> {
        let page_id = page.header.page_id;
        let mut inner = self.inner.lock();
        if inner.frames.len() >= self.capacity && !inner.frames.contains_key(&page_id) {
            self.evict_one(&mut inner)?;
        }
        let pins = Arc::new(std::sync::atomic::AtomicU64::new(1));
        let page = Arc::new(Mutex::new(page));
        inner.frames.insert(
            page_id,
            Frame {
                page: Arc::clone(&page),
                pins: Arc::clone(&pins),
            },
        );
        inner.lru.push(page_id);
        drop(inner);
        let guard = page.lock_arc();
        Ok(PageRef { guard, pins })
    }

    /// Discards every cached page without writing back -- used by
    /// crash simulation in tests and by recovery's fresh restart.
    pub fn drop_all_pages(&self) {
        let mut inner = self.inner.lock();
        inner.frames.clear();
        inner.lru.clear();
    }

    /// Forces a page's write-back regardless of pin/dirty state.
    /// Testing/admin hook, per §4.B.
    pub fn flush_for_test(&self, page_id: PageId) -> Result<()> {
        let inner = self.inner.lock();
        if let Some(frame) = inner.frames.get(&page_id) {
            let page = frame.page.lock();
            self.write_back(&page)?;
        }
        Ok(())
    }

    pub fn committed_lsn(&self) -> Lsn {
        self.log.committed_lsn()
    }

    /// Snapshot of every currently-resident dirty page's recovery
    /// LSN, taken under the pool latch. Used by the checkpoint
    /// manager to build the dirty page table half of an
    /// end-checkpoint record.
    pub fn snapshot_dirty_pages(&self) -> Vec<(PageId, Lsn)> {
        let inner = self.inner.lock();
        inner
            .frames
            .iter()
            .filter_map(|(pid, frame)| {
                let page = frame.page.lock();
                page.header.is_dirty().then_some((*pid, page.header.recovery_lsn))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{FreePage, PageBody};
    use std::io::Write as _;

    fn open_pool(capacity: usize) -> (tempfile::TempDir, PagePool) {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(LogWriter::open(dir.path().join("wal.log")).unwrap());
        let pool = PagePool::open(dir.path().join("data.db"), capacity, log).unwrap();
        (dir, pool)
    }

    /// Writes a fresh, clean free page directly to the backing file so
    /// `get_page` can fault it in from disk -- unlike
    /// `install_new_page`, which only populates the in-memory frame
    /// and would leave a clean, never-evicted-with-write-back page
    /// absent from the file entirely.
    fn write_free_page_to_disk(dir: &tempfile::TempDir, id: PageId) {
        let page = Page::new(id, PageBody::Free(FreePage::new(0)));
        let bytes = page.encode();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(dir.path().join("data.db"))
            .unwrap();
        file.seek(SeekFrom::Start(id * PAGE_SIZE as u64)).unwrap();
        file.write_all(&bytes).unwrap();
    }

    #[test]
    fn get_page_caches_and_reuses_without_a_second_disk_read() {
        let (dir, pool) = open_pool(4);
        write_free_page_to_disk(&dir, 0);
        let first = pool.get_page(0).unwrap();
        drop(first);
        let second = pool.get_page(0).unwrap();
        assert_eq!(second.header.page_id, 0);
    }

    #[test]
    fn eviction_picks_the_lru_unpinned_page_when_pool_is_full() {
        // Capacity 2: populate pages 0 and 1, then fetch page 2 -- the
        // least-recently-used of {0, 1} (page 0, never re-touched)
        // must be evicted, and page 1 (re-touched) must survive.
        let (dir, pool) = open_pool(2);
        write_free_page_to_disk(&dir, 0);
        write_free_page_to_disk(&dir, 1);
        write_free_page_to_disk(&dir, 2);

        drop(pool.get_page(0).unwrap());
        drop(pool.get_page(1).unwrap());
        // Touch page 1 again so it becomes the most-recently-used.
        drop(pool.get_page(1).unwrap());

        drop(pool.get_page(2).unwrap());

        // Page 0 was evicted, but it's clean so it still reads back
        // fine from disk on the next fault.
        let reloaded = pool.get_page(0).unwrap();
        assert_eq!(reloaded.header.page_id, 0);
    }

    #[test]
    fn pinned_pages_are_never_chosen_as_eviction_victims() {
        let (dir, pool) = open_pool(1);
        write_free_page_to_disk(&dir, 0);
        write_free_page_to_disk(&dir, 1);

        let pinned = pool.get_page(0).unwrap();
        // The pool is at capacity and page 0 is pinned; fetching a
        // different page must fail rather than evict the pinned one.
        let err = pool.get_page(1).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
        drop(pinned);
    }

    #[test]
    fn flush_for_test_writes_back_only_once_its_lsn_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(LogWriter::open(dir.path().join("wal.log")).unwrap());
        let pool = PagePool::open(dir.path().join("data.db"), 4, Arc::clone(&log)).unwrap();
        fresh_free_page(&pool, 0);

        let lsn = log.append(b"a log record naming page 0's mutation");
        // Spin until the record is durable, mirroring the WAL rule's
        // own wait in `write_back` -- this just proves the rule can
        // be satisfied rather than blocking forever.
        while log.committed_lsn() < lsn {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        let mut page_ref = pool.get_page(0).unwrap();
        page_ref.header.page_lsn = lsn;
        page_ref.header.recovery_lsn = lsn;
        drop(page_ref);

        pool.flush_for_test(0).unwrap();
        pool.drop_all_pages();
        let reloaded = pool.get_page(0).unwrap();
        assert_eq!(reloaded.header.page_lsn, lsn);
    }
}

/// A pinned, exclusively-latched handle to a page. Unpins and releases
/// the latch on drop. Carries an owning `Arc` rather than borrowing
/// the pool, so it can be held across calls without threading the
/// pool's lifetime through every signature.
pub struct PageRef {
    guard: parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, Page>,
    pins: Arc<std::sync::atomic::AtomicU64>,
}

impl std::ops::Deref for PageRef {
    type Target = Page;
    fn deref(&self) -> &Page {
        &self.guard
    }
}

impl std::ops::DerefMut for PageRef {
    fn deref_mut(&mut self) -> &mut Page {
        &mut self.guard
    }
}

impl Drop for PageRef {
    fn drop(&mut self) {
        self.pins.fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
    }
}
