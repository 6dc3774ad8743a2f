//! Auxiliary write-optimised key/value store, per §4.J: an in-memory
//! memtable backed by a chain of immutable sorted runs on disk, plus a
//! blob file for anything too large to inline. Used by components
//! that want a persistent ordered set without the B+-tree's in-place
//! update discipline.

pub mod blob_file;
pub mod sorted_run;
pub mod view;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::config::{
    DEFAULT_LSM_FLUSH_INTERVAL, DEFAULT_LSM_MERGE_INTERVAL, LSM_BLOB_MAX_FILE_SIZE, VM_CACHE_BLOCK_SIZE, VM_CACHE_MEMORY_BUDGET,
};
use crate::error::{Error, Result};
use crate::lsm::blob_file::BlobFile;
use crate::lsm::sorted_run::SortedRun;
use crate::lsm::view::LsmView;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LsmValue {
    Payload(Vec<u8>),
    Tombstone,
}

struct Shared {
    dir: PathBuf,
    mem: Mutex<BTreeMap<Vec<u8>, LsmValue>>,
    /// Non-empty only during the window between `sync`'s swap and the
    /// new run file finishing its write, per the data model's
    /// invariant; reads still consult it during that window.
    frozen: Mutex<BTreeMap<Vec<u8>, LsmValue>>,
    runs: Mutex<Vec<Arc<SortedRun>>>,
    blob: Arc<BlobFile>,
    generation: AtomicU64,
    flush_interval: Duration,
    merge_interval: Duration,
    stop: AtomicBool,
}

impl Shared {
    fn write(&self, key: &[u8], value: LsmValue, flush: bool) -> Result<()> {
        self.mem.lock().insert(key.to_vec(), value);
        if flush {
            self.sync()?;
        }
        Ok(())
    }

    fn read(&self, key: &[u8]) -> Result<Vec<u8>> {
        if let Some(v) = self.mem.lock().get(key) {
            return value_or_not_exists(v.clone());
        }
        if let Some(v) = self.frozen.lock().get(key) {
            return value_or_not_exists(v.clone());
        }
        for run in self.runs.lock().iter() {
            if let Some(v) = run.find(key, &self.blob)? {
                return value_or_not_exists(v);
            }
        }
        Err(Error::NotExists)
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.read(key).is_ok()
    }

    /// Swaps `mem` into `frozen`, serializes `frozen` as a new sorted
    /// run prepended to the run list (newest-first), then clears it.
    /// A no-op if there is nothing to flush.
    fn sync(&self) -> Result<()> {
        let taken = {
            let mut mem = self.mem.lock();
            std::mem::take(&mut *mem)
        };
        if taken.is_empty() {
            return Ok(());
        }
        *self.frozen.lock() = taken;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel);
        let path = run_path(&self.dir, generation);
        let entries: Vec<_> = self.frozen.lock().clone().into_iter().collect();
        let run = SortedRun::construct(&path, entries.into_iter(), &self.blob, generation)?;
        debug!("lsm: flushed generation {generation} ({} entries)", run.len());

        self.runs.lock().insert(0, Arc::new(run));
        self.frozen.lock().clear();
        Ok(())
    }

    /// k-way merges every current run (tombstones and shadowed keys
    /// drop out, since nothing remains below the merged run to shadow)
    /// into one new run, then deletes the old run files.
    fn merge_all(&self) -> Result<()> {
        let old_runs = self.runs.lock().clone();
        if old_runs.len() <= 1 {
            return Ok(());
        }
        let view = LsmView {
            blob: Arc::clone(&self.blob),
            runs: old_runs.clone(),
        };
        let generation = self.generation.fetch_add(1, Ordering::AcqRel);
        let path = run_path(&self.dir, generation);
        let merged = SortedRun::construct(&path, view.iter(), &self.blob, generation)?;
        debug!("lsm: merged {} runs into generation {generation} ({} entries)", old_runs.len(), merged.len());

        *self.runs.lock() = vec![Arc::new(merged)];
        for run in &old_runs {
            if let Err(e) = run.delete_file() {
                warn!("lsm: failed to remove superseded run {:?}: {e}", run.path);
            }
        }
        Ok(())
    }

    fn get_view(&self) -> LsmView {
        LsmView {
            blob: Arc::clone(&self.blob),
            runs: self.runs.lock().clone(),
        }
    }
}

fn value_or_not_exists(v: LsmValue) -> Result<Vec<u8>> {
    match v {
        LsmValue::Payload(bytes) => Ok(bytes),
        LsmValue::Tombstone => Err(Error::NotExists),
    }
}

fn run_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("run-{generation:020}.sortedrun"))
}

/// Owns the LSM tree's background flusher and merger threads;
/// dropping it stops and joins both, per the design notes' RAII-handle
/// pattern.
pub struct LsmTree {
    shared: Arc<Shared>,
    flusher: Option<JoinHandle<()>>,
    merger: Option<JoinHandle<()>>,
}

impl LsmTree {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_intervals(dir, DEFAULT_LSM_FLUSH_INTERVAL, DEFAULT_LSM_MERGE_INTERVAL)
    }

    pub fn open_with_intervals(dir: impl AsRef<Path>, flush_interval: Duration, merge_interval: Duration) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let blob = Arc::new(BlobFile::open(
            dir.join("blob.dat"),
            LSM_BLOB_MAX_FILE_SIZE,
            VM_CACHE_MEMORY_BUDGET,
            VM_CACHE_BLOCK_SIZE,
        )?);

        let mut runs = Vec::new();
        let mut max_generation = 0u64;
        if dir.is_dir() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with("run-") && name.ends_with(".sortedrun") {
                    let run = SortedRun::open(entry.path())?;
                    max_generation = max_generation.max(run.generation);
                    runs.push(Arc::new(run));
                }
            }
        }
        runs.sort_by(|a, b| b.generation.cmp(&a.generation));

        let shared = Arc::new(Shared {
            dir,
            mem: Mutex::new(BTreeMap::new()),
            frozen: Mutex::new(BTreeMap::new()),
            runs: Mutex::new(runs),
            blob,
            generation: AtomicU64::new(max_generation + 1),
            flush_interval,
            merge_interval,
            stop: AtomicBool::new(false),
        });

        let flusher = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("lsm-flusher".into())
                .spawn(move || flusher_loop(shared))
                .expect("failed to spawn lsm flusher thread")
        };
        let merger = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("lsm-merger".into())
                .spawn(move || merger_loop(shared))
                .expect("failed to spawn lsm merger thread")
        };

        Ok(Self {
            shared,
            flusher: Some(flusher),
            merger: Some(merger),
        })
    }

    pub fn write(&self, key: &[u8], value: &[u8], flush: bool) -> Result<()> {
        self.shared.write(key, LsmValue::Payload(value.to_vec()), flush)
    }

    pub fn delete(&self, key: &[u8], flush: bool) -> Result<()> {
        self.shared.write(key, LsmValue::Tombstone, flush)
    }

    pub fn read(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.shared.read(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.shared.contains(key)
    }

    pub fn sync(&self) -> Result<()> {
        self.shared.sync()
    }

    pub fn merge_all(&self) -> Result<()> {
        self.shared.merge_all()
    }

    pub fn get_view(&self) -> LsmView {
        self.shared.get_view()
    }

    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(h) = self.flusher.take() {
            let _ = h.join();
        }
        if let Some(h) = self.merger.take() {
            let _ = h.join();
        }
    }
}

impl Drop for LsmTree {
    fn drop(&mut self) {
        self.stop();
    }
}

fn flusher_loop(shared: Arc<Shared>) {
    let tick = Duration::from_millis(20);
    let mut waited = Duration::ZERO;
    loop {
        if shared.stop.load(Ordering::Acquire) {
            return;
        }
        if waited >= shared.flush_interval {
            if let Err(e) = shared.sync() {
                error!("lsm flusher: sync failed: {e}");
            }
            waited = Duration::ZERO;
        }
        std::thread::sleep(tick);
        waited += tick;
    }
}

fn merger_loop(shared: Arc<Shared>) {
    let tick = Duration::from_millis(50);
    let mut waited = Duration::ZERO;
    loop {
        if shared.stop.load(Ordering::Acquire) {
            return;
        }
        if waited >= shared.merge_interval {
            if let Err(e) = shared.merge_all() {
                error!("lsm merger: merge_all failed: {e}");
            }
            waited = Duration::ZERO;
        }
        std::thread::sleep(tick);
        waited += tick;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_delete_round_trip_before_any_flush() {
        let dir = tempfile::tempdir().unwrap();
        let tree = LsmTree::open_with_intervals(dir.path(), Duration::from_secs(3600), Duration::from_secs(3600)).unwrap();
        tree.write(b"x", b"1", false).unwrap();
        assert_eq!(tree.read(b"x").unwrap(), b"1");
        tree.delete(b"x", false).unwrap();
        assert!(tree.read(b"x").is_err());
    }

    #[test]
    fn sync_persists_entries_into_a_sorted_run_and_clears_memtable() {
        let dir = tempfile::tempdir().unwrap();
        let tree = LsmTree::open_with_intervals(dir.path(), Duration::from_secs(3600), Duration::from_secs(3600)).unwrap();
        for i in 0..200 {
            tree.write(i.to_string().as_bytes(), i.to_string().as_bytes(), false).unwrap();
        }
        tree.sync().unwrap();
        assert_eq!(tree.shared.runs.lock().len(), 1);
        for i in 0..200 {
            assert_eq!(tree.read(i.to_string().as_bytes()).unwrap(), i.to_string().as_bytes());
        }
    }

    #[test]
    fn overwrite_and_delete_scenario_matches_expected_view() {
        let dir = tempfile::tempdir().unwrap();
        let tree = LsmTree::open_with_intervals(dir.path(), Duration::from_secs(3600), Duration::from_secs(3600)).unwrap();

        for i in 0..1000 {
            tree.write(i.to_string().as_bytes(), i.to_string().as_bytes(), false).unwrap();
        }
        tree.sync().unwrap();

        for i in (0..1000).step_by(2) {
            let squared = (i * i).to_string();
            tree.write(i.to_string().as_bytes(), squared.as_bytes(), false).unwrap();
        }
        for i in (1..1000).step_by(2) {
            tree.delete(i.to_string().as_bytes(), false).unwrap();
        }
        tree.sync().unwrap();

        let view = tree.get_view();
        let entries: Vec<_> = view.iter().collect();
        assert_eq!(entries.len(), 500);
        assert_eq!(tree.read(b"42").unwrap(), b"1764");
        assert!(tree.read(b"43").is_err());
    }

    #[test]
    fn merge_all_collapses_runs_and_preserves_latest_values() {
        let dir = tempfile::tempdir().unwrap();
        let tree = LsmTree::open_with_intervals(dir.path(), Duration::from_secs(3600), Duration::from_secs(3600)).unwrap();

        tree.write(b"a", b"1", true).unwrap();
        tree.write(b"a", b"2", true).unwrap();
        tree.write(b"b", b"3", true).unwrap();
        assert!(tree.shared.runs.lock().len() >= 2);

        tree.merge_all().unwrap();
        assert_eq!(tree.shared.runs.lock().len(), 1);
        assert_eq!(tree.read(b"a").unwrap(), b"2");
        assert_eq!(tree.read(b"b").unwrap(), b"3");
    }
}
