//! A point-in-time snapshot of the run list plus the blob file handle,
//! per §4.J: readers scan through a `LsmView` independently of further
//! mutations to the tree. Iteration is a min-heap of per-run cursors
//! keyed by `(key, -generation)`, so the newest generation of a key is
//! always seen first and older duplicates are dropped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::lsm::blob_file::BlobFile;
use crate::lsm::sorted_run::SortedRun;
use crate::lsm::LsmValue;

#[derive(Clone)]
pub struct LsmView {
    pub(crate) blob: Arc<BlobFile>,
    /// Ordered by descending generation: index 0 is newest.
    pub(crate) runs: Vec<Arc<SortedRun>>,
}

impl LsmView {
    /// Consults runs newest-first; the first hit (payload or
    /// tombstone) wins.
    pub fn find(&self, key: &[u8]) -> crate::error::Result<Option<LsmValue>> {
        for run in &self.runs {
            if let Some(v) = run.find(key, &self.blob)? {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    pub fn iter(&self) -> LsmViewIter {
        let mut heap = BinaryHeap::new();
        for (run_idx, run) in self.runs.iter().enumerate() {
            if !run.is_empty() {
                if let Ok(key) = run.key_at(0, &self.blob) {
                    heap.push(std::cmp::Reverse(HeapItem {
                        key,
                        generation: run.generation,
                        run_idx,
                        entry_idx: 0,
                    }));
                }
            }
        }
        LsmViewIter {
            view: self.clone(),
            heap,
            last_yielded: None,
        }
    }
}

#[derive(PartialEq, Eq)]
struct HeapItem {
    key: Vec<u8>,
    generation: u64,
    run_idx: usize,
    entry_idx: usize,
}

/// Ordered by key ascending, then by generation descending so that,
/// for equal keys, the newest run's entry is the minimum (and so pops
/// first out of the `Reverse`-wrapped min-heap).
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct LsmViewIter {
    view: LsmView,
    heap: BinaryHeap<std::cmp::Reverse<HeapItem>>,
    last_yielded: Option<Vec<u8>>,
}

impl Iterator for LsmViewIter {
    type Item = (Vec<u8>, LsmValue);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let std::cmp::Reverse(item) = self.heap.pop()?;
            let run = &self.view.runs[item.run_idx];

            if item.entry_idx + 1 < run.len() {
                if let Ok(next_key) = run.key_at(item.entry_idx + 1, &self.view.blob) {
                    self.heap.push(std::cmp::Reverse(HeapItem {
                        key: next_key,
                        generation: item.generation,
                        run_idx: item.run_idx,
                        entry_idx: item.entry_idx + 1,
                    }));
                }
            }

            if self.last_yielded.as_ref() == Some(&item.key) {
                continue;
            }
            self.last_yielded = Some(item.key.clone());

            match run.value_at(item.entry_idx, &self.view.blob) {
                Ok(LsmValue::Tombstone) => continue,
                Ok(LsmValue::Payload(v)) => return Some((item.key, v)),
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn make_run(dir: &std::path::Path, name: &str, gen: u64, blob: &BlobFile, pairs: &[(&str, LsmValue)]) -> Arc<SortedRun> {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            map.insert(k.as_bytes().to_vec(), v.clone());
        }
        Arc::new(SortedRun::construct(dir.join(name), map.into_iter(), blob, gen).unwrap())
    }

    #[test]
    fn newest_generation_shadows_older_and_tombstones_drop() {
        let dir = tempfile::tempdir().unwrap();
        let blob = Arc::new(BlobFile::open(dir.path().join("blob.dat"), 1 << 20, 1 << 16, 4096).unwrap());

        let old = make_run(
            dir.path(),
            "run-0.sr",
            0,
            &blob,
            &[("a", LsmValue::Payload(b"old-a".to_vec())), ("b", LsmValue::Payload(b"old-b".to_vec()))],
        );
        let new = make_run(
            dir.path(),
            "run-1.sr",
            1,
            &blob,
            &[("a", LsmValue::Payload(b"new-a".to_vec())), ("c", LsmValue::Tombstone)],
        );

        let view = LsmView {
            blob: Arc::clone(&blob),
            runs: vec![new, old],
        };

        let collected: Vec<_> = view.iter().collect();
        assert_eq!(
            collected,
            vec![
                (b"a".to_vec(), b"new-a".to_vec()),
                (b"b".to_vec(), b"old-b".to_vec()),
            ]
        );
        assert_eq!(view.find(b"c").unwrap(), Some(LsmValue::Tombstone));
    }
}
