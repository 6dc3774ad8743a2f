//! Storage and recovery core for a single-node relational database
//! engine: paged buffer cache, ARIES write-ahead log and recovery,
//! fuzzy checkpoints, a foster-parent B+-tree, and an auxiliary LSM
//! index. SQL parsing, query planning, and the catalog are external
//! collaborators this crate does not implement; see [`Database`] for
//! the handles it exposes to them.

pub mod btree;
pub mod checkpoint;
pub mod config;
pub mod encoding;
pub mod error;
pub mod io;
pub mod lsm;
pub mod page;
pub mod pool;
pub mod recovery;
pub mod txn;
pub mod types;
pub mod vmcache;
pub mod wal;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use crate::btree::BTree;
use crate::checkpoint::CheckpointManager;
use crate::config::DEFAULT_PAGE_POOL_CAPACITY;
use crate::error::Result;
use crate::lsm::LsmTree;
use crate::pool::{PageManager, PagePool};
use crate::recovery::RecoveryManager;
use crate::txn::{LockManager, Transaction, TransactionManager};
use crate::types::{Lsn, PageId};
use crate::wal::LogWriter;

/// Owns one of each manager described in §9's construction order:
/// log writer, page pool, page manager, lock manager, transaction
/// manager, recovery manager, checkpoint manager. There is no
/// process-wide singleton -- every caller holds its own `Database`
/// (or an `Arc` around one), unlike the teacher's `Database::global()`
/// `OnceCell`, per the design notes' "no global mutable state" note.
pub struct Database {
    dir: PathBuf,
    log: Arc<LogWriter>,
    pool: Arc<PagePool>,
    page_manager: Arc<PageManager>,
    lock_manager: Arc<LockManager>,
    txn_manager: Arc<TransactionManager>,
    recovery_manager: Arc<RecoveryManager>,
    checkpoint_manager: Mutex<Option<CheckpointManager>>,
}

impl Database {
    /// Opens (creating if absent) a database rooted at `dir`: `data.db`
    /// (the page file), `wal.log` (the log file), and `master.rec`
    /// (the checkpoint master record) all live under it. Runs
    /// analysis/redo/undo recovery from the last checkpoint before
    /// returning, per §4.F and scenario S3/S6.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_capacity(dir, DEFAULT_PAGE_POOL_CAPACITY)
    }

    pub fn open_with_capacity(dir: impl AsRef<Path>, pool_capacity: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let log = Arc::new(LogWriter::open(dir.join("wal.log"))?);
        let pool = Arc::new(PagePool::open(dir.join("data.db"), pool_capacity, Arc::clone(&log))?);
        let page_manager = Arc::new(PageManager::new(Arc::clone(&pool)));
        let lock_manager = Arc::new(LockManager::new());
        let txn_manager = Arc::new(TransactionManager::new(
            Arc::clone(&log),
            Arc::clone(&lock_manager),
            Arc::clone(&pool),
        ));
        let recovery_manager = Arc::new(RecoveryManager::new(
            Arc::clone(&log),
            Arc::clone(&pool),
            dir.join("master.rec"),
        ));

        info!("database: recovering {:?}", dir);
        recovery_manager.recover()?;
        page_manager.init_meta_page()?;

        Ok(Self {
            dir,
            log,
            pool,
            page_manager,
            lock_manager,
            txn_manager,
            recovery_manager,
            checkpoint_manager: Mutex::new(None),
        })
    }

    /// Starts the fuzzy checkpoint background worker (§4.G), if not
    /// already running. A `Database` does not checkpoint on its own
    /// until this is called, so short-lived tests that only exercise
    /// recovery via the master record don't pay for the thread.
    pub fn start_checkpointer(&self, interval: std::time::Duration) {
        let mut guard = self.checkpoint_manager.lock();
        if guard.is_none() {
            *guard = Some(CheckpointManager::start_with_interval(
                Arc::clone(&self.log),
                Arc::clone(&self.pool),
                Arc::clone(&self.txn_manager),
                self.dir.join("master.rec"),
                interval,
            ));
        }
    }

    /// Runs one fuzzy checkpoint synchronously, independent of
    /// whether the background worker is running. Used by callers
    /// (and scenario S6) that need a checkpoint at a specific point
    /// in a workload rather than waiting on the timer.
    pub fn checkpoint_now(&self) -> Result<()> {
        let guard = self.checkpoint_manager.lock();
        match guard.as_ref() {
            Some(mgr) => mgr.checkpoint_now(),
            None => {
                drop(guard);
                let mgr = CheckpointManager::start_with_interval(
                    Arc::clone(&self.log),
                    Arc::clone(&self.pool),
                    Arc::clone(&self.txn_manager),
                    self.dir.join("master.rec"),
                    std::time::Duration::from_secs(3600),
                );
                let result = mgr.checkpoint_now();
                *self.checkpoint_manager.lock() = Some(mgr);
                result
            }
        }
    }

    pub fn begin(&self) -> Transaction {
        self.txn_manager.begin()
    }

    pub fn precommit(&self, txn: &mut Transaction) -> Lsn {
        self.txn_manager.precommit(txn)
    }

    /// Appends the commit record and spins until it is durable, per
    /// the commit-durability ordering guarantee in §5.
    pub fn commit(&self, txn: &mut Transaction) -> Lsn {
        let lsn = self.txn_manager.precommit(txn);
        self.txn_manager.commit_wait(txn);
        lsn
    }

    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        self.txn_manager.abort(txn)
    }

    pub fn page_manager(&self) -> &Arc<PageManager> {
        &self.page_manager
    }

    pub fn pool(&self) -> &Arc<PagePool> {
        &self.pool
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn recovery_manager(&self) -> &Arc<RecoveryManager> {
        &self.recovery_manager
    }

    pub fn log(&self) -> &Arc<LogWriter> {
        &self.log
    }

    /// Creates a fresh, empty B+-tree. Callers (a catalog layer,
    /// outside this crate's scope) are responsible for recording the
    /// returned root page id so the tree can be reopened later.
    pub fn create_btree(&self, txn: &mut Transaction) -> Result<BTree> {
        BTree::create(Arc::clone(&self.page_manager), txn)
    }

    /// Reopens a B+-tree whose root page id a catalog layer already
    /// knows about.
    pub fn open_btree(&self, root_page_id: PageId) -> BTree {
        BTree::open(Arc::clone(&self.page_manager), root_page_id)
    }

    /// Opens (creating if absent) a named LSM tree under
    /// `<dir>/lsm/<name>`. Several can coexist side by side, e.g. one
    /// per secondary index that prefers write-optimised ingest over
    /// the B+-tree's in-place update discipline.
    pub fn open_lsm(&self, name: &str) -> Result<LsmTree> {
        LsmTree::open(self.dir.join("lsm").join(name))
    }

    pub fn active_txn_count(&self) -> usize {
        self.txn_manager.snapshot_active().len()
    }
}

/// Test-only hook mirroring the teacher's `flush_for_test`/`clear`
/// admin surface: drops every cached page so a subsequent `get_page`
/// is forced to reread (or, for a page past the committed LSN
/// horizon, fail its checksum) from disk. Used to simulate a crash
/// without actually restarting the process.
#[cfg(any(test, feature = "test-util"))]
pub fn simulate_crash(pool: &PagePool) {
    pool.drop_all_pages();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn setup() {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });
    }

    #[test]
    fn row_page_insert_read_round_trip() {
        // Scenario S1: create a row page, insert "hello" then "world",
        // read them back by slot, and check the row count.
        setup();
        let mut page = crate::page::row::RowPage::new();
        let slot0 = page.insert(b"hello".to_vec());
        let slot1 = page.insert(b"world".to_vec());
        assert_eq!(slot0, 0);
        assert_eq!(slot1, 1);
        assert_eq!(page.get(slot0).unwrap(), b"hello");
        assert_eq!(page.get(slot1).unwrap(), b"world");
        assert_eq!(page.row_count(), 2);
    }

    #[test]
    fn btree_insert_split_and_bidirectional_scan() {
        // Scenario S2: insert seven keys with values large enough that
        // they cannot all fit on one 32 KiB leaf (forcing at least one
        // real foster-parent split partway through the inserts), then
        // check point reads and both iteration directions.
        setup();
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let mut txn = db.begin();
        let tree = db.create_btree(&mut txn).unwrap();

        let keys = ["a", "b", "c", "d", "e", "f", "g"];
        let value_len = 5000;
        let original_root = tree.root_page_id();
        for k in &keys {
            let value = k.repeat(value_len);
            tree.insert(&mut txn, k.as_bytes(), value.as_bytes()).unwrap();
        }
        db.commit(&mut txn);

        // Seven values of this size overflow a single leaf's body. The
        // tree started at depth one (root was the leaf itself), so a
        // real split must have installed a new branch root above it.
        assert_ne!(
            tree.root_page_id(),
            original_root,
            "expected the insert loop to force a leaf split"
        );

        for k in &keys {
            let value = tree.read(k.as_bytes()).unwrap();
            assert_eq!(value, k.repeat(value_len).into_bytes());
        }

        let forward: Vec<String> = tree
            .begin(crate::btree::Bound::Unbounded, crate::btree::Bound::Unbounded, true)
            .unwrap()
            .map(|(k, _)| String::from_utf8(k).unwrap())
            .collect();
        assert_eq!(forward, keys);

        let reverse: Vec<String> = tree
            .begin(crate::btree::Bound::Unbounded, crate::btree::Bound::Unbounded, false)
            .unwrap()
            .map(|(k, _)| String::from_utf8(k).unwrap())
            .collect();
        let mut expected: Vec<String> = keys.iter().map(|s| s.to_string()).collect();
        expected.reverse();
        assert_eq!(reverse, expected);
    }

    #[test]
    fn abort_undoes_every_write_in_the_transaction() {
        // Scenario S4: commit "x" -> "orig", then update it to "new"
        // in an aborted transaction. Reading after abort must see
        // "orig" again, and the transaction table must be empty.
        setup();
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        let mut t1 = db.begin();
        let tree = db.create_btree(&mut t1).unwrap();
        tree.insert(&mut t1, b"x", b"orig").unwrap();
        db.commit(&mut t1);

        let mut t2 = db.begin();
        tree.update(&mut t2, b"x", b"new").unwrap();
        assert_eq!(tree.read(b"x").unwrap(), b"new");
        db.abort(&mut t2).unwrap();

        assert_eq!(tree.read(b"x").unwrap(), b"orig");
        assert_eq!(db.active_txn_count(), 0);
    }
}
