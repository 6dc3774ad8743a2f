//! Fuzzy checkpointing: a background worker that periodically writes
//! a begin/end checkpoint pair bracketing a snapshot of the dirty
//! page and active transaction tables, per §4.G.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error};

use crate::config::DEFAULT_CHECKPOINT_INTERVAL;
use crate::error::Result;
use crate::pool::page_pool::PagePool;
use crate::txn::TransactionManager;
use crate::types::NO_PREV_LSN;
use crate::wal::log_record::CheckpointSnapshot;
use crate::wal::{codec, LogKind, LogRecord, LogWriter};

struct Shared {
    log: Arc<LogWriter>,
    pool: Arc<PagePool>,
    txn_mgr: Arc<TransactionManager>,
    master_record_path: PathBuf,
    interval: Duration,
    stop: AtomicBool,
}

/// Owns the checkpointer's background thread; dropping it signals
/// stop and joins, per the design notes' RAII-handle pattern for
/// background workers.
pub struct CheckpointManager {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl CheckpointManager {
    pub fn start(
        log: Arc<LogWriter>,
        pool: Arc<PagePool>,
        txn_mgr: Arc<TransactionManager>,
        master_record_path: impl Into<PathBuf>,
    ) -> Self {
        Self::start_with_interval(log, pool, txn_mgr, master_record_path, DEFAULT_CHECKPOINT_INTERVAL)
    }

    pub fn start_with_interval(
        log: Arc<LogWriter>,
        pool: Arc<PagePool>,
        txn_mgr: Arc<TransactionManager>,
        master_record_path: impl Into<PathBuf>,
        interval: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            log,
            pool,
            txn_mgr,
            master_record_path: master_record_path.into(),
            interval,
            stop: AtomicBool::new(false),
        });
        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("checkpoint-manager".into())
                .spawn(move || run(shared))
                .expect("failed to spawn checkpoint manager thread")
        };
        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Runs one checkpoint synchronously -- used by tests that need
    /// to checkpoint at a specific point mid-workload (scenario S6).
    pub fn checkpoint_now(&self) -> Result<()> {
        checkpoint_once(&self.shared)
    }

    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CheckpointManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: Arc<Shared>) {
    let tick = Duration::from_millis(200);
    let mut waited = Duration::ZERO;
    loop {
        if shared.stop.load(Ordering::Acquire) {
            return;
        }
        if waited >= shared.interval {
            if let Err(e) = checkpoint_once(&shared) {
                error!("checkpoint failed: {e}");
            }
            waited = Duration::ZERO;
        }
        std::thread::sleep(tick);
        waited += tick;
    }
}

fn checkpoint_once(shared: &Shared) -> Result<()> {
    let begin = codec::append_record(&shared.log, LogRecord::new(NO_PREV_LSN, 0, LogKind::BeginCheckpoint))?;

    let dirty_pages = shared.pool.snapshot_dirty_pages();
    let active_txns = shared.txn_mgr.snapshot_active();

    let snapshot = CheckpointSnapshot {
        dirty_pages,
        active_txns,
    };
    codec::append_record(
        &shared.log,
        LogRecord::new(NO_PREV_LSN, 0, LogKind::EndCheckpoint(snapshot)),
    )?;

    shared.write_master_record(begin.lsn)?;
    debug!("checkpoint complete, begin_checkpoint lsn {}", begin.lsn);
    Ok(())
}

impl Shared {
    fn write_master_record(&self, lsn: u64) -> Result<()> {
        let tmp = self.master_record_path.with_extension("tmp");
        std::fs::write(&tmp, lsn.to_le_bytes())?;
        std::fs::rename(&tmp, &self.master_record_path)?;
        Ok(())
    }
}
