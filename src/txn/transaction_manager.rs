//! Transaction lifecycle, typed log emitters, and commit/abort, per
//! §4.E. A transaction owns its lock set and its undo chain (threaded
//! through `prev_lsn`); the manager owns the active transaction table
//! and the shared log/lock/pool handles every `Transaction` borrows.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::Result;
use crate::pool::page_pool::PagePool;
use crate::txn::lock_manager::LockManager;
use crate::types::{Lsn, RowPosition, TxnId, NO_PREV_LSN};
use crate::wal::log_record::{FenceMutation, LogKind, LogRecord, SlotMutation, TargetKind};
use crate::wal::{apply, codec, LogWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Running,
    Committed,
    Aborted,
}

/// Active transaction table entry, per the data model's ATT:
/// `txn_id -> (status, last_lsn)`.
#[derive(Debug, Clone, Copy)]
pub struct ActiveEntry {
    pub status: TxnStatus,
    pub last_lsn: Lsn,
}

pub struct Transaction {
    txn_id: TxnId,
    status: TxnStatus,
    prev_lsn: Lsn,
    pub read_set: HashSet<RowPosition>,
    pub write_set: HashSet<RowPosition>,
    log: Arc<LogWriter>,
    locks: Arc<LockManager>,
}

impl Transaction {
    pub fn id(&self) -> TxnId {
        self.txn_id
    }

    pub fn status(&self) -> TxnStatus {
        self.status
    }

    pub fn last_lsn(&self) -> Lsn {
        self.prev_lsn
    }

    /// Acquires a shared lock on `pos`, deduplicated against the
    /// write set (a row already held exclusive needs no shared lock).
    pub fn acquire_shared(&mut self, pos: RowPosition) -> Result<()> {
        if self.write_set.contains(&pos) || self.read_set.contains(&pos) {
            return Ok(());
        }
        self.locks.get_shared(self.txn_id, pos)?;
        self.read_set.insert(pos);
        Ok(())
    }

    /// Acquires an exclusive lock on `pos`, upgrading a held shared
    /// lock in place if present.
    pub fn acquire_exclusive(&mut self, pos: RowPosition) -> Result<()> {
        if self.write_set.contains(&pos) {
            return Ok(());
        }
        if self.read_set.contains(&pos) {
            self.locks.try_upgrade(self.txn_id, pos)?;
            self.read_set.remove(&pos);
        } else {
            self.locks.get_exclusive(self.txn_id, pos)?;
        }
        self.write_set.insert(pos);
        Ok(())
    }

    fn emit(&mut self, kind: LogKind) -> Lsn {
        let record = LogRecord::new(self.prev_lsn, self.txn_id, kind);
        let record = codec::append_record(&self.log, record)
            .expect("log append is infallible in this ring-buffer design");
        self.prev_lsn = record.lsn;
        record.lsn
    }

    fn emit_slot(&mut self, make: impl FnOnce(TargetKind, SlotMutation) -> LogKind, tk: TargetKind, m: SlotMutation) -> Lsn {
        self.emit(make(tk, m))
    }

    pub fn insert_row_log(&mut self, page_id: crate::types::PageId, slot: crate::types::SlotIndex, value: Vec<u8>) -> Lsn {
        self.emit_slot(
            LogKind::Insert,
            TargetKind::Row,
            SlotMutation {
                page_id,
                key_or_slot: slot.to_le_bytes().to_vec(),
                redo: value,
                undo: Vec::new(),
            },
        )
    }

    pub fn update_row_log(
        &mut self,
        page_id: crate::types::PageId,
        slot: crate::types::SlotIndex,
        new_value: Vec<u8>,
        old_value: Vec<u8>,
    ) -> Lsn {
        self.emit_slot(
            LogKind::Update,
            TargetKind::Row,
            SlotMutation {
                page_id,
                key_or_slot: slot.to_le_bytes().to_vec(),
                redo: new_value,
                undo: old_value,
            },
        )
    }

    pub fn delete_row_log(&mut self, page_id: crate::types::PageId, slot: crate::types::SlotIndex, old_value: Vec<u8>) -> Lsn {
        self.emit_slot(
            LogKind::Delete,
            TargetKind::Row,
            SlotMutation {
                page_id,
                key_or_slot: slot.to_le_bytes().to_vec(),
                redo: Vec::new(),
                undo: old_value,
            },
        )
    }

    pub fn insert_leaf_log(&mut self, page_id: crate::types::PageId, key: Vec<u8>, value: Vec<u8>) -> Lsn {
        self.emit_slot(
            LogKind::Insert,
            TargetKind::Leaf,
            SlotMutation {
                page_id,
                key_or_slot: key,
                redo: value,
                undo: Vec::new(),
            },
        )
    }

    pub fn update_leaf_log(&mut self, page_id: crate::types::PageId, key: Vec<u8>, new_value: Vec<u8>, old_value: Vec<u8>) -> Lsn {
        self.emit_slot(
            LogKind::Update,
            TargetKind::Leaf,
            SlotMutation {
                page_id,
                key_or_slot: key,
                redo: new_value,
                undo: old_value,
            },
        )
    }

    pub fn delete_leaf_log(&mut self, page_id: crate::types::PageId, key: Vec<u8>, old_value: Vec<u8>) -> Lsn {
        self.emit_slot(
            LogKind::Delete,
            TargetKind::Leaf,
            SlotMutation {
                page_id,
                key_or_slot: key,
                redo: Vec::new(),
                undo: old_value,
            },
        )
    }

    pub fn insert_branch_log(&mut self, page_id: crate::types::PageId, key: Vec<u8>, redo_pid: crate::types::PageId) -> Lsn {
        self.emit_slot(
            LogKind::Insert,
            TargetKind::Branch,
            SlotMutation {
                page_id,
                key_or_slot: key,
                redo: redo_pid.to_le_bytes().to_vec(),
                undo: Vec::new(),
            },
        )
    }

    pub fn update_branch_log(
        &mut self,
        page_id: crate::types::PageId,
        key: Vec<u8>,
        redo_pid: crate::types::PageId,
        undo_pid: crate::types::PageId,
    ) -> Lsn {
        self.emit_slot(
            LogKind::Update,
            TargetKind::Branch,
            SlotMutation {
                page_id,
                key_or_slot: key,
                redo: redo_pid.to_le_bytes().to_vec(),
                undo: undo_pid.to_le_bytes().to_vec(),
            },
        )
    }

    pub fn delete_branch_log(&mut self, page_id: crate::types::PageId, key: Vec<u8>, undo_pid: crate::types::PageId) -> Lsn {
        self.emit_slot(
            LogKind::Delete,
            TargetKind::Branch,
            SlotMutation {
                page_id,
                key_or_slot: key,
                redo: Vec::new(),
                undo: undo_pid.to_le_bytes().to_vec(),
            },
        )
    }

    fn emit_fence(&mut self, make: impl FnOnce(FenceMutation) -> LogKind, m: FenceMutation) -> Lsn {
        self.emit(make(m))
    }

    pub fn set_low_fence_log(&mut self, page_id: crate::types::PageId, redo: Vec<u8>, undo: Vec<u8>) -> Lsn {
        self.emit_fence(LogKind::SetLowFence, FenceMutation { page_id, redo, undo })
    }

    pub fn set_high_fence_log(&mut self, page_id: crate::types::PageId, redo: Vec<u8>, undo: Vec<u8>) -> Lsn {
        self.emit_fence(LogKind::SetHighFence, FenceMutation { page_id, redo, undo })
    }

    pub fn set_foster_log(&mut self, page_id: crate::types::PageId, redo: Vec<u8>, undo: Vec<u8>) -> Lsn {
        self.emit_fence(LogKind::SetFoster, FenceMutation { page_id, redo, undo })
    }

    pub fn set_lowest_log(&mut self, page_id: crate::types::PageId, redo: Vec<u8>, undo: Vec<u8>) -> Lsn {
        self.emit_fence(LogKind::SetLowest, FenceMutation { page_id, redo, undo })
    }

    /// Fixes up a leaf's `next_pid` forward sibling link.
    pub fn set_next_pid_log(&mut self, page_id: crate::types::PageId, redo: Vec<u8>, undo: Vec<u8>) -> Lsn {
        self.emit_fence(LogKind::SetNextPid, FenceMutation { page_id, redo, undo })
    }

    /// Fixes up a leaf's `prev_pid` backward sibling link.
    pub fn set_prev_pid_log(&mut self, page_id: crate::types::PageId, redo: Vec<u8>, undo: Vec<u8>) -> Lsn {
        self.emit_fence(LogKind::SetPrevPid, FenceMutation { page_id, redo, undo })
    }

    pub fn log_system_alloc_page(&mut self, page_id: crate::types::PageId, page_type: crate::page::PageType) -> Lsn {
        self.emit(LogKind::SystemAllocPage(page_id, page_type))
    }

    pub fn log_system_destroy_page(&mut self, page_id: crate::types::PageId) -> Lsn {
        self.emit(LogKind::SystemDestroyPage(page_id))
    }
}

pub struct TransactionManager {
    log: Arc<LogWriter>,
    locks: Arc<LockManager>,
    pool: Arc<PagePool>,
    next_txn_id: AtomicU64,
    active: Mutex<HashMap<TxnId, ActiveEntry>>,
}

impl TransactionManager {
    pub fn new(log: Arc<LogWriter>, locks: Arc<LockManager>, pool: Arc<PagePool>) -> Self {
        Self {
            log,
            locks,
            pool,
            next_txn_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin(&self) -> Transaction {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::AcqRel);
        let record = LogRecord::new(NO_PREV_LSN, txn_id, LogKind::Begin);
        let record = codec::append_record(&self.log, record).expect("append is infallible");
        self.active.lock().insert(
            txn_id,
            ActiveEntry {
                status: TxnStatus::Running,
                last_lsn: record.lsn,
            },
        );
        debug!("begin txn {txn_id} at lsn {}", record.lsn);
        Transaction {
            txn_id,
            status: TxnStatus::Running,
            prev_lsn: record.lsn,
            read_set: HashSet::new(),
            write_set: HashSet::new(),
            log: Arc::clone(&self.log),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Appends a commit record and releases locks; returns the commit
    /// record's LSN. Durability is not waited on here -- callers that
    /// need synchronous durability call [`Self::commit_wait`].
    pub fn precommit(&self, txn: &mut Transaction) -> Lsn {
        let lsn = txn.emit(LogKind::Commit);
        txn.status = TxnStatus::Committed;
        self.locks.release_all(txn.txn_id);
        self.active.lock().remove(&txn.txn_id);
        debug!("precommit txn {} at lsn {lsn}", txn.txn_id);
        lsn
    }

    /// Spins until the log writer reports the transaction's last LSN
    /// as durable, per the WAL commit-durability ordering guarantee.
    pub fn commit_wait(&self, txn: &Transaction) {
        while self.log.committed_lsn() < txn.prev_lsn {
            std::thread::sleep(std::time::Duration::from_micros(200));
        }
    }

    /// Walks `txn`'s `prev_lsn` chain backward, emitting a
    /// compensation record (and applying its redo to the affected
    /// page in place) for every non-compensation record belonging to
    /// the transaction, then releases locks. Property 7 ("abort as
    /// no-op") follows from every logged mutation having an undo.
    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        let mut cursor = txn.prev_lsn;
        while cursor != NO_PREV_LSN {
            let (record, _) = codec::read_record_at(&self.log, cursor)?;
            if record.txn_id != txn.txn_id {
                break;
            }
            if !record.kind.is_compensation() {
                if let Some((page_type, mutation)) = apply::undo_bytes(&record.kind) {
                    let clr_kind = build_clr(&record.kind, mutation.clone(), record.lsn);
                    let lsn = txn.emit(clr_kind.clone());
                    if let Some(page_id) = clr_kind.target_page() {
                        match self.pool.get_page(page_id) {
                            Ok(mut page_ref) => {
                                apply::apply_redo(&mut page_ref, &clr_kind)?;
                                page_ref.header.page_lsn = lsn;
                                page_ref.header.mark_dirty_if_clean(lsn);
                            }
                            Err(e) => warn!("abort: could not fetch page {page_id} for undo: {e}"),
                        }
                    }
                    let _ = page_type;
                }
            }
            cursor = record.prev_lsn;
        }
        txn.status = TxnStatus::Aborted;
        self.locks.release_all(txn.txn_id);
        self.active.lock().remove(&txn.txn_id);
        debug!("aborted txn {}", txn.txn_id);
        Ok(())
    }

    /// Snapshot of the active transaction table, for the checkpoint
    /// manager's end-checkpoint record.
    pub fn snapshot_active(&self) -> Vec<(TxnId, bool, Lsn)> {
        self.active
            .lock()
            .iter()
            .map(|(id, e)| (*id, e.status == TxnStatus::Committed, e.last_lsn))
            .collect()
    }

    pub fn log(&self) -> &Arc<LogWriter> {
        &self.log
    }
}

/// Builds the compensation `LogKind` that undoes `original`, with
/// `mutation` carrying the bytes needed to perform that compensation
/// (computed by [`apply::undo_bytes`]) and `compensates` pointing back
/// at the original record's LSN.
fn build_clr(original: &LogKind, mutation: SlotMutation, compensates: Lsn) -> LogKind {
    match original {
        LogKind::Insert(tk, _) => LogKind::CompensateInsert(*tk, mutation, compensates),
        LogKind::Update(tk, _) => LogKind::CompensateUpdate(*tk, mutation, compensates),
        LogKind::Delete(tk, _) => LogKind::CompensateDelete(*tk, mutation, compensates),
        other => other.clone(),
    }
}
