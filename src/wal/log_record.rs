//! The log record taxonomy: 30+ concrete kinds sharing a common header
//! and diverging in payload, per the data model. Modeled as one tagged
//! sum type with per-variant encode/decode rather than a class
//! hierarchy, per the design notes. The exact kind list is resolved
//! from `original_source/recovery/log_record.hpp`'s `LogType` enum.

use crate::io::{Decodeable, Encodeable};
use crate::page::PageType;
use crate::types::{Lsn, PageId, SlotIndex, TxnId};

/// Which slotted structure a data-manipulation record targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TargetKind {
    Row = 0,
    Leaf = 1,
    Branch = 2,
}

impl TargetKind {
    fn from_u8(v: u8) -> std::io::Result<Self> {
        match v {
            0 => Ok(TargetKind::Row),
            1 => Ok(TargetKind::Leaf),
            2 => Ok(TargetKind::Branch),
            o => Err(bad_tag("target kind", o)),
        }
    }
}

fn bad_tag(what: &str, v: u8) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("unknown {what} tag {v}"),
    )
}

/// A mutation on a slotted page: insert/update carry redo (the new
/// bytes) and undo (the bytes needed to roll back -- `None` for
/// insert's undo, since undo of an insert is "delete this key/slot").
/// Delete carries the removed bytes as undo so it can be redone by
/// re-deleting and undone by re-inserting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMutation {
    pub page_id: PageId,
    pub key_or_slot: Vec<u8>,
    pub redo: Vec<u8>,
    pub undo: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceMutation {
    pub page_id: PageId,
    pub redo: Vec<u8>,
    pub undo: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSnapshot {
    pub dirty_pages: Vec<(PageId, Lsn)>,
    pub active_txns: Vec<(TxnId, bool /* committed */, Lsn)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogKind {
    Begin,
    Commit,

    Insert(TargetKind, SlotMutation),
    Update(TargetKind, SlotMutation),
    Delete(TargetKind, SlotMutation),

    CompensateInsert(TargetKind, SlotMutation, Lsn /* compensates */),
    CompensateUpdate(TargetKind, SlotMutation, Lsn),
    CompensateDelete(TargetKind, SlotMutation, Lsn),

    SetLowFence(FenceMutation),
    SetHighFence(FenceMutation),
    SetFoster(FenceMutation),
    SetLowest(FenceMutation),

    /// A leaf's `next_pid`/`prev_pid` sibling links, maintained
    /// separately from the fence/foster structural edits because a
    /// split's foster-pointer installation on the old leaf and the
    /// downstream sibling's backward-link fix-up are two different
    /// pages.
    SetNextPid(FenceMutation),
    SetPrevPid(FenceMutation),

    CompensateSetLowFence(FenceMutation, Lsn),
    CompensateSetHighFence(FenceMutation, Lsn),
    CompensateSetFoster(FenceMutation, Lsn),
    CompensateSetLowest(FenceMutation, Lsn),
    CompensateSetNextPid(FenceMutation, Lsn),
    CompensateSetPrevPid(FenceMutation, Lsn),

    /// Carries the freshly allocated page's type alongside its id, so
    /// that a restart which lost the page before it ever reached disk
    /// can still materialize it (and replay the meta page's free-list
    /// bookkeeping) from the log alone -- see `RecoveryManager`'s
    /// dedicated handling of this kind.
    SystemAllocPage(PageId, PageType),
    SystemDestroyPage(PageId),

    BeginCheckpoint,
    EndCheckpoint(CheckpointSnapshot),
}

impl LogKind {
    fn tag(&self) -> u16 {
        match self {
            LogKind::Begin => 0,
            LogKind::Commit => 1,
            LogKind::Insert(..) => 2,
            LogKind::Update(..) => 3,
            LogKind::Delete(..) => 4,
            LogKind::CompensateInsert(..) => 5,
            LogKind::CompensateUpdate(..) => 6,
            LogKind::CompensateDelete(..) => 7,
            LogKind::SetLowFence(_) => 8,
            LogKind::SetHighFence(_) => 9,
            LogKind::SetFoster(_) => 10,
            LogKind::SetLowest(_) => 11,
            LogKind::CompensateSetLowFence(..) => 12,
            LogKind::CompensateSetHighFence(..) => 13,
            LogKind::CompensateSetFoster(..) => 14,
            LogKind::CompensateSetLowest(..) => 15,
            LogKind::SystemAllocPage(..) => 16,
            LogKind::SystemDestroyPage(_) => 17,
            LogKind::BeginCheckpoint => 18,
            LogKind::EndCheckpoint(_) => 19,
            LogKind::SetNextPid(_) => 20,
            LogKind::SetPrevPid(_) => 21,
            LogKind::CompensateSetNextPid(..) => 22,
            LogKind::CompensateSetPrevPid(..) => 23,
        }
    }

    /// The page this record mutates, if any -- used by the recovery
    /// manager's dirty page table and by single-page recovery's scan.
    pub fn target_page(&self) -> Option<PageId> {
        match self {
            LogKind::Insert(_, m)
            | LogKind::Update(_, m)
            | LogKind::Delete(_, m)
            | LogKind::CompensateInsert(_, m, _)
            | LogKind::CompensateUpdate(_, m, _)
            | LogKind::CompensateDelete(_, m, _) => Some(m.page_id),
            LogKind::SetLowFence(m)
            | LogKind::SetHighFence(m)
            | LogKind::SetFoster(m)
            | LogKind::SetLowest(m)
            | LogKind::SetNextPid(m)
            | LogKind::SetPrevPid(m)
            | LogKind::CompensateSetLowFence(m, _)
            | LogKind::CompensateSetHighFence(m, _)
            | LogKind::CompensateSetFoster(m, _)
            | LogKind::CompensateSetLowest(m, _)
            | LogKind::CompensateSetNextPid(m, _)
            | LogKind::CompensateSetPrevPid(m, _) => Some(m.page_id),
            LogKind::SystemAllocPage(p, _) | LogKind::SystemDestroyPage(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_compensation(&self) -> bool {
        matches!(
            self,
            LogKind::CompensateInsert(..)
                | LogKind::CompensateUpdate(..)
                | LogKind::CompensateDelete(..)
                | LogKind::CompensateSetLowFence(..)
                | LogKind::CompensateSetHighFence(..)
                | LogKind::CompensateSetFoster(..)
                | LogKind::CompensateSetLowest(..)
                | LogKind::CompensateSetNextPid(..)
                | LogKind::CompensateSetPrevPid(..)
        )
    }

    fn encode_payload(&self, buf: &mut Vec<u8>) {
        fn put_slot(buf: &mut Vec<u8>, k: TargetKind, m: &SlotMutation) {
            buf.push(k as u8);
            buf.extend_from_slice(&m.page_id.encode());
            buf.extend_from_slice(&m.key_or_slot.encode());
            buf.extend_from_slice(&m.redo.encode());
            buf.extend_from_slice(&m.undo.encode());
        }
        fn put_fence(buf: &mut Vec<u8>, m: &FenceMutation) {
            buf.extend_from_slice(&m.page_id.encode());
            buf.extend_from_slice(&m.redo.encode());
            buf.extend_from_slice(&m.undo.encode());
        }
        match self {
            LogKind::Begin | LogKind::Commit | LogKind::BeginCheckpoint => {}
            LogKind::Insert(k, m) | LogKind::Update(k, m) | LogKind::Delete(k, m) => {
                put_slot(buf, *k, m)
            }
            LogKind::CompensateInsert(k, m, compensates)
            | LogKind::CompensateUpdate(k, m, compensates)
            | LogKind::CompensateDelete(k, m, compensates) => {
                put_slot(buf, *k, m);
                buf.extend_from_slice(&compensates.encode());
            }
            LogKind::SetLowFence(m)
            | LogKind::SetHighFence(m)
            | LogKind::SetFoster(m)
            | LogKind::SetLowest(m)
            | LogKind::SetNextPid(m)
            | LogKind::SetPrevPid(m) => put_fence(buf, m),
            LogKind::CompensateSetLowFence(m, compensates)
            | LogKind::CompensateSetHighFence(m, compensates)
            | LogKind::CompensateSetFoster(m, compensates)
            | LogKind::CompensateSetLowest(m, compensates)
            | LogKind::CompensateSetNextPid(m, compensates)
            | LogKind::CompensateSetPrevPid(m, compensates) => {
                put_fence(buf, m);
                buf.extend_from_slice(&compensates.encode());
            }
            LogKind::SystemAllocPage(p, page_type) => {
                buf.extend_from_slice(&p.encode());
                buf.push(*page_type as u8);
            }
            LogKind::SystemDestroyPage(p) => {
                buf.extend_from_slice(&p.encode());
            }
            LogKind::EndCheckpoint(snap) => {
                buf.extend_from_slice(&(snap.dirty_pages.len() as u32).encode());
                for (pid, lsn) in &snap.dirty_pages {
                    buf.extend_from_slice(&pid.encode());
                    buf.extend_from_slice(&lsn.encode());
                }
                buf.extend_from_slice(&(snap.active_txns.len() as u32).encode());
                for (txn_id, committed, lsn) in &snap.active_txns {
                    buf.extend_from_slice(&txn_id.encode());
                    buf.extend_from_slice(&committed.encode());
                    buf.extend_from_slice(&lsn.encode());
                }
            }
        }
    }

    fn decode_payload<R: std::io::Read>(tag: u16, r: &mut R) -> std::io::Result<Self> {
        fn get_slot<R: std::io::Read>(r: &mut R) -> std::io::Result<(TargetKind, SlotMutation)> {
            let k = TargetKind::from_u8(u8::decode_from(r)?)?;
            let page_id = PageId::decode_from(r)?;
            let key_or_slot = Vec::<u8>::decode_from(r)?;
            let redo = Vec::<u8>::decode_from(r)?;
            let undo = Vec::<u8>::decode_from(r)?;
            Ok((
                k,
                SlotMutation {
                    page_id,
                    key_or_slot,
                    redo,
                    undo,
                },
            ))
        }
        fn get_fence<R: std::io::Read>(r: &mut R) -> std::io::Result<FenceMutation> {
            let page_id = PageId::decode_from(r)?;
            let redo = Vec::<u8>::decode_from(r)?;
            let undo = Vec::<u8>::decode_from(r)?;
            Ok(FenceMutation {
                page_id,
                redo,
                undo,
            })
        }
        Ok(match tag {
            0 => LogKind::Begin,
            1 => LogKind::Commit,
            2 => {
                let (k, m) = get_slot(r)?;
                LogKind::Insert(k, m)
            }
            3 => {
                let (k, m) = get_slot(r)?;
                LogKind::Update(k, m)
            }
            4 => {
                let (k, m) = get_slot(r)?;
                LogKind::Delete(k, m)
            }
            5 => {
                let (k, m) = get_slot(r)?;
                LogKind::CompensateInsert(k, m, Lsn::decode_from(r)?)
            }
            6 => {
                let (k, m) = get_slot(r)?;
                LogKind::CompensateUpdate(k, m, Lsn::decode_from(r)?)
            }
            7 => {
                let (k, m) = get_slot(r)?;
                LogKind::CompensateDelete(k, m, Lsn::decode_from(r)?)
            }
            8 => LogKind::SetLowFence(get_fence(r)?),
            9 => LogKind::SetHighFence(get_fence(r)?),
            10 => LogKind::SetFoster(get_fence(r)?),
            11 => LogKind::SetLowest(get_fence(r)?),
            12 => LogKind::CompensateSetLowFence(get_fence(r)?, Lsn::decode_from(r)?),
            13 => LogKind::CompensateSetHighFence(get_fence(r)?, Lsn::decode_from(r)?),
            14 => LogKind::CompensateSetFoster(get_fence(r)?, Lsn::decode_from(r)?),
            15 => LogKind::CompensateSetLowest(get_fence(r)?, Lsn::decode_from(r)?),
            16 => {
                let page_id = PageId::decode_from(r)?;
                let page_type = PageType::from_u8(u8::decode_from(r)?)?;
                LogKind::SystemAllocPage(page_id, page_type)
            }
            17 => LogKind::SystemDestroyPage(PageId::decode_from(r)?),
            18 => LogKind::BeginCheckpoint,
            20 => LogKind::SetNextPid(get_fence(r)?),
            21 => LogKind::SetPrevPid(get_fence(r)?),
            22 => LogKind::CompensateSetNextPid(get_fence(r)?, Lsn::decode_from(r)?),
            23 => LogKind::CompensateSetPrevPid(get_fence(r)?, Lsn::decode_from(r)?),
            19 => {
                let dp_count = u32::decode_from(r)? as usize;
                let mut dirty_pages = Vec::with_capacity(dp_count);
                for _ in 0..dp_count {
                    dirty_pages.push((PageId::decode_from(r)?, Lsn::decode_from(r)?));
                }
                let at_count = u32::decode_from(r)? as usize;
                let mut active_txns = Vec::with_capacity(at_count);
                for _ in 0..at_count {
                    active_txns.push((
                        TxnId::decode_from(r)?,
                        bool::decode_from(r)?,
                        Lsn::decode_from(r)?,
                    ));
                }
                LogKind::EndCheckpoint(CheckpointSnapshot {
                    dirty_pages,
                    active_txns,
                })
            }
            o => return Err(bad_tag("log record", o as u8)),
        })
    }
}

/// Common header plus the variant payload. `lsn` is filled in by the
/// log writer (it equals the byte offset the record is appended at),
/// so records are constructed with `lsn = 0` and stamped on append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub prev_lsn: Lsn,
    pub txn_id: TxnId,
    pub kind: LogKind,
}

impl LogRecord {
    pub fn new(prev_lsn: Lsn, txn_id: TxnId, kind: LogKind) -> Self {
        Self {
            lsn: 0,
            prev_lsn,
            txn_id,
            kind,
        }
    }

    /// `{type(u16), prev_lsn(u64), txn_id(u64)}` followed by
    /// type-specific fields, per the external interfaces section.
    /// `lsn` itself is not serialized -- it is implicit in the byte
    /// offset at which the record begins.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.kind.tag().encode());
        buf.extend_from_slice(&self.prev_lsn.encode());
        buf.extend_from_slice(&self.txn_id.encode());
        self.kind.encode_payload(&mut buf);
        buf
    }

    pub fn decode_at(lsn: Lsn, bytes: &[u8]) -> std::io::Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        let tag = u16::decode_from(&mut cursor)?;
        let prev_lsn = Lsn::decode_from(&mut cursor)?;
        let txn_id = TxnId::decode_from(&mut cursor)?;
        let kind = LogKind::decode_payload(tag, &mut cursor)?;
        Ok(Self {
            lsn,
            prev_lsn,
            txn_id,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_mutation_round_trips() {
        let rec = LogRecord::new(
            0,
            7,
            LogKind::Insert(
                TargetKind::Leaf,
                SlotMutation {
                    page_id: 4,
                    key_or_slot: b"k".to_vec(),
                    redo: b"v".to_vec(),
                    undo: vec![],
                },
            ),
        );
        let bytes = rec.encode();
        let back = LogRecord::decode_at(123, &bytes).unwrap();
        assert_eq!(back.lsn, 123);
        assert_eq!(back.prev_lsn, 0);
        assert_eq!(back.txn_id, 7);
        assert_eq!(back.kind, rec.kind);
    }

    #[test]
    fn checkpoint_snapshot_round_trips() {
        let rec = LogRecord::new(
            0,
            0,
            LogKind::EndCheckpoint(CheckpointSnapshot {
                dirty_pages: vec![(1, 10), (2, 20)],
                active_txns: vec![(5, false, 99)],
            }),
        );
        let bytes = rec.encode();
        let back = LogRecord::decode_at(0, &bytes).unwrap();
        assert_eq!(back.kind, rec.kind);
    }

    #[test]
    fn system_alloc_page_round_trips_with_page_type() {
        let rec = LogRecord::new(0, 3, LogKind::SystemAllocPage(9, PageType::Leaf));
        let bytes = rec.encode();
        let back = LogRecord::decode_at(55, &bytes).unwrap();
        assert_eq!(back.lsn, 55);
        assert_eq!(back.txn_id, 3);
        assert_eq!(back.kind, rec.kind);
        assert_eq!(back.kind.target_page(), Some(9));
    }
}
