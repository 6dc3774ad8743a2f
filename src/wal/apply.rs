//! Type-specific mutation application shared by abort's in-place undo
//! and the recovery manager's redo pass, per §4.F/§4.H: "apply the
//! record's redo (the type-specific mutation...)". Every function
//! here is idempotent -- applying the same mutation to a page twice
//! leaves it in the same state as applying it once, satisfying
//! testable property 6.

use crate::error::{Error, Result};
use crate::page::{Page, PageBody, PageType};
use crate::types::SlotIndex;
use crate::wal::log_record::{FenceMutation, LogKind, SlotMutation, TargetKind};

fn row_slot(bytes: &[u8]) -> Result<SlotIndex> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| Error::Corrupt("malformed row slot in log record".into()))?;
    Ok(u32::from_le_bytes(arr))
}

fn apply_put(body: &mut PageBody, target: TargetKind, key_or_slot: &[u8], value: Option<Vec<u8>>) -> Result<()> {
    match target {
        TargetKind::Row => {
            let slot = row_slot(key_or_slot)?;
            body.as_row_mut()?.put_at(slot, value);
        }
        TargetKind::Leaf => match value {
            Some(v) => body.as_leaf_mut()?.body.put_entry(key_or_slot.to_vec(), v),
            None => body.as_leaf_mut()?.body.remove_entry(key_or_slot),
        },
        TargetKind::Branch => match value {
            Some(v) => body.as_branch_mut()?.body.put_entry(key_or_slot.to_vec(), v),
            None => body.as_branch_mut()?.body.remove_entry(key_or_slot),
        },
    }
    Ok(())
}

fn decode_pid(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        None
    } else {
        Some(u64::from_le_bytes(bytes[..8].try_into().unwrap()))
    }
}

fn apply_fence(body: &mut PageBody, m: &FenceMutation, which: FenceSlot, bytes: &[u8]) -> Result<()> {
    use crate::page::btree_node::{FenceKey, FosterPointer};
    let _ = m;
    let decode_fence = |b: &[u8]| -> FenceKey {
        if b.is_empty() {
            FenceKey::NegInf
        } else if b == [0xFF] {
            FenceKey::PosInf
        } else {
            FenceKey::Key(b.to_vec())
        }
    };
    // `next_pid`/`prev_pid` live on the leaf struct, not the shared
    // node body, and only leaves carry them.
    if matches!(which, FenceSlot::NextPid | FenceSlot::PrevPid) {
        let leaf = body.as_leaf_mut()?;
        let pid = decode_pid(bytes);
        match which {
            FenceSlot::NextPid => leaf.next_pid = pid,
            FenceSlot::PrevPid => leaf.prev_pid = pid,
            _ => unreachable!(),
        }
        return Ok(());
    }
    let set = |nb: &mut crate::page::btree_node::NodeBody| match which {
        FenceSlot::Low => nb.low_fence = decode_fence(bytes),
        FenceSlot::High => nb.high_fence = decode_fence(bytes),
        FenceSlot::Foster => {
            nb.foster = if bytes.is_empty() {
                None
            } else {
                let page_id = u64::from_le_bytes(bytes[..8].try_into().unwrap());
                let key = bytes[8..].to_vec();
                Some(FosterPointer { key, page_id })
            }
        }
        FenceSlot::Lowest => nb.lowest_page = decode_pid(bytes),
        FenceSlot::NextPid | FenceSlot::PrevPid => unreachable!("handled above"),
    };
    match body {
        PageBody::Leaf(l) => set(&mut l.body),
        PageBody::Branch(b) => set(&mut b.body),
        _ => return Err(Error::Corrupt("fence mutation on non-tree page".into())),
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum FenceSlot {
    Low,
    High,
    Foster,
    Lowest,
    NextPid,
    PrevPid,
}

/// Encodes a [`FenceKey`]/foster/lowest value into the flat byte form
/// `apply_fence` decodes, for callers building a `FenceMutation`.
pub mod encode {
    use crate::page::btree_node::FenceKey;

    pub fn fence(key: &FenceKey) -> Vec<u8> {
        match key {
            FenceKey::NegInf => vec![],
            FenceKey::PosInf => vec![0xFF],
            FenceKey::Key(k) => k.clone(),
        }
    }

    pub fn foster(page_id: u64, key: &[u8]) -> Vec<u8> {
        let mut buf = page_id.to_le_bytes().to_vec();
        buf.extend_from_slice(key);
        buf
    }

    pub fn lowest(page_id: u64) -> Vec<u8> {
        page_id.to_le_bytes().to_vec()
    }

    pub fn none() -> Vec<u8> {
        vec![]
    }
}

/// Applies the redo of `kind` to `page`. Returns `Ok(())` for records
/// that carry no page-level mutation (`Begin`, `Commit`, checkpoint
/// records) and for `SystemAllocPage`/`SystemDestroyPage`: forward
/// execution applies those directly through `PageManager`, and
/// `RecoveryManager` gives them dedicated redo handling (they mutate
/// the meta page's free list, not just the allocated page), so this
/// generic dispatch never needs to touch them.
pub fn apply_redo(page: &mut Page, kind: &LogKind) -> Result<()> {
    match kind {
        LogKind::Begin | LogKind::Commit | LogKind::BeginCheckpoint | LogKind::EndCheckpoint(_) => Ok(()),
        LogKind::SystemAllocPage(_) | LogKind::SystemDestroyPage(_) => Ok(()),

        LogKind::Insert(tk, m) => apply_put(&mut page.body, *tk, &m.key_or_slot, Some(m.redo.clone())),
        LogKind::Update(tk, m) => apply_put(&mut page.body, *tk, &m.key_or_slot, Some(m.redo.clone())),
        LogKind::Delete(tk, m) => apply_put(&mut page.body, *tk, &m.key_or_slot, None),

        // A CLR's redo IS the compensating action: undo of an insert
        // is a delete; undo of an update restores the old value; undo
        // of a delete reinserts the old value.
        LogKind::CompensateInsert(tk, m, _) => apply_put(&mut page.body, *tk, &m.key_or_slot, None),
        LogKind::CompensateUpdate(tk, m, _) => {
            apply_put(&mut page.body, *tk, &m.key_or_slot, Some(m.redo.clone()))
        }
        LogKind::CompensateDelete(tk, m, _) => {
            apply_put(&mut page.body, *tk, &m.key_or_slot, Some(m.redo.clone()))
        }

        LogKind::SetLowFence(m) => apply_fence(&mut page.body, m, FenceSlot::Low, &m.redo),
        LogKind::SetHighFence(m) => apply_fence(&mut page.body, m, FenceSlot::High, &m.redo),
        LogKind::SetFoster(m) => apply_fence(&mut page.body, m, FenceSlot::Foster, &m.redo),
        LogKind::SetLowest(m) => apply_fence(&mut page.body, m, FenceSlot::Lowest, &m.redo),
        LogKind::SetNextPid(m) => apply_fence(&mut page.body, m, FenceSlot::NextPid, &m.redo),
        LogKind::SetPrevPid(m) => apply_fence(&mut page.body, m, FenceSlot::PrevPid, &m.redo),

        LogKind::CompensateSetLowFence(m, _) => apply_fence(&mut page.body, m, FenceSlot::Low, &m.redo),
        LogKind::CompensateSetHighFence(m, _) => apply_fence(&mut page.body, m, FenceSlot::High, &m.redo),
        LogKind::CompensateSetFoster(m, _) => apply_fence(&mut page.body, m, FenceSlot::Foster, &m.redo),
        LogKind::CompensateSetLowest(m, _) => apply_fence(&mut page.body, m, FenceSlot::Lowest, &m.redo),
        LogKind::CompensateSetNextPid(m, _) => apply_fence(&mut page.body, m, FenceSlot::NextPid, &m.redo),
        LogKind::CompensateSetPrevPid(m, _) => apply_fence(&mut page.body, m, FenceSlot::PrevPid, &m.redo),
    }
}

/// The bytes a compensating record's `redo` field must carry to undo
/// `kind`, together with the target page id and target kind -- used
/// by the transaction manager's `abort` to build each CLR. Returns
/// `None` for records with nothing to undo (`Begin`, `Commit`,
/// checkpoint and system-page records: the page manager's free list
/// bookkeeping for those is not covered by this generic undo path,
/// matching `apply_redo`'s treatment of them).
pub fn undo_bytes(kind: &LogKind) -> Option<(PageType, SlotMutation)> {
    match kind {
        LogKind::Insert(tk, m) => Some((
            target_page_type(*tk),
            SlotMutation {
                page_id: m.page_id,
                key_or_slot: m.key_or_slot.clone(),
                redo: Vec::new(),
                undo: Vec::new(),
            },
        )),
        LogKind::Update(tk, m) => Some((
            target_page_type(*tk),
            SlotMutation {
                page_id: m.page_id,
                key_or_slot: m.key_or_slot.clone(),
                redo: m.undo.clone(),
                undo: Vec::new(),
            },
        )),
        LogKind::Delete(tk, m) => Some((
            target_page_type(*tk),
            SlotMutation {
                page_id: m.page_id,
                key_or_slot: m.key_or_slot.clone(),
                redo: m.undo.clone(),
                undo: Vec::new(),
            },
        )),
        _ => None,
    }
}

fn target_page_type(tk: TargetKind) -> PageType {
    match tk {
        TargetKind::Row => PageType::Row,
        TargetKind::Leaf => PageType::Leaf,
        TargetKind::Branch => PageType::Branch,
    }
}
