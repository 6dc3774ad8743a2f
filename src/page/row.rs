//! The slotted row page: a grow-forward slot directory and rows that
//! live at stable `(page_id, slot_index)` positions, per the data
//! model. Deletion tombstones a slot rather than physically removing
//! it, so secondary indexes that reference a `RowPosition` are never
//! invalidated by an unrelated insert/delete elsewhere on the page.

use crate::error::{Error, Result};
use crate::io::{Decodeable, Encodeable};
use crate::types::{PageId, SlotIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPage {
    pub prev_pid: PageId,
    pub next_pid: PageId,
    /// `None` marks a tombstoned slot; its index is never reused.
    slots: Vec<Option<Vec<u8>>>,
}

impl RowPage {
    pub fn new() -> Self {
        Self {
            prev_pid: 0,
            next_pid: 0,
            slots: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, slot: SlotIndex) -> Result<&[u8]> {
        self.slots
            .get(slot as usize)
            .and_then(|s| s.as_deref())
            .ok_or(Error::NotExists)
    }

    /// Appends a new row, returning its stable slot index. Caller is
    /// responsible for the capacity check before calling (the page
    /// manager uses `used_bytes`/`fits` to decide split-vs-insert).
    pub fn insert(&mut self, data: Vec<u8>) -> SlotIndex {
        self.slots.push(Some(data));
        (self.slots.len() - 1) as SlotIndex
    }

    /// Overwrite a live slot in place. Fails if the slot was deleted.
    pub fn update(&mut self, slot: SlotIndex, data: Vec<u8>) -> Result<()> {
        match self.slots.get_mut(slot as usize) {
            Some(Some(existing)) => {
                *existing = data;
                Ok(())
            }
            _ => Err(Error::NotExists),
        }
    }

    /// Idempotently installs `data` at `slot`, padding the slot array
    /// with tombstones if needed. Used by redo/undo application: both
    /// "insert this row" and "undo a delete by restoring the row" are
    /// "this slot now holds this value", and "delete" / "undo an
    /// insert" are `put_at(slot, None)`. Applying the same mutation
    /// twice is a no-op the second time.
    pub fn put_at(&mut self, slot: SlotIndex, data: Option<Vec<u8>>) {
        let idx = slot as usize;
        if idx >= self.slots.len() {
            self.slots.resize(idx + 1, None);
        }
        self.slots[idx] = data;
    }

    pub fn delete(&mut self, slot: SlotIndex) -> Result<Vec<u8>> {
        match self.slots.get_mut(slot as usize) {
            Some(entry @ Some(_)) => Ok(entry.take().unwrap()),
            _ => Err(Error::NotExists),
        }
    }

    /// Reclaims the byte footprint of tombstoned slots. Slot indices
    /// and the data of live rows are unaffected, preserving
    /// `RowPosition` stability; only the backing representation is
    /// compacted.
    pub fn defragment(&mut self) {
        self.slots.shrink_to_fit();
    }

    pub fn used_bytes(&self) -> usize {
        8 + 8
            + 4
            + self
                .slots
                .iter()
                .map(|s| 1 + s.as_ref().map_or(0, |d| d.encode().len()))
                .sum::<usize>()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.used_bytes());
        buf.extend_from_slice(&self.prev_pid.encode());
        buf.extend_from_slice(&self.next_pid.encode());
        buf.extend_from_slice(&(self.slots.len() as u32).encode());
        for s in &self.slots {
            match s {
                None => buf.push(0),
                Some(data) => {
                    buf.push(1);
                    buf.extend_from_slice(&data.encode());
                }
            }
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> std::io::Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        let prev_pid = PageId::decode_from(&mut cursor)?;
        let next_pid = PageId::decode_from(&mut cursor)?;
        let count = u32::decode_from(&mut cursor)? as usize;
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            let tag = u8::decode_from(&mut cursor)?;
            if tag == 1 {
                slots.push(Some(Vec::<u8>::decode_from(&mut cursor)?));
            } else {
                slots.push(None);
            }
        }
        Ok(Self {
            prev_pid,
            next_pid,
            slots,
        })
    }
}

impl Default for RowPage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_read_round_trip() {
        let mut page = RowPage::new();
        let s0 = page.insert(b"hello".to_vec());
        let s1 = page.insert(b"world".to_vec());
        assert_eq!(s0, 0);
        assert_eq!(s1, 1);
        assert_eq!(page.get(s0).unwrap(), b"hello");
        assert_eq!(page.get(s1).unwrap(), b"world");
        assert_eq!(page.row_count(), 2);
    }

    #[test]
    fn delete_tombstones_without_shifting() {
        let mut page = RowPage::new();
        let s0 = page.insert(b"a".to_vec());
        let s1 = page.insert(b"b".to_vec());
        page.delete(s0).unwrap();
        assert!(page.get(s0).is_err());
        assert_eq!(page.get(s1).unwrap(), b"b");
        assert_eq!(page.row_count(), 1);
        assert_eq!(page.slot_count(), 2);
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut page = RowPage::new();
        page.insert(b"x".to_vec());
        page.insert(b"y".to_vec());
        page.delete(0).unwrap();
        let bytes = page.encode();
        let back = RowPage::decode(&bytes).unwrap();
        assert_eq!(back, page);
    }
}
