//! Core identifier aliases used across every module. Kept as plain
//! integer aliases rather than newtypes to match the teacher's own
//! `type Key = BTreePageID` / `pub type Pod<T>` style of lightweight
//! type aliasing, extended with `RowPosition`, the stable identifier
//! spec.md calls out as used by secondary indexes.

/// Log sequence number: a byte offset into the log file.
pub type Lsn = u64;

/// Page identifier: an index into the database file, `page_id * PAGE_SIZE`.
pub type PageId = u64;

/// Transaction identifier, monotonically assigned.
pub type TxnId = u64;

/// Index of a slot within a page's slot array.
pub type SlotIndex = u32;

/// A row's stable identifier: `(page_id, slot_index)`. Secondary
/// indexes store these as their payload so rows never need to move
/// when referenced from an index.
pub type RowPosition = (PageId, SlotIndex);

/// An LSN meaning "nothing logged yet" for a transaction's `prev_lsn`
/// chain head.
pub const NO_PREV_LSN: Lsn = 0;
