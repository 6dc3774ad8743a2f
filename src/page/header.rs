use crate::config::INFINITE_LSN;
use crate::io::{Decodeable, Encodeable};
use crate::types::{Lsn, PageId};

/// Page type tag. Kept as a plain `repr(u8)` enum rather than a bitmask
/// so that `PageBody` (see `mod.rs`) can be a tagged sum type keyed by
/// this discriminant, per the design notes' guidance to model the
/// source's tagged union of page bodies as a Rust sum type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    Meta = 0,
    Free = 1,
    Row = 2,
    Leaf = 3,
    Branch = 4,
}

impl PageType {
    pub fn from_u8(v: u8) -> std::io::Result<Self> {
        match v {
            0 => Ok(PageType::Meta),
            1 => Ok(PageType::Free),
            2 => Ok(PageType::Row),
            3 => Ok(PageType::Leaf),
            4 => Ok(PageType::Branch),
            other => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown page type tag {other}"),
            )),
        }
    }
}

/// Fixed header carried by every page, serialized ahead of the typed
/// body. Field order matches the external interfaces section:
/// `page_id | page_lsn | recovery_lsn | page_type | checksum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_id: PageId,
    pub page_lsn: Lsn,
    /// Earliest LSN whose update to this page may not yet be durable.
    /// `INFINITE_LSN` iff the page is clean.
    pub recovery_lsn: Lsn,
    pub page_type: PageType,
    pub checksum: u64,
}

impl PageHeader {
    pub fn new(page_id: PageId, page_type: PageType) -> Self {
        Self {
            page_id,
            page_lsn: 0,
            recovery_lsn: INFINITE_LSN,
            page_type,
            checksum: 0,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.recovery_lsn != INFINITE_LSN
    }

    /// Called the first time a clean page is touched by a logged
    /// update: its recovery LSN becomes the LSN of that first update.
    pub fn mark_dirty_if_clean(&mut self, lsn: Lsn) {
        if !self.is_dirty() {
            self.recovery_lsn = lsn;
        }
    }

    pub fn mark_clean(&mut self) {
        self.recovery_lsn = INFINITE_LSN;
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(super::HEADER_SIZE);
        buf.extend_from_slice(&self.page_id.encode());
        buf.extend_from_slice(&self.page_lsn.encode());
        buf.extend_from_slice(&self.recovery_lsn.encode());
        buf.extend_from_slice(&(self.page_type as u64).encode());
        buf.extend_from_slice(&self.checksum.encode());
        buf
    }

    pub fn decode(bytes: &[u8]) -> std::io::Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        let page_id = u64::decode_from(&mut cursor)?;
        let page_lsn = u64::decode_from(&mut cursor)?;
        let recovery_lsn = u64::decode_from(&mut cursor)?;
        let page_type = PageType::from_u8(u64::decode_from(&mut cursor)? as u8)?;
        let checksum = u64::decode_from(&mut cursor)?;
        Ok(Self {
            page_id,
            page_lsn,
            recovery_lsn,
            page_type,
            checksum,
        })
    }
}
