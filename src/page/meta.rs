//! The meta page (page id 0): the free-list head and the page-count
//! watermark that together drive allocation.

use crate::io::{Decodeable, Encodeable};
use crate::types::PageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaPage {
    pub max_page_count: u64,
    pub first_free_page: PageId,
}

impl MetaPage {
    pub fn new() -> Self {
        Self {
            max_page_count: 1, // page 0 itself
            first_free_page: 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&self.max_page_count.encode());
        buf.extend_from_slice(&self.first_free_page.encode());
        buf
    }

    pub fn decode(bytes: &[u8]) -> std::io::Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        let max_page_count = u64::decode_from(&mut cursor)?;
        let first_free_page = u64::decode_from(&mut cursor)?;
        Ok(Self {
            max_page_count,
            first_free_page,
        })
    }
}

impl Default for MetaPage {
    fn default() -> Self {
        Self::new()
    }
}

/// A free page's body: just the next link of the singly-linked free
/// list. `0` (the meta page's own id) doubles as "end of list" since
/// page 0 can never be freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreePage {
    pub next_free_page: PageId,
}

impl FreePage {
    pub fn new(next_free_page: PageId) -> Self {
        Self { next_free_page }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.next_free_page.encode()
    }

    pub fn decode(bytes: &[u8]) -> std::io::Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        Ok(Self {
            next_free_page: u64::decode_from(&mut cursor)?,
        })
    }
}
