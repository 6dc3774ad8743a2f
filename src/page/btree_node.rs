//! Shared slotted layout for B+-tree leaf and branch pages: the three
//! reserved "extra" slots (low fence, high fence, foster pointer)
//! followed by ordered `(key, payload)` entries, per the data model's
//! node layout. Leaf and branch pages differ only in what `payload`
//! means (a value vs. a child page id) and in whether a `lowest_page`
//! pointer is carried, so the common machinery lives here and
//! `leaf.rs`/`branch.rs` are thin wrappers.

use crate::error::{Error, Result};
use crate::io::{Decodeable, Encodeable};
use crate::types::PageId;

/// A page's lower or upper key bound. `NegInf`/`PosInf` are the ±∞
/// sentinels the data model permits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenceKey {
    NegInf,
    Key(Vec<u8>),
    PosInf,
}

impl FenceKey {
    pub fn key(&self) -> Result<&[u8]> {
        match self {
            FenceKey::Key(k) => Ok(k),
            _ => Err(Error::IsInfinity),
        }
    }

    /// `low_fence <= k` under the convention that `NegInf` admits
    /// everything and `PosInf` admits nothing.
    pub fn admits_from_below(&self, k: &[u8]) -> bool {
        match self {
            FenceKey::NegInf => true,
            FenceKey::PosInf => false,
            FenceKey::Key(fence) => fence.as_slice() <= k,
        }
    }

    /// `k < high_fence` under the convention that `PosInf` admits
    /// everything and `NegInf` admits nothing.
    pub fn admits_from_above(&self, k: &[u8]) -> bool {
        match self {
            FenceKey::PosInf => true,
            FenceKey::NegInf => false,
            FenceKey::Key(fence) => k < fence.as_slice(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            FenceKey::NegInf => vec![0u8],
            FenceKey::PosInf => vec![2u8],
            FenceKey::Key(k) => {
                let mut buf = vec![1u8];
                buf.extend_from_slice(&k.encode());
                buf
            }
        }
    }

    fn decode<R: std::io::Read>(r: &mut R) -> std::io::Result<Self> {
        let tag = u8::decode_from(r)?;
        match tag {
            0 => Ok(FenceKey::NegInf),
            2 => Ok(FenceKey::PosInf),
            1 => Ok(FenceKey::Key(Vec::<u8>::decode_from(r)?)),
            other => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bad fence tag {other}"),
            )),
        }
    }
}

/// A transient right sibling: the split key under which it hangs and
/// the page id it lives at. See the data model's "foster child".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FosterPointer {
    pub key: Vec<u8>,
    pub page_id: PageId,
}

/// The ordered body shared by leaf and branch pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBody {
    pub low_fence: FenceKey,
    pub high_fence: FenceKey,
    pub foster: Option<FosterPointer>,
    /// Only populated on branch pages: the child for keys below
    /// `entries[0].0`.
    pub lowest_page: Option<PageId>,
    /// Sorted ascending by key. Leaf payloads are value bytes; branch
    /// payloads are an 8 byte little-endian child page id.
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl NodeBody {
    pub fn new_leaf() -> Self {
        Self {
            low_fence: FenceKey::NegInf,
            high_fence: FenceKey::PosInf,
            foster: None,
            lowest_page: None,
            entries: Vec::new(),
        }
    }

    pub fn new_branch(lowest_page: PageId) -> Self {
        Self {
            low_fence: FenceKey::NegInf,
            high_fence: FenceKey::PosInf,
            foster: None,
            lowest_page: Some(lowest_page),
            entries: Vec::new(),
        }
    }

    pub fn find_index(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|(k, _)| k.as_slice().cmp(key))
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.find_index(key).ok().map(|i| self.entries[i].1.as_slice())
    }

    /// Insert in sorted position. Caller has already checked capacity
    /// and duplicate-key rules.
    pub fn insert_sorted(&mut self, key: Vec<u8>, payload: Vec<u8>) {
        match self.find_index(&key) {
            Ok(i) => self.entries[i] = (key, payload),
            Err(i) => self.entries.insert(i, (key, payload)),
        }
    }

    /// Idempotent insert-or-overwrite, used by redo/undo application:
    /// applying the same mutation twice leaves the page in the same
    /// state as applying it once, per the idempotent-redo invariant.
    pub fn put_entry(&mut self, key: Vec<u8>, payload: Vec<u8>) {
        self.insert_sorted(key, payload);
    }

    /// Idempotent removal: a second application against an already
    /// absent key is a no-op rather than an error.
    pub fn remove_entry(&mut self, key: &[u8]) {
        let _ = self.remove(key);
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        match self.find_index(key) {
            Ok(i) => Some(self.entries.remove(i)),
            Err(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Byte footprint used by the entries array plus fences/foster,
    /// for the "no space"/"too big" capacity checks.
    pub fn used_bytes(&self) -> usize {
        let fence_bytes = self.low_fence.encode().len() + self.high_fence.encode().len();
        let foster_bytes = match &self.foster {
            Some(f) => 1 + f.key.encode().len() + 8,
            None => 1,
        };
        let lowest_bytes = 8;
        let entries_bytes: usize = self
            .entries
            .iter()
            .map(|(k, v)| k.encode().len() + v.encode().len())
            .sum();
        fence_bytes + foster_bytes + lowest_bytes + 4 + entries_bytes
    }

    /// Split the right half of the entries off, for a "no space" split.
    /// Returns `(middle_key, right_entries)`; `middle_key` becomes the
    /// foster key and the high fence of the new right sibling's
    /// parent-facing range.
    pub fn split_right_half(&mut self) -> (Vec<u8>, Vec<(Vec<u8>, Vec<u8>)>) {
        let mid = self.entries.len() / 2;
        let right = self.entries.split_off(mid);
        let middle_key = right[0].0.clone();
        (middle_key, right)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.used_bytes());
        buf.extend_from_slice(&self.low_fence.encode());
        buf.extend_from_slice(&self.high_fence.encode());
        match &self.foster {
            None => buf.push(0),
            Some(f) => {
                buf.push(1);
                buf.extend_from_slice(&f.key.encode());
                buf.extend_from_slice(&f.page_id.encode());
            }
        }
        match self.lowest_page {
            None => buf.extend_from_slice(&0u64.encode()),
            Some(pid) => buf.extend_from_slice(&pid.encode()),
        }
        buf.extend_from_slice(&(self.entries.len() as u32).encode());
        for (k, v) in &self.entries {
            buf.extend_from_slice(&k.encode());
            buf.extend_from_slice(&v.encode());
        }
        buf
    }

    pub fn decode(bytes: &[u8], is_branch: bool) -> std::io::Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        let low_fence = FenceKey::decode(&mut cursor)?;
        let high_fence = FenceKey::decode(&mut cursor)?;
        let has_foster = u8::decode_from(&mut cursor)?;
        let foster = if has_foster == 1 {
            let key = Vec::<u8>::decode_from(&mut cursor)?;
            let page_id = PageId::decode_from(&mut cursor)?;
            Some(FosterPointer { key, page_id })
        } else {
            None
        };
        let lowest_raw = u64::decode_from(&mut cursor)?;
        let lowest_page = if is_branch { Some(lowest_raw) } else { None };
        let count = u32::decode_from(&mut cursor)? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let k = Vec::<u8>::decode_from(&mut cursor)?;
            let v = Vec::<u8>::decode_from(&mut cursor)?;
            entries.push((k, v));
        }
        Ok(Self {
            low_fence,
            high_fence,
            foster,
            lowest_page,
            entries,
        })
    }
}
