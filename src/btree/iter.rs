//! Forward/backward iteration over a leaf range, following sibling
//! links maintained by splits, per §4.H.

use crate::error::Result;
use crate::pool::page_manager::PageManager;
use crate::types::PageId;
use std::sync::Arc;

#[derive(Clone)]
pub enum Bound {
    Unbounded,
    Included(Vec<u8>),
}

pub struct BTreeIterator {
    page_mgr: Arc<PageManager>,
    page_id: Option<PageId>,
    /// Next index to yield within `current`, or `-1` meaning "move to
    /// the previous/next sibling" for the descending/ascending case
    /// respectively once the page is exhausted.
    index: i64,
    end: Bound,
    ascending: bool,
    current: Vec<(Vec<u8>, Vec<u8>)>,
    done: bool,
}

impl BTreeIterator {
    pub(crate) fn new(
        page_mgr: Arc<PageManager>,
        start_page: PageId,
        start_index: usize,
        end: Bound,
        ascending: bool,
    ) -> Result<Self> {
        let mut it = Self {
            page_mgr,
            page_id: Some(start_page),
            index: start_index as i64,
            end,
            ascending,
            current: Vec::new(),
            done: false,
        };
        it.load_current()?;
        Ok(it)
    }

    fn load_current(&mut self) -> Result<()> {
        if let Some(pid) = self.page_id {
            let page_ref = self.page_mgr.get_page(pid)?;
            let leaf = page_ref.body.as_leaf()?;
            self.current = leaf.body.entries.clone();
        }
        Ok(())
    }

    fn within_bound(&self, key: &[u8]) -> bool {
        match &self.end {
            Bound::Unbounded => true,
            Bound::Included(k) => {
                if self.ascending {
                    key <= k.as_slice()
                } else {
                    key >= k.as_slice()
                }
            }
        }
    }

    fn sibling(&self) -> Result<Option<PageId>> {
        let Some(pid) = self.page_id else { return Ok(None) };
        let page_ref = self.page_mgr.get_page(pid)?;
        let leaf = page_ref.body.as_leaf()?;
        Ok(if self.ascending { leaf.next_pid } else { leaf.prev_pid })
    }
}

impl Iterator for BTreeIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.page_id?;

            let in_range = self.index >= 0 && (self.index as usize) < self.current.len();
            if in_range {
                let (k, v) = self.current[self.index as usize].clone();
                if !self.within_bound(&k) {
                    self.done = true;
                    return None;
                }
                self.index += if self.ascending { 1 } else { -1 };
                return Some((k, v));
            }

            // Current page exhausted in this direction; hop to the
            // sibling leaf and reset the cursor to its first (or
            // last, descending) entry.
            match self.sibling() {
                Ok(Some(next_pid)) => {
                    self.page_id = Some(next_pid);
                    if self.load_current().is_err() {
                        self.done = true;
                        return None;
                    }
                    self.index = if self.ascending {
                        0
                    } else {
                        self.current.len() as i64 - 1
                    };
                }
                _ => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}
