//! Persistent ordered `Vec<u8> -> Vec<u8>` map backed by leaf/branch
//! pages with foster-parent splits, per §4.H. Used both as the
//! primary table index (keyed by encoded row identifiers) and as
//! secondary indexes (keyed by memcomparable-encoded column tuples).

pub mod iter;

pub use iter::{BTreeIterator, Bound};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;

use crate::config::{MAX_PAYLOAD_SIZE, PAGE_BODY_SIZE};
use crate::error::{Error, Result};
use crate::page::btree_node::{FenceKey, FosterPointer, NodeBody};
use crate::page::{PageBody, PageType};
use crate::pool::page_manager::PageManager;
use crate::txn::Transaction;
use crate::types::PageId;
use crate::wal::apply::encode as fenc;

fn pid_bytes(pid: PageId) -> Vec<u8> {
    pid.to_le_bytes().to_vec()
}

fn pid_from(bytes: &[u8]) -> PageId {
    u64::from_le_bytes(bytes[..8].try_into().unwrap())
}

/// Rejects payloads that could never fit even on an empty page,
/// regardless of split activity, per the data model's capacity note.
fn too_big_check(payload_len: usize) -> Result<()> {
    if payload_len > MAX_PAYLOAD_SIZE {
        Err(Error::TooBigData)
    } else {
        Ok(())
    }
}

/// Picks the child of a branch page that a descent for `key` should
/// follow, per §4.H: `lowest_page` for keys below `entries[0]`,
/// otherwise `key_i <= key < key_{i+1}`'s owner.
fn find_child(body: &NodeBody, key: &[u8]) -> PageId {
    if body.entries.is_empty() || key < body.entries[0].0.as_slice() {
        return body.lowest_page.expect("branch page missing lowest_page");
    }
    match body.find_index(key) {
        Ok(i) => pid_from(&body.entries[i].1),
        Err(i) => pid_from(&body.entries[i - 1].1),
    }
}

fn node_body(page: &PageBody) -> Option<&NodeBody> {
    match page {
        PageBody::Leaf(l) => Some(&l.body),
        PageBody::Branch(b) => Some(&b.body),
        _ => None,
    }
}

pub struct BTree {
    page_mgr: Arc<PageManager>,
    root: AtomicU64,
}

impl BTree {
    /// Allocates a fresh, empty leaf page and returns a handle rooted
    /// at it.
    pub fn create(page_mgr: Arc<PageManager>, txn: &mut Transaction) -> Result<Self> {
        let root_ref = page_mgr.allocate_new_page(txn, PageType::Leaf)?;
        let root_id = root_ref.header.page_id;
        drop(root_ref);
        Ok(Self {
            page_mgr,
            root: AtomicU64::new(root_id),
        })
    }

    /// Reopens a tree whose root page id is already known (e.g.
    /// recorded by a catalog layer outside this crate's scope).
    pub fn open(page_mgr: Arc<PageManager>, root_page_id: PageId) -> Self {
        Self {
            page_mgr,
            root: AtomicU64::new(root_page_id),
        }
    }

    pub fn root_page_id(&self) -> PageId {
        self.root.load(Ordering::Acquire)
    }

    /// Descends from the root to the leaf that should contain `key`,
    /// resolving any foster pointer encountered along the way by
    /// following it directly to the (same-level) foster child, per
    /// §4.H's concurrency note.
    fn descend_to_leaf(&self, key: &[u8]) -> Result<PageId> {
        let mut page_id = self.root_page_id();
        loop {
            let page_ref = self.page_mgr.get_page(page_id)?;
            let body = node_body(&page_ref.body).ok_or_else(|| Error::Corrupt("non-tree page in btree".into()))?;
            if let Some(foster) = &body.foster {
                if key >= foster.key.as_slice() {
                    page_id = foster.page_id;
                    continue;
                }
            }
            match &page_ref.body {
                PageBody::Leaf(_) => return Ok(page_id),
                PageBody::Branch(b) => {
                    page_id = find_child(&b.body, key);
                }
                _ => return Err(Error::Corrupt("non-tree page in btree".into())),
            }
        }
    }

    /// Full root-to-leaf path, used when a write may need to
    /// propagate a split upward through ancestors.
    fn descend_path(&self, key: &[u8]) -> Result<Vec<PageId>> {
        let mut path = vec![self.root_page_id()];
        loop {
            let page_id = *path.last().unwrap();
            let page_ref = self.page_mgr.get_page(page_id)?;
            let body = node_body(&page_ref.body).ok_or_else(|| Error::Corrupt("non-tree page in btree".into()))?;
            if let Some(foster) = &body.foster {
                if key >= foster.key.as_slice() {
                    *path.last_mut().unwrap() = foster.page_id;
                    continue;
                }
            }
            match &page_ref.body {
                PageBody::Leaf(_) => return Ok(path),
                PageBody::Branch(b) => {
                    path.push(find_child(&b.body, key));
                }
                _ => return Err(Error::Corrupt("non-tree page in btree".into())),
            }
        }
    }

    pub fn read(&self, key: &[u8]) -> Result<Vec<u8>> {
        let leaf_id = self.descend_to_leaf(key)?;
        let page_ref = self.page_mgr.get_page(leaf_id)?;
        let leaf = page_ref.body.as_leaf()?;
        leaf.body.get(key).map(|v| v.to_vec()).ok_or(Error::NotExists)
    }

    pub fn insert(&self, txn: &mut Transaction, key: &[u8], value: &[u8]) -> Result<()> {
        too_big_check(key.len() + value.len())?;
        loop {
            let path = self.descend_path(key)?;
            let leaf_id = *path.last().unwrap();
            let mut leaf_ref = self.page_mgr.get_page(leaf_id)?;
            let leaf = leaf_ref.body.as_leaf()?;
            if leaf.body.get(key).is_some() {
                return Err(Error::Duplicates);
            }
            let projected = leaf.used_bytes() + key.len() + value.len() + 8;
            if projected <= PAGE_BODY_SIZE {
                let lsn = txn.insert_leaf_log(leaf_id, key.to_vec(), value.to_vec());
                leaf_ref.body.as_leaf_mut()?.body.put_entry(key.to_vec(), value.to_vec());
                leaf_ref.header.page_lsn = lsn;
                leaf_ref.header.mark_dirty_if_clean(lsn);
                return Ok(());
            }
            drop(leaf_ref);
            self.split_and_propagate(txn, &path)?;
        }
    }

    pub fn update(&self, txn: &mut Transaction, key: &[u8], value: &[u8]) -> Result<()> {
        too_big_check(key.len() + value.len())?;
        let leaf_id = self.descend_to_leaf(key)?;
        let mut leaf_ref = self.page_mgr.get_page(leaf_id)?;
        let leaf = leaf_ref.body.as_leaf()?;
        let old = leaf.body.get(key).ok_or(Error::NotExists)?.to_vec();
        let lsn = txn.update_leaf_log(leaf_id, key.to_vec(), value.to_vec(), old);
        leaf_ref.body.as_leaf_mut()?.body.put_entry(key.to_vec(), value.to_vec());
        leaf_ref.header.page_lsn = lsn;
        leaf_ref.header.mark_dirty_if_clean(lsn);
        Ok(())
    }

    pub fn delete(&self, txn: &mut Transaction, key: &[u8]) -> Result<()> {
        let path = self.descend_path(key)?;
        let leaf_id = *path.last().unwrap();
        let mut leaf_ref = self.page_mgr.get_page(leaf_id)?;
        let leaf = leaf_ref.body.as_leaf()?;
        let old = leaf.body.get(key).ok_or(Error::NotExists)?.to_vec();
        let lsn = txn.delete_leaf_log(leaf_id, key.to_vec(), old);
        leaf_ref.body.as_leaf_mut()?.body.remove_entry(key);
        leaf_ref.header.page_lsn = lsn;
        leaf_ref.header.mark_dirty_if_clean(lsn);
        let became_empty = leaf_ref.body.as_leaf()?.body.is_empty();
        drop(leaf_ref);
        if became_empty && path.len() > 1 {
            self.merge_leaf_into_sibling(txn, &path)?;
        }
        Ok(())
    }

    pub fn begin(&self, left: Bound, right: Bound, ascending: bool) -> Result<BTreeIterator> {
        let start_key: &[u8] = match (&left, ascending) {
            (Bound::Included(k), true) => k.as_slice(),
            _ => match (&right, ascending) {
                (Bound::Included(k), false) => k.as_slice(),
                _ => &[],
            },
        };
        let leaf_id = if start_key.is_empty() {
            self.leftmost_or_rightmost_leaf(ascending)?
        } else {
            self.descend_to_leaf(start_key)?
        };
        let page_ref = self.page_mgr.get_page(leaf_id)?;
        let leaf = page_ref.body.as_leaf()?;
        let start_index = if ascending {
            match &left {
                Bound::Included(k) => leaf.body.entries.partition_point(|(ek, _)| ek.as_slice() < k.as_slice()),
                Bound::Unbounded => 0,
            }
        } else {
            match &right {
                Bound::Included(k) => {
                    let p = leaf.body.entries.partition_point(|(ek, _)| ek.as_slice() <= k.as_slice());
                    p.saturating_sub(1)
                }
                Bound::Unbounded => leaf.body.entries.len().saturating_sub(1),
            }
        };
        let end = if ascending { right } else { left };
        drop(page_ref);
        BTreeIterator::new(Arc::clone(&self.page_mgr), leaf_id, start_index, end, ascending)
    }

    fn leftmost_or_rightmost_leaf(&self, ascending: bool) -> Result<PageId> {
        let mut page_id = self.root_page_id();
        loop {
            let page_ref = self.page_mgr.get_page(page_id)?;
            match &page_ref.body {
                PageBody::Leaf(_) => return Ok(page_id),
                PageBody::Branch(b) => {
                    page_id = if ascending {
                        b.body.lowest_page.unwrap_or_else(|| pid_from(&b.body.entries[0].1))
                    } else if let Some((_, v)) = b.body.entries.last() {
                        pid_from(v)
                    } else {
                        b.body.lowest_page.expect("empty branch with no lowest_page")
                    };
                }
                _ => return Err(Error::Corrupt("non-tree page in btree".into())),
            }
        }
    }

    /// Splits the leaf at the bottom of `path`, then walks the
    /// remaining ancestors in `path` installing the foster pair into
    /// each parent, splitting further up as needed. If the root
    /// itself splits, allocates a new branch root.
    fn split_and_propagate(&self, txn: &mut Transaction, path: &[PageId]) -> Result<()> {
        let leaf_id = *path.last().unwrap();
        let mut pending = self.split_leaf(txn, leaf_id)?;

        for &parent_id in path[..path.len() - 1].iter().rev() {
            match self.install_into_branch(txn, parent_id, &pending.0, pending.1)? {
                None => return Ok(()),
                Some(next_pending) => pending = next_pending,
            }
        }

        // Root split: allocate a new branch root over the old root.
        let old_root = self.root_page_id();
        let mut new_root_ref = self.page_mgr.allocate_new_page(txn, PageType::Branch)?;
        let new_root_id = new_root_ref.header.page_id;
        {
            let branch = new_root_ref.body.as_branch_mut()?;
            branch.body.lowest_page = Some(old_root);
        }
        let lsn = txn.set_lowest_log(new_root_id, fenc::lowest(old_root), fenc::none());
        new_root_ref.header.page_lsn = lsn;
        new_root_ref.header.mark_dirty_if_clean(lsn);
        drop(new_root_ref);

        self.install_into_branch(txn, new_root_id, &pending.0, pending.1)?;
        self.root.store(new_root_id, Ordering::Release);
        debug!("btree root split: old root {old_root} -> new root {new_root_id}");
        Ok(())
    }

    /// Splits a full leaf page, moving its right half into a newly
    /// allocated sibling and installing a foster pointer on the old
    /// leaf. Returns `(split_key, new_sibling_id)` for the caller to
    /// install into the parent.
    fn split_leaf(&self, txn: &mut Transaction, leaf_id: PageId) -> Result<(Vec<u8>, PageId)> {
        let mut old_ref = self.page_mgr.get_page(leaf_id)?;
        let old_high_fence = old_ref.body.as_leaf()?.body.high_fence.clone();
        let old_next = old_ref.body.as_leaf()?.next_pid;
        let to_move: Vec<(Vec<u8>, Vec<u8>)> = {
            let entries = &old_ref.body.as_leaf()?.body.entries;
            let mid = entries.len() / 2;
            entries[mid..].to_vec()
        };
        let middle_key = to_move[0].0.clone();

        for (k, v) in &to_move {
            let lsn = txn.delete_leaf_log(leaf_id, k.clone(), v.clone());
            old_ref.header.page_lsn = lsn;
            old_ref.header.mark_dirty_if_clean(lsn);
        }
        old_ref.body.as_leaf_mut()?.body.entries.retain(|(k, _)| k < &middle_key);
        drop(old_ref);

        let mut new_ref = self.page_mgr.allocate_new_page(txn, PageType::Leaf)?;
        let new_id = new_ref.header.page_id;
        for (k, v) in &to_move {
            let lsn = txn.insert_leaf_log(new_id, k.clone(), v.clone());
            new_ref.body.as_leaf_mut()?.body.put_entry(k.clone(), v.clone());
            new_ref.header.page_lsn = lsn;
            new_ref.header.mark_dirty_if_clean(lsn);
        }
        {
            let leaf = new_ref.body.as_leaf_mut()?;
            leaf.body.low_fence = FenceKey::Key(middle_key.clone());
            leaf.body.high_fence = old_high_fence;
            leaf.next_pid = old_next;
            leaf.prev_pid = Some(leaf_id);
        }
        let lsn = txn.set_low_fence_log(new_id, fenc::fence(&FenceKey::Key(middle_key.clone())), fenc::none());
        new_ref.header.page_lsn = lsn;
        drop(new_ref);

        let mut old_ref = self.page_mgr.get_page(leaf_id)?;
        old_ref.body.as_leaf_mut()?.next_pid = Some(new_id);
        let foster_bytes = fenc::foster(new_id, &middle_key);
        let lsn = txn.set_foster_log(leaf_id, foster_bytes, fenc::none());
        old_ref.body.as_leaf_mut()?.body.foster = Some(FosterPointer {
            key: middle_key.clone(),
            page_id: new_id,
        });
        old_ref.header.page_lsn = lsn;
        old_ref.header.mark_dirty_if_clean(lsn);
        drop(old_ref);

        // The old leaf's former right neighbor still has its
        // `prev_pid` pointing at the old leaf; repoint it at the new
        // sibling so reverse iteration keeps following the chain
        // across the split instead of skipping the new page.
        if let Some(downstream_id) = old_next {
            let mut downstream_ref = self.page_mgr.get_page(downstream_id)?;
            let lsn = txn.set_prev_pid_log(downstream_id, fenc::lowest(new_id), fenc::lowest(leaf_id));
            downstream_ref.body.as_leaf_mut()?.prev_pid = Some(new_id);
            downstream_ref.header.page_lsn = lsn;
            downstream_ref.header.mark_dirty_if_clean(lsn);
        }

        Ok((middle_key, new_id))
    }

    /// Installs `(split_key, child_id)` as a new separator in
    /// `parent_id`, clearing the source leaf/branch's foster pointer
    /// (the foster is resolved atomically with this parent update,
    /// per §4.H). Returns `Some((split_key, new_sibling))` if
    /// `parent_id` itself had to split to make room.
    fn install_into_branch(
        &self,
        txn: &mut Transaction,
        parent_id: PageId,
        split_key: &[u8],
        child_id: PageId,
    ) -> Result<Option<(Vec<u8>, PageId)>> {
        let mut parent_ref = self.page_mgr.get_page(parent_id)?;
        let branch = parent_ref.body.as_branch()?;
        let projected = branch.used_bytes() + split_key.len() + 16;
        if projected <= PAGE_BODY_SIZE {
            let lsn = txn.insert_branch_log(parent_id, split_key.to_vec(), child_id);
            parent_ref
                .body
                .as_branch_mut()?
                .body
                .put_entry(split_key.to_vec(), pid_bytes(child_id));
            parent_ref.header.page_lsn = lsn;
            parent_ref.header.mark_dirty_if_clean(lsn);
            self.clear_foster(txn, &mut parent_ref, parent_id, split_key)?;
            return Ok(None);
        }
        drop(parent_ref);
        let pending = self.split_branch(txn, parent_id)?;
        // Decide which half (old parent or its new sibling) the new
        // separator belongs in, then install there.
        let target = if split_key < pending.0.as_slice() { parent_id } else { pending.1 };
        let mut target_ref = self.page_mgr.get_page(target)?;
        let lsn = txn.insert_branch_log(target, split_key.to_vec(), child_id);
        target_ref
            .body
            .as_branch_mut()?
            .body
            .put_entry(split_key.to_vec(), pid_bytes(child_id));
        target_ref.header.page_lsn = lsn;
        target_ref.header.mark_dirty_if_clean(lsn);
        Ok(Some(pending))
    }

    fn clear_foster(
        &self,
        txn: &mut Transaction,
        _parent_ref: &mut crate::pool::PageRef,
        _parent_id: PageId,
        split_key: &[u8],
    ) -> Result<()> {
        // The foster pointer being resolved lives on the *child* that
        // was split, not on the parent; find it via the child id we
        // just installed and clear it there.
        let child_id = {
            let branch = _parent_ref.body.as_branch()?;
            branch
                .body
                .get(split_key)
                .map(pid_from)
                .ok_or_else(|| Error::Corrupt("separator missing right after insert".into()))?
        };
        let mut child_ref = self.page_mgr.get_page(child_id)?;
        let has_foster = node_body(&child_ref.body).and_then(|b| b.foster.clone()).is_some();
        if has_foster {
            let lsn = txn.set_foster_log(child_id, fenc::none(), fenc::none());
            match &mut child_ref.body {
                PageBody::Leaf(l) => l.body.foster = None,
                PageBody::Branch(b) => b.body.foster = None,
                _ => {}
            }
            child_ref.header.page_lsn = lsn;
            child_ref.header.mark_dirty_if_clean(lsn);
        }
        Ok(())
    }

    fn split_branch(&self, txn: &mut Transaction, branch_id: PageId) -> Result<(Vec<u8>, PageId)> {
        let mut old_ref = self.page_mgr.get_page(branch_id)?;
        let old_high_fence = old_ref.body.as_branch()?.body.high_fence.clone();
        let to_move: Vec<(Vec<u8>, Vec<u8>)> = {
            let entries = &old_ref.body.as_branch()?.body.entries;
            let mid = entries.len() / 2;
            entries[mid..].to_vec()
        };
        let middle_key = to_move[0].0.clone();
        let lowest_of_new = pid_from(&to_move[0].1);

        for (k, v) in &to_move {
            let lsn = txn.delete_branch_log(branch_id, k.clone(), pid_from(v));
            old_ref.header.page_lsn = lsn;
            old_ref.header.mark_dirty_if_clean(lsn);
        }
        old_ref.body.as_branch_mut()?.body.entries.retain(|(k, _)| k < &middle_key);
        drop(old_ref);

        let mut new_ref = self.page_mgr.allocate_new_page(txn, PageType::Branch)?;
        let new_id = new_ref.header.page_id;
        {
            let branch = new_ref.body.as_branch_mut()?;
            branch.body.lowest_page = Some(lowest_of_new);
            branch.body.high_fence = old_high_fence;
            branch.body.low_fence = FenceKey::Key(middle_key.clone());
        }
        for (k, v) in to_move.iter().skip(1) {
            let lsn = txn.insert_branch_log(new_id, k.clone(), pid_from(v));
            new_ref.body.as_branch_mut()?.body.put_entry(k.clone(), v.clone());
            new_ref.header.page_lsn = lsn;
            new_ref.header.mark_dirty_if_clean(lsn);
        }

        let mut old_ref = self.page_mgr.get_page(branch_id)?;
        let foster_bytes = fenc::foster(new_id, &middle_key);
        let lsn = txn.set_foster_log(branch_id, foster_bytes, fenc::none());
        old_ref.body.as_branch_mut()?.body.foster = Some(FosterPointer {
            key: middle_key.clone(),
            page_id: new_id,
        });
        old_ref.header.page_lsn = lsn;
        old_ref.header.mark_dirty_if_clean(lsn);

        Ok((middle_key, new_id))
    }

    /// When a leaf empties out, merges its (still-present) entries'
    /// absence into the tree by folding its right sibling's entries
    /// in and dropping the separator from the parent, recursing if
    /// the parent becomes empty. A simplification of the full
    /// steal-or-merge discipline in §4.H: this port always merges
    /// rather than first attempting to steal a single entry from the
    /// sibling, noted in DESIGN.md.
    fn merge_leaf_into_sibling(&self, txn: &mut Transaction, path: &[PageId]) -> Result<()> {
        let leaf_id = path[path.len() - 1];
        let parent_id = path[path.len() - 2];

        let sibling_id = {
            let leaf_ref = self.page_mgr.get_page(leaf_id)?;
            leaf_ref.body.as_leaf()?.next_pid
        };
        let Some(sibling_id) = sibling_id else {
            return Ok(());
        };

        // Only merge if the sibling is reachable from the same
        // parent (i.e. not across a higher subtree boundary).
        let parent_ref = self.page_mgr.get_page(parent_id)?;
        let parent_covers_sibling = node_body(&parent_ref.body)
            .map(|b| b.entries.iter().any(|(_, v)| pid_from(v) == sibling_id))
            .unwrap_or(false);
        drop(parent_ref);
        if !parent_covers_sibling {
            return Ok(());
        }

        let (entries, sib_next, sib_high_fence) = {
            let sib_ref = self.page_mgr.get_page(sibling_id)?;
            let leaf = sib_ref.body.as_leaf()?;
            (leaf.body.entries.clone(), leaf.next_pid, leaf.body.high_fence.clone())
        };

        let mut leaf_ref = self.page_mgr.get_page(leaf_id)?;
        for (k, v) in &entries {
            let lsn = txn.insert_leaf_log(leaf_id, k.clone(), v.clone());
            leaf_ref.body.as_leaf_mut()?.body.put_entry(k.clone(), v.clone());
            leaf_ref.header.page_lsn = lsn;
            leaf_ref.header.mark_dirty_if_clean(lsn);
        }
        {
            let leaf = leaf_ref.body.as_leaf_mut()?;
            leaf.next_pid = sib_next;
            leaf.body.high_fence = sib_high_fence;
        }
        drop(leaf_ref);

        let separator = {
            let parent_ref = self.page_mgr.get_page(parent_id)?;
            node_body(&parent_ref.body)
                .and_then(|b| b.entries.iter().find(|(_, v)| pid_from(v) == sibling_id).map(|(k, _)| k.clone()))
        };
        self.page_mgr.destroy_page(txn, sibling_id)?;

        if let Some(sep) = separator {
            let mut parent_ref = self.page_mgr.get_page(parent_id)?;
            let undo_pid = sibling_id;
            let lsn = txn.delete_branch_log(parent_id, sep.clone(), undo_pid);
            parent_ref.body.as_branch_mut()?.body.remove_entry(&sep);
            parent_ref.header.page_lsn = lsn;
            parent_ref.header.mark_dirty_if_clean(lsn);

            let parent_empty = parent_ref.body.as_branch()?.body.is_empty();
            drop(parent_ref);
            if parent_empty && path.len() > 2 {
                self.collapse_branch(txn, parent_id, path)?;
            }
        }
        Ok(())
    }

    /// A branch that reaches zero keys collapses: its `lowest_page`
    /// becomes the new root/child in its parent's place, per §4.H.
    fn collapse_branch(&self, txn: &mut Transaction, branch_id: PageId, path: &[PageId]) -> Result<()> {
        let lowest = {
            let branch_ref = self.page_mgr.get_page(branch_id)?;
            branch_ref.body.as_branch()?.body.lowest_page
        };
        let Some(lowest) = lowest else { return Ok(()) };

        if branch_id == self.root_page_id() {
            self.root.store(lowest, Ordering::Release);
            debug!("btree root collapsed: {branch_id} -> {lowest}");
            return Ok(());
        }
        let idx = path.iter().position(|&p| p == branch_id).unwrap_or(0);
        if idx == 0 {
            return Ok(());
        }
        let grandparent_id = path[idx - 1];
        let mut gp_ref = self.page_mgr.get_page(grandparent_id)?;
        let sep = node_body(&gp_ref.body)
            .and_then(|b| b.entries.iter().find(|(_, v)| pid_from(v) == branch_id).map(|(k, _)| k.clone()));
        if let Some(sep) = sep {
            let lsn = txn.update_branch_log(grandparent_id, sep.clone(), lowest, branch_id);
            gp_ref.body.as_branch_mut()?.body.put_entry(sep, pid_bytes(lowest));
            gp_ref.header.page_lsn = lsn;
            gp_ref.header.mark_dirty_if_clean(lsn);
        } else if node_body(&gp_ref.body).and_then(|b| b.lowest_page) == Some(branch_id) {
            let lsn = txn.set_lowest_log(grandparent_id, fenc::lowest(lowest), fenc::lowest(branch_id));
            gp_ref.body.as_branch_mut()?.body.lowest_page = Some(lowest);
            gp_ref.header.page_lsn = lsn;
            gp_ref.header.mark_dirty_if_clean(lsn);
        }
        self.page_mgr.destroy_page(txn, branch_id)
    }
}
