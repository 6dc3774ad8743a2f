//! Thin layer over the page pool that owns page allocation from the
//! meta page's free list and page type initialization, per §4.C.

use std::sync::Arc;

use log::debug;

use crate::config::META_PAGE_ID;
use crate::error::{Error, Result};
use crate::page::{FreePage, MetaPage, Page, PageBody, PageType};
use crate::pool::page_pool::{PagePool, PageRef};
use crate::recovery::RecoveryManager;
use crate::txn::transaction_manager::Transaction;
use crate::types::PageId;

pub struct PageManager {
    pool: Arc<PagePool>,
}

impl PageManager {
    pub fn new(pool: Arc<PagePool>) -> Self {
        Self { pool }
    }

    /// Ensures the meta page exists, creating it fresh if the
    /// underlying file is empty. Called once at database open.
    pub fn init_meta_page(&self) -> Result<()> {
        match self.pool.get_page(META_PAGE_ID) {
            Ok(_) => Ok(()),
            Err(_) => {
                let page = Page::new(META_PAGE_ID, PageBody::Meta(MetaPage::new()));
                self.pool.install_new_page(page)?;
                Ok(())
            }
        }
    }

    /// Pops a page from the meta page's free list, or bumps the
    /// watermark if the list is empty; initializes the page body for
    /// `page_type` and logs a `system_alloc_page` record.
    pub fn allocate_new_page(&self, txn: &mut Transaction, page_type: PageType) -> Result<PageRef> {
        let mut meta_ref = self.pool.get_page(META_PAGE_ID)?;
        let mut meta = match &meta_ref.body {
            PageBody::Meta(m) => *m,
            _ => return Err(Error::Corrupt("page 0 is not a meta page".into())),
        };
        let new_page_id;
        if meta.first_free_page != 0 {
            new_page_id = meta.first_free_page;
            let free_ref = self.pool.get_page(new_page_id)?;
            let next = match &free_ref.body {
                PageBody::Free(f) => f.next_free_page,
                _ => return Err(Error::Corrupt("free list entry is not a free page".into())),
            };
            drop(free_ref);
            meta.first_free_page = next;
        } else {
            new_page_id = meta.max_page_count;
            meta.max_page_count += 1;
        }
        meta_ref.body = PageBody::Meta(meta);
        drop(meta_ref);

        let page = Page::new(new_page_id, crate::page::default_body(page_type));
        let page_ref = self.pool.install_new_page(page)?;
        let lsn = txn.log_system_alloc_page(new_page_id, page_type);
        drop(page_ref);
        let mut page_ref = self.pool.get_page(new_page_id)?;
        page_ref.header.page_lsn = lsn;
        page_ref.header.mark_dirty_if_clean(lsn);
        debug!("allocated page {new_page_id} as {page_type:?}");
        Ok(page_ref)
    }

    /// Resets `page` to the free type, pushes it onto the free list,
    /// and logs a `system_destroy_page` record.
    pub fn destroy_page(&self, txn: &mut Transaction, page_id: PageId) -> Result<()> {
        let mut meta_ref = self.pool.get_page(META_PAGE_ID)?;
        let mut meta = match &meta_ref.body {
            PageBody::Meta(m) => *m,
            _ => return Err(Error::Corrupt("page 0 is not a meta page".into())),
        };
        let old_head = meta.first_free_page;
        meta.first_free_page = page_id;
        meta_ref.body = PageBody::Meta(meta);
        drop(meta_ref);

        let lsn = txn.log_system_destroy_page(page_id);
        let mut page_ref = self.pool.get_page(page_id)?;
        page_ref.body = PageBody::Free(FreePage::new(old_head));
        page_ref.header.page_type = PageType::Free;
        page_ref.header.page_lsn = lsn;
        page_ref.header.mark_dirty_if_clean(lsn);
        Ok(())
    }

    /// Passes through to the pool. Returns `Err(Error::Corrupt)` on a
    /// checksum failure; callers invoke single-page recovery and
    /// retry rather than trusting a corrupt page.
    pub fn get_page(&self, page_id: PageId) -> Result<PageRef> {
        self.pool.get_page(page_id)
    }

    /// Retries `get_page` once after invoking single-page recovery,
    /// per §4.F's "surrounding operation retries."
    pub fn get_page_with_spr(&self, page_id: PageId, recovery: &RecoveryManager) -> Result<PageRef> {
        match self.pool.get_page(page_id) {
            Ok(p) => Ok(p),
            Err(Error::Corrupt(_)) => {
                recovery.single_page_recovery(page_id)?;
                self.pool.get_page(page_id)
            }
            Err(e) => Err(e),
        }
    }

    pub fn pool(&self) -> &Arc<PagePool> {
        &self.pool
    }
}
