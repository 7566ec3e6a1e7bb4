use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::catalog::ops as catalog_ops;
use crate::config::SyncMode;
use crate::error::Error;
use crate::types::{CollectionId, PageId, TxnId};

use super::database::SkipDB;
use super::lock_manager::LockSet;
use super::page_store::TxnPageStore;

/// A write transaction over a locked set of collections.
///
/// The transaction owns a copy of the catalog and every page it dirties.
/// [`Transaction::commit`] makes both durable and visible. Dropping the
/// transaction without committing discards them and releases the locks.
pub struct Transaction {
    pub(crate) db: SkipDB,
    pub(crate) store: TxnPageStore,
    pub(crate) catalog: Catalog,
    pub(crate) catalog_root: PageId,
    pub(crate) catalog_dirty: bool,
    pub(crate) txn_id: TxnId,
    pub(crate) locks: LockSet,
    pub(crate) safepoints: u64,
    /// Set once the commit record is in the log. From then on the log must
    /// survive a failed checkpoint so that recovery can finish the commit.
    pub(crate) finished: bool,
}

impl Transaction {
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Collection ids locked by this transaction, catalog included.
    pub fn locked_collections(&self) -> &[CollectionId] {
        self.locks.ids()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &TxnPageStore {
        &self.store
    }

    /// Mutable access to the page store and the catalog together. Marks the
    /// catalog as changed.
    pub fn parts_mut(&mut self) -> (&mut TxnPageStore, &mut Catalog) {
        self.catalog_dirty = true;
        (&mut self.store, &mut self.catalog)
    }

    /// Write the catalog into the transaction's pages now.
    pub fn persist_catalog(&mut self) -> Result<(), Error> {
        catalog_ops::persist(&mut self.store, self.catalog_root, &self.catalog)?;
        self.catalog_dirty = false;
        Ok(())
    }

    /// Whether enough pages are dirty that a safepoint should be taken.
    pub fn safepoint(&self) -> bool {
        self.store.dirty_count() >= self.db.inner.options.safepoint_dirty_pages
    }

    /// Move the dirty pages into the write-ahead log as uncommitted records.
    ///
    /// Locks are kept and nothing becomes visible to readers. Later reads in
    /// this transaction see the logged pages.
    pub fn do_safepoint(&mut self) -> Result<(), Error> {
        let dirty = self.store.drain_dirty();
        if dirty.is_empty() {
            return Ok(());
        }
        let mut wal = self.db.inner.wal.lock();
        for (page_id, buf) in &dirty {
            let offset = wal.append_page(self.txn_id, *page_id, buf)?;
            self.store.mark_flushed(*page_id, offset);
        }
        if self.db.inner.options.sync_mode == SyncMode::Full {
            wal.sync()?;
        }
        self.safepoints += 1;
        debug!(
            txn_id = self.txn_id,
            pages = dirty.len(),
            safepoint = self.safepoints,
            "safepoint flushed dirty pages"
        );
        Ok(())
    }

    pub fn safepoint_count(&self) -> u64 {
        self.safepoints
    }

    /// Persist the catalog if it changed, log and checkpoint every page, and
    /// release the locks.
    pub fn commit(mut self) -> Result<(), Error> {
        let db = self.db.clone();
        db.commit_txn(&mut self)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Writers are serialized, so uncommitted records belong to this
        // transaction. A commit record belongs to an earlier one that still
        // awaits its checkpoint.
        let mut wal = self.db.inner.wal.lock();
        if wal.holds_commit() {
            warn!(txn_id = self.txn_id, "log holds a committed transaction; keeping it for recovery");
        } else if !wal.is_empty() {
            if let Err(e) = wal.truncate() {
                warn!(txn_id = self.txn_id, error = %e, "failed to truncate log on abort");
            }
        }
        debug!(txn_id = self.txn_id, "transaction aborted");
    }
}
