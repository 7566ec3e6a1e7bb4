use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::catalog::ops as catalog_ops;
use crate::catalog::{Catalog, IndexDescriptor, validate_collection_name};
use crate::config::{DatabaseOptions, SyncMode};
use crate::document;
use crate::encoding::IndexKey;
use crate::error::{EncodingError, Error, StorageError};
use crate::expr;
use crate::index::service::{check_integrity, find_all, find_node, scan};
use crate::index::{IndexIntegrity, IndexNode, IndexService};
use crate::storage::file::FileManager;
use crate::storage::header::FileHeader;
use crate::storage::lock::FileLock;
use crate::storage::page::write_checksum_buf;
use crate::storage::wal::WriteAheadLog;
use crate::types::{CATALOG_COLLECTION_ID, CollectionId, DataBlockId, PAGE_SIZE, PageId, TxnId};

use super::builders::CreateIndexBuilder;
use super::lock_manager::LockManager;
use super::page_store::{FilePageStore, TxnPageStore};
use super::transaction::Transaction;

pub(crate) struct DatabaseState {
    pub(crate) file_manager: FileManager,
    pub(crate) header: FileHeader,
    pub(crate) header_slot: u8,
}

impl DatabaseState {
    /// Write `pages` in place with checksums, then publish them through the
    /// alternate header slot. Returns the number of pages written.
    fn checkpoint(
        &mut self,
        txn_id: TxnId,
        total_page_count: u64,
        catalog_root_page: PageId,
        pages: impl IntoIterator<Item = (PageId, [u8; PAGE_SIZE])>,
        sync: bool,
    ) -> Result<usize, StorageError> {
        self.file_manager.grow(total_page_count)?;
        let mut written = 0;
        for (page_id, mut buf) in pages {
            write_checksum_buf(&mut buf);
            self.file_manager.write_page(page_id, &buf)?;
            written += 1;
        }
        // Pages must be durable before the header that points at them.
        if sync {
            self.file_manager.sync()?;
        }

        let header = FileHeader {
            txn_counter: txn_id,
            catalog_root_page,
            total_page_count,
        };
        let slot = FileHeader::alternate_slot(self.header_slot);
        self.file_manager.write_header(slot, &header)?;
        if sync {
            self.file_manager.sync()?;
        }
        self.header = header;
        self.header_slot = slot;
        Ok(written)
    }
}

pub(crate) struct DatabaseInner {
    state: RwLock<DatabaseState>,
    pub(crate) wal: Mutex<WriteAheadLog>,
    locks: Arc<LockManager>,
    /// File descriptor for readers. Uses `pread`, so readers can clone it
    /// without holding any lock.
    read_file: File,
    pub(crate) options: DatabaseOptions,
    /// Set when a logged commit could not be checkpointed.
    needs_recovery: AtomicBool,
    _file_lock: FileLock,
    path: PathBuf,
}

/// The main database handle.
///
/// `SkipDB` is cheaply clonable (`Arc`-based) and `Send + Sync`.
#[derive(Clone)]
pub struct SkipDB {
    pub(crate) inner: Arc<DatabaseInner>,
}

fn wal_path(path: &Path) -> PathBuf {
    path.with_extension("wal")
}

/// The document pointer of a non-sentinel node.
pub(crate) fn data_block_of(node: &IndexNode) -> Result<DataBlockId, EncodingError> {
    node.data_block.ok_or_else(|| {
        EncodingError::MalformedNode(format!("node {} has no data block", node.position))
    })
}

impl SkipDB {
    /// Create a new database at the given path with default options.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::create_with_options(path, DatabaseOptions::default())
    }

    pub fn create_with_options(
        path: impl AsRef<Path>,
        options: DatabaseOptions,
    ) -> Result<Self, Error> {
        let path = path.as_ref();

        // 1. Acquire file lock.
        let file_lock = FileLock::exclusive(&path.with_extension("lock"))?;

        // 2. Create the database file with initial headers, and an empty log.
        let (file_manager, header) = FileManager::create(path)?;
        let mut wal = WriteAheadLog::open(&wal_path(path))?;
        wal.truncate()?;

        // 3. Build the empty catalog in a transaction store.
        let file = file_manager
            .file()
            .try_clone()
            .map_err(StorageError::from)?;
        let mut store = TxnPageStore::new(file, header.total_page_count, wal.reader()?);
        let catalog_root = catalog_ops::initialize(&mut store, options.collation)?;

        // 4. Checkpoint. Both header slots hold the fresh header, so starting
        // from slot 1 makes the first real header land in slot 0.
        let mut state = DatabaseState {
            file_manager,
            header,
            header_slot: 1,
        };
        let total = store.next_page_id();
        state.checkpoint(1, total, catalog_root, store.drain_dirty(), true)?;

        let read_file = state
            .file_manager
            .file()
            .try_clone()
            .map_err(StorageError::from)?;

        Ok(Self::from_parts(state, wal, read_file, options, file_lock, path))
    }

    /// Open an existing database with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_with_options(path, DatabaseOptions::default())
    }

    /// Open an existing database, replaying committed transactions left in
    /// the write-ahead log.
    ///
    /// `options.collation` is ignored: the file keeps the collation it was
    /// created with.
    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: DatabaseOptions,
    ) -> Result<Self, Error> {
        let path = path.as_ref();
        let file_lock = FileLock::exclusive(&path.with_extension("lock"))?;

        let (file_manager, header, header_slot) = FileManager::open(path)?;
        let mut state = DatabaseState {
            file_manager,
            header,
            header_slot,
        };

        let mut wal = WriteAheadLog::open(&wal_path(path))?;
        if !wal.is_empty() {
            let reader = wal.reader()?;
            for txn in wal.recover()? {
                if txn.txn_id <= state.header.txn_counter {
                    debug!(txn_id = txn.txn_id, "logged transaction already checkpointed");
                    continue;
                }
                let pages = txn
                    .pages
                    .iter()
                    .map(|(&page_id, &offset)| Ok((page_id, reader.read_page_at(offset)?)))
                    .collect::<Result<Vec<_>, StorageError>>()?;
                let written = state.checkpoint(
                    txn.txn_id,
                    txn.total_page_count,
                    txn.catalog_root_page,
                    pages,
                    true,
                )?;
                info!(
                    txn_id = txn.txn_id,
                    pages = written,
                    "replayed committed transaction from write-ahead log"
                );
            }
            wal.truncate()?;
        }

        let read_file = state
            .file_manager
            .file()
            .try_clone()
            .map_err(StorageError::from)?;

        Ok(Self::from_parts(state, wal, read_file, options, file_lock, path))
    }

    fn from_parts(
        state: DatabaseState,
        wal: WriteAheadLog,
        read_file: File,
        options: DatabaseOptions,
        file_lock: FileLock,
        path: &Path,
    ) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                state: RwLock::new(state),
                wal: Mutex::new(wal),
                locks: Arc::new(LockManager::new()),
                read_file,
                options,
                needs_recovery: AtomicBool::new(false),
                _file_lock: file_lock,
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.inner.options
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Begin a write transaction over `collections`.
    ///
    /// The catalog is always locked as well. Blocks until every lock is free,
    /// or fails with a concurrency error once `lock_timeout_ms` expires.
    pub fn begin_transaction(&self, collections: &[CollectionId]) -> Result<Transaction, Error> {
        self.check_recovered()?;
        let mut ids = collections.to_vec();
        ids.push(CATALOG_COLLECTION_ID);
        let locks = self
            .inner
            .locks
            .acquire(&ids, self.inner.options.lock_timeout_duration())?;
        // A commit that failed while this call waited for the locks.
        self.check_recovered()?;

        let (file, total_pages, catalog_root, txn_id) = {
            let state = self.inner.state.read();
            let file = state
                .file_manager
                .file()
                .try_clone()
                .map_err(StorageError::from)?;
            (
                file,
                state.header.total_page_count,
                state.header.catalog_root_page,
                state.header.txn_counter + 1,
            )
        };

        let wal_reader = self.inner.wal.lock().reader()?;
        let store = TxnPageStore::new(file, total_pages, wal_reader);
        let catalog = catalog_ops::load(&store, catalog_root)?;

        Ok(Transaction {
            db: self.clone(),
            store,
            catalog,
            catalog_root,
            catalog_dirty: false,
            txn_id,
            locks,
            safepoints: 0,
            finished: false,
        })
    }

    /// Run `f` in a transaction and commit it if `f` succeeds.
    pub(crate) fn transact<F, R>(&self, collections: &[CollectionId], f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Transaction) -> Result<R, Error>,
    {
        let mut txn = self.begin_transaction(collections)?;
        let value = f(&mut txn)?;
        txn.commit()?;
        Ok(value)
    }

    pub(crate) fn commit_txn(&self, txn: &mut Transaction) -> Result<(), Error> {
        if txn.catalog_dirty {
            txn.persist_catalog()?;
        }
        if txn.store.dirty_count() == 0 && txn.store.flushed().is_empty() {
            txn.finished = true;
            return Ok(());
        }
        let sync = self.inner.options.sync_mode == SyncMode::Full;

        let mut wal = self.inner.wal.lock();
        let (total, pages) = self.log_commit(txn, &mut wal, sync)?;

        let checkpointed = {
            let mut state = self.inner.state.write();
            state.checkpoint(txn.txn_id, total, txn.catalog_root, pages, sync)
        };
        let written = match checkpointed {
            Ok(written) => written,
            Err(e) => {
                self.require_recovery(txn.txn_id, &e);
                return Err(e.into());
            }
        };
        wal.truncate()?;
        debug!(txn_id = txn.txn_id, pages = written, "transaction committed");
        Ok(())
    }

    /// Append the remaining dirty pages and the commit record of `txn`.
    /// Returns the new page count and every page the transaction wrote.
    ///
    /// Once this succeeds the transaction is durable: `txn` is marked
    /// finished and the log must survive until a checkpoint applies it.
    fn log_commit(
        &self,
        txn: &mut Transaction,
        wal: &mut WriteAheadLog,
        sync: bool,
    ) -> Result<(u64, BTreeMap<PageId, [u8; PAGE_SIZE]>), Error> {
        let dirty = txn.store.drain_dirty();
        let total = txn.store.next_page_id();
        let mut pages = BTreeMap::new();
        for (&page_id, &offset) in txn.store.flushed() {
            pages.insert(page_id, txn.store.read_flushed(offset)?);
        }
        for (page_id, buf) in dirty {
            wal.append_page(txn.txn_id, page_id, &buf)?;
            pages.insert(page_id, buf);
        }
        wal.append_commit(txn.txn_id, total, txn.catalog_root)?;
        if sync {
            wal.sync()?;
        }
        txn.finished = true;
        Ok((total, pages))
    }

    /// A committed transaction could not be applied to the data file. The
    /// in-memory header no longer describes what is durable, so the handle
    /// refuses further work until the log is replayed on reopen.
    fn require_recovery(&self, txn_id: TxnId, cause: &StorageError) {
        self.inner.needs_recovery.store(true, Ordering::Release);
        error!(txn_id, error = %cause, "checkpoint failed; reopen the database to recover");
    }

    fn check_recovered(&self) -> Result<(), StorageError> {
        if self.inner.needs_recovery.load(Ordering::Acquire) {
            return Err(StorageError::RecoveryRequired);
        }
        Ok(())
    }

    /// Run `f` against the committed pages and catalog.
    ///
    /// Holds the state lock shared for the duration of `f`, so a checkpoint
    /// cannot rewrite pages underneath it.
    pub(crate) fn read_snapshot<F, R>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&FilePageStore, &Catalog) -> Result<R, Error>,
    {
        let state = self.inner.state.read();
        self.check_recovered()?;
        let file = self
            .inner
            .read_file
            .try_clone()
            .map_err(StorageError::from)?;
        let store = FilePageStore::new(file, state.header.total_page_count);
        let catalog = catalog_ops::load(&store, state.header.catalog_root_page)?;
        f(&store, &catalog)
    }

    /// The committed catalog.
    pub fn read_catalog(&self) -> Result<Catalog, Error> {
        self.read_snapshot(|_, catalog| Ok(catalog.clone()))
    }

    fn collection_id(&self, collection: &str) -> Result<CollectionId, Error> {
        self.read_snapshot(|_, catalog| Ok(catalog.collection(collection)?.col_id))
    }

    // -----------------------------------------------------------------------
    // Collections and documents
    // -----------------------------------------------------------------------

    /// Create an empty collection. Returns its id.
    pub fn create_collection(&self, name: &str) -> Result<CollectionId, Error> {
        validate_collection_name(name)?;
        self.transact(&[], |txn| {
            let (store, catalog) = txn.parts_mut();
            Ok(catalog_ops::create_collection(store, catalog, name)?.col_id)
        })
    }

    pub fn list_collections(&self) -> Result<Vec<String>, Error> {
        self.read_snapshot(|_, catalog| Ok(catalog.collections.keys().cloned().collect()))
    }

    /// Insert a document and add its keys to every index of the collection.
    ///
    /// The document's nodes are chained from its primary-key node in index
    /// slot order.
    pub fn insert(&self, collection: &str, doc: Value) -> Result<(), Error> {
        let pk = document::primary_key(&doc)?;
        let col_id = self.collection_id(collection)?;

        self.transact(&[col_id], |txn| {
            let collation = txn.catalog.collation;
            let (store, catalog) = txn.parts_mut();
            let col = catalog.collection_mut(collection)?;

            let pk_index = col.pk.clone();
            let mut secondary = Vec::with_capacity(col.indexes.len());
            for index in &col.indexes {
                let keys = expr::parse(&index.expression)?.evaluate_keys(&doc, collation)?;
                secondary.push((index.clone(), keys));
            }

            let block = document::insert_document(store, col, &doc)?;
            col.document_count += 1;

            let mut service = IndexService::new(col, collation);
            let mut last = service.add_node(store, &pk_index, pk, block, None)?.node;
            for (index, keys) in secondary {
                for key in keys {
                    last = service
                        .add_node(store, &index, key, block, Some(&mut last))?
                        .node;
                }
            }
            Ok(())
        })
    }

    /// Fetch a document by `_id`.
    pub fn get(&self, collection: &str, id: &Value) -> Result<Option<Value>, Error> {
        let key = IndexKey::from_json(id)?;
        self.read_snapshot(|store, catalog| {
            let col = catalog.collection(collection)?;
            match find_node(store, &col.pk, catalog.collation, &key)? {
                Some(node) => Ok(Some(document::read_document(store, data_block_of(&node)?)?)),
                None => Ok(None),
            }
        })
    }

    /// Delete a document by `_id` together with all of its index nodes.
    /// Returns whether the document existed.
    pub fn delete(&self, collection: &str, id: &Value) -> Result<bool, Error> {
        let key = IndexKey::from_json(id)?;
        let col_id = self.collection_id(collection)?;

        self.transact(&[col_id], |txn| {
            let collation = txn.catalog.collation;
            let (store, catalog) = txn.parts_mut();
            let col = catalog.collection_mut(collection)?;

            let Some(pk_node) = find_node(&*store, &col.pk, collation, &key)? else {
                return Ok(false);
            };
            let block = data_block_of(&pk_node)?;
            IndexService::new(col, collation).delete_document_nodes(store, pk_node.position)?;
            document::delete_document(store, col, block)?;
            col.document_count = col.document_count.saturating_sub(1);
            Ok(true)
        })
    }

    // -----------------------------------------------------------------------
    // Indexes
    // -----------------------------------------------------------------------

    /// Start building a secondary index on `collection`.
    pub fn create_index(&self, collection: &str) -> CreateIndexBuilder<'_> {
        CreateIndexBuilder::new(self, collection.to_string())
    }

    /// Documents whose `index` key equals `key`, in index order.
    pub fn find_by_index(
        &self,
        collection: &str,
        index: &str,
        key: &Value,
    ) -> Result<Vec<Value>, Error> {
        let key = IndexKey::from_json(key)?;
        self.read_snapshot(|store, catalog| {
            let index = catalog.collection(collection)?.require_index(index)?;
            find_all(store, index, catalog.collation, &key)?
                .iter()
                .map(|node| document::read_document(store, data_block_of(node)?))
                .collect()
        })
    }

    /// Every key of `index` in level-0 order, as JSON.
    pub fn index_keys(&self, collection: &str, index: &str) -> Result<Vec<Value>, Error> {
        self.read_snapshot(|store, catalog| {
            let index = catalog.collection(collection)?.require_index(index)?;
            Ok(scan(store, index)?
                .into_iter()
                .map(|node| node.key.to_json())
                .collect())
        })
    }

    /// Verify ordering, link symmetry and uniqueness of `index`.
    pub fn check_index(&self, collection: &str, index: &str) -> Result<IndexIntegrity, Error> {
        self.read_snapshot(|store, catalog| {
            let index = catalog.collection(collection)?.require_index(index)?;
            check_integrity(store, index, catalog.collation)
        })
    }

    /// Secondary indexes of `collection`, ordered by slot.
    pub fn list_indexes(&self, collection: &str) -> Result<Vec<IndexDescriptor>, Error> {
        self.read_snapshot(|_, catalog| Ok(catalog.collection(collection)?.indexes.clone()))
    }

    pub fn describe_index(&self, collection: &str, index: &str) -> Result<IndexDescriptor, Error> {
        self.read_snapshot(|_, catalog| {
            Ok(catalog.collection(collection)?.require_index(index)?.clone())
        })
    }
}
