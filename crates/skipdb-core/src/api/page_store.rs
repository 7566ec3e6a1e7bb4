use std::collections::HashMap;
use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::error::StorageError;
use crate::storage::PageStore;
use crate::storage::page::{Page, PageType, verify_page_integrity};
use crate::storage::wal::WalReader;
use crate::types::{CollectionId, PAGE_SIZE, PageId};

fn read_committed(file: &File, page_id: PageId, total_pages: u64) -> Result<Page, StorageError> {
    if page_id >= total_pages {
        return Err(StorageError::PageOutOfBounds {
            page_id,
            total_pages,
        });
    }
    let mut buf = [0u8; PAGE_SIZE];
    file.read_exact_at(&mut buf, page_id * PAGE_SIZE as u64)
        .map_err(StorageError::Io)?;
    // Header pages 0 and 1 carry their own checksum scheme.
    if page_id >= 2 {
        verify_page_integrity(&buf, page_id)?;
    }
    Ok(Page::from_bytes(buf, page_id))
}

/// A read-only [`PageStore`] over the committed pages of the data file.
///
/// Uses `pread` so the file handle can be shared across threads.
pub struct FilePageStore {
    file: File,
    total_page_count: u64,
}

impl FilePageStore {
    pub fn new(file: File, total_page_count: u64) -> Self {
        Self {
            file,
            total_page_count,
        }
    }
}

impl PageStore for FilePageStore {
    fn read_page(&self, page_id: PageId) -> Result<Page, StorageError> {
        read_committed(&self.file, page_id, self.total_page_count)
    }

    fn write_page(&mut self, _page: Page) -> Result<(), StorageError> {
        Err(StorageError::CorruptedPage(
            "FilePageStore is read-only".to_string(),
        ))
    }

    fn allocate_page(
        &mut self,
        _page_type: PageType,
        _collection_id: CollectionId,
    ) -> Result<Page, StorageError> {
        Err(StorageError::CorruptedPage(
            "FilePageStore is read-only".to_string(),
        ))
    }
}

/// The [`PageStore`] of a write transaction.
///
/// Writes accumulate in an in-memory overlay. A safepoint moves the overlay
/// into the write-ahead log with [`TxnPageStore::drain_dirty`] and
/// [`TxnPageStore::mark_flushed`]; reads of those pages are then served from
/// the log. Nothing reaches the data file before commit.
pub struct TxnPageStore {
    file: File,
    overlay: HashMap<PageId, [u8; PAGE_SIZE]>,
    /// Log offset of the latest image of each page flushed by a safepoint.
    flushed: HashMap<PageId, u64>,
    wal: WalReader,
    next_page_id: PageId,
    file_total_pages: u64,
}

impl TxnPageStore {
    /// `total_page_count` is the number of committed pages; new allocations
    /// start there.
    pub fn new(file: File, total_page_count: u64, wal: WalReader) -> Self {
        Self {
            file,
            overlay: HashMap::new(),
            flushed: HashMap::new(),
            wal,
            next_page_id: total_page_count,
            file_total_pages: total_page_count,
        }
    }

    /// Pages modified since the last safepoint.
    pub fn dirty_count(&self) -> usize {
        self.overlay.len()
    }

    /// Page id the next allocation will use. Also the page count the file
    /// has once this transaction commits.
    pub fn next_page_id(&self) -> PageId {
        self.next_page_id
    }

    /// Remove and return the dirty pages, ordered by page id.
    pub fn drain_dirty(&mut self) -> Vec<(PageId, [u8; PAGE_SIZE])> {
        let mut pages: Vec<_> = self.overlay.drain().collect();
        pages.sort_unstable_by_key(|(page_id, _)| *page_id);
        pages
    }

    /// Record that the latest image of `page_id` lives at `offset` in the log.
    pub fn mark_flushed(&mut self, page_id: PageId, offset: u64) {
        self.flushed.insert(page_id, offset);
    }

    /// Pages that were flushed by a safepoint, with their log offsets.
    pub fn flushed(&self) -> &HashMap<PageId, u64> {
        &self.flushed
    }

    pub fn read_flushed(&self, offset: u64) -> Result<[u8; PAGE_SIZE], StorageError> {
        self.wal.read_page_at(offset)
    }
}

impl PageStore for TxnPageStore {
    fn read_page(&self, page_id: PageId) -> Result<Page, StorageError> {
        if let Some(buf) = self.overlay.get(&page_id) {
            return Ok(Page::from_bytes(*buf, page_id));
        }
        if let Some(&offset) = self.flushed.get(&page_id) {
            return Ok(Page::from_bytes(self.wal.read_page_at(offset)?, page_id));
        }
        read_committed(&self.file, page_id, self.file_total_pages)
    }

    fn write_page(&mut self, page: Page) -> Result<(), StorageError> {
        let page_id = page.page_id();
        self.overlay.insert(page_id, page.into_bytes());
        Ok(())
    }

    fn allocate_page(
        &mut self,
        page_type: PageType,
        collection_id: CollectionId,
    ) -> Result<Page, StorageError> {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        let page = Page::new(page_id, page_type, collection_id);
        self.overlay.insert(page_id, *page.data());
        Ok(page)
    }
}
