//! Storage engine: pages, slotted cells, file I/O, headers, write-ahead log, locking.

pub mod alloc;
pub mod file;
pub mod header;
pub mod lock;
pub mod page;
pub mod slotted;
pub mod wal;

use std::collections::HashMap;

use crate::error::StorageError;
use crate::types::{CollectionId, PAGE_SIZE, PageId};

use self::page::{Page, PageType};

/// Abstraction over page read/write/allocate.
///
/// Index, document and catalog code operates on in-memory `Page` values and
/// never does file I/O directly. Pages handed out by `read_page` are copies:
/// a modification is only visible to later reads after `write_page`.
pub trait PageStore {
    /// Read a page by ID.
    fn read_page(&self, page_id: PageId) -> Result<Page, StorageError>;
    /// Write (or buffer) a modified page.
    fn write_page(&mut self, page: Page) -> Result<(), StorageError>;
    /// Allocate a new, empty page owned by `collection_id`.
    fn allocate_page(
        &mut self,
        page_type: PageType,
        collection_id: CollectionId,
    ) -> Result<Page, StorageError>;
}

/// In-memory page store backed by a `HashMap`. Used for testing.
///
/// Page ids start at 2, matching the file layout where pages 0 and 1 hold
/// the file headers.
pub struct InMemoryPageStore {
    pages: HashMap<PageId, [u8; PAGE_SIZE]>,
    next_page_id: PageId,
}

impl InMemoryPageStore {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            next_page_id: 2,
        }
    }

    /// Number of page ids handed out so far, headers included.
    pub fn page_count(&self) -> u64 {
        self.next_page_id
    }
}

impl Default for InMemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for InMemoryPageStore {
    fn read_page(&self, page_id: PageId) -> Result<Page, StorageError> {
        let buf = self
            .pages
            .get(&page_id)
            .ok_or(StorageError::PageOutOfBounds {
                page_id,
                total_pages: self.next_page_id,
            })?;
        Ok(Page::from_bytes(*buf, page_id))
    }

    fn write_page(&mut self, page: Page) -> Result<(), StorageError> {
        let page_id = page.page_id();
        self.pages.insert(page_id, page.into_bytes());
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
        self.pages.insert(page_id, *page.data());
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store_allocate_and_read() {
        let mut store = InMemoryPageStore::new();
        let page = store.allocate_page(PageType::Index, 4).unwrap();
        assert_eq!(page.page_id(), 2);

        let read_back = store.read_page(2).unwrap();
        assert_eq!(read_back.page_type().unwrap(), PageType::Index);
        assert_eq!(read_back.collection_id(), 4);
        assert_eq!(store.page_count(), 3);
    }

    #[test]
    fn test_in_memory_store_write_and_read() {
        let mut store = InMemoryPageStore::new();
        let mut page = store.allocate_page(PageType::Data, 1).unwrap();
        let page_id = page.page_id();
        page.set_entry_count(42);
        store.write_page(page).unwrap();
        assert_eq!(store.read_page(page_id).unwrap().entry_count(), 42);
    }

    #[test]
    fn test_in_memory_store_read_nonexistent() {
        let store = InMemoryPageStore::new();
        assert!(matches!(
            store.read_page(999),
            Err(StorageError::PageOutOfBounds { page_id: 999, .. })
        ));
    }
}
