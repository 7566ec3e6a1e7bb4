//! Catalog persistence and collection creation.
//!
//! The catalog is JSON-serialized into a chain of `Catalog` pages starting at
//! the catalog root page. Each page holds a slice of the JSON bytes:
//!
//! ```text
//! [0..32]  common page header
//! [32..40] next_page: u64 (0 = end of chain)
//! [40..44] data_len: u32
//! [44]     last: u8 (1 = final slice of the catalog)
//! [48..]   data
//! ```
//!
//! Pages linked after the final slice are spares left by a catalog that
//! shrank. They stay in the chain and are reused when it grows again.

use crate::encoding::Collation;
use crate::error::{Error, SchemaError, StorageError};
use crate::index::node::create_head_tail;
use crate::storage::PageStore;
use crate::storage::page::{Page, PageType, read_u32, read_u64};
use crate::types::{CATALOG_COLLECTION_ID, PAGE_SIZE, PK_INDEX_SLOT, PageId};

use super::{Catalog, CollectionDescriptor, IndexDescriptor, validate_collection_name};

const NEXT_OFFSET: usize = 32;
const LEN_OFFSET: usize = 40;
const LAST_OFFSET: usize = 44;
const DATA_OFFSET: usize = 48;
const CHUNK_SIZE: usize = PAGE_SIZE - DATA_OFFSET;

/// Allocate the catalog root page and write an empty catalog into it.
/// Returns the root page id.
pub fn initialize(store: &mut impl PageStore, collation: Collation) -> Result<PageId, Error> {
    let root = store.allocate_page(PageType::Catalog, CATALOG_COLLECTION_ID)?;
    let root_id = root.page_id();
    persist(store, root_id, &Catalog::new(collation))?;
    Ok(root_id)
}

/// Read the catalog stored in the chain starting at `root`.
pub fn load(store: &impl PageStore, root: PageId) -> Result<Catalog, Error> {
    let mut bytes = Vec::new();
    let mut page_id = root;
    while page_id != 0 {
        let page = store.read_page(page_id)?;
        if page.page_type()? != PageType::Catalog {
            return Err(StorageError::CorruptedPage(format!(
                "page {page_id} in catalog chain is not a catalog page"
            ))
            .into());
        }
        let data = page.data();
        let len = (read_u32(data, LEN_OFFSET) as usize).min(CHUNK_SIZE);
        bytes.extend_from_slice(&data[DATA_OFFSET..DATA_OFFSET + len]);
        if data[LAST_OFFSET] == 1 {
            break;
        }
        page_id = read_u64(data, NEXT_OFFSET);
    }

    let catalog = serde_json::from_slice(&bytes).map_err(|e| {
        StorageError::CorruptedPage(format!("failed to deserialize catalog: {e}"))
    })?;
    Ok(catalog)
}

/// Write `catalog` into the chain starting at `root`, reusing existing chain
/// pages and allocating more as needed.
pub fn persist(store: &mut impl PageStore, root: PageId, catalog: &Catalog) -> Result<(), Error> {
    let bytes = serde_json::to_vec(catalog)
        .map_err(|e| StorageError::CorruptedPage(format!("failed to serialize catalog: {e}")))?;

    let chunks: Vec<&[u8]> = bytes.chunks(CHUNK_SIZE).collect();

    let mut page_id = root;
    for (i, chunk) in chunks.iter().enumerate() {
        let existing_next = match store.read_page(page_id) {
            Ok(page) => read_u64(page.data(), NEXT_OFFSET),
            Err(StorageError::PageOutOfBounds { .. }) => 0,
            Err(e) => return Err(e.into()),
        };
        let last = i + 1 == chunks.len();
        let next = if last || existing_next != 0 {
            existing_next
        } else {
            store
                .allocate_page(PageType::Catalog, CATALOG_COLLECTION_ID)?
                .page_id()
        };

        let mut page = Page::new(page_id, PageType::Catalog, CATALOG_COLLECTION_ID);
        let data = page.data_mut();
        data[NEXT_OFFSET..NEXT_OFFSET + 8].copy_from_slice(&next.to_le_bytes());
        data[LEN_OFFSET..LEN_OFFSET + 4].copy_from_slice(&(chunk.len() as u32).to_le_bytes());
        data[LAST_OFFSET] = u8::from(last);
        data[DATA_OFFSET..DATA_OFFSET + chunk.len()].copy_from_slice(chunk);
        store.write_page(page)?;
        page_id = next;
    }
    Ok(())
}

/// Register a new, empty collection and create its primary-key sentinels.
pub fn create_collection<'c>(
    store: &mut impl PageStore,
    catalog: &'c mut Catalog,
    name: &str,
) -> Result<&'c CollectionDescriptor, Error> {
    validate_collection_name(name)?;
    if catalog.collections.contains_key(name) {
        return Err(SchemaError::CollectionAlreadyExists(name.to_string()).into());
    }

    let col_id = catalog.last_collection_id + 1;
    let mut free_index_pages = Vec::new();
    let (head, tail) = create_head_tail(store, &mut free_index_pages, col_id, PK_INDEX_SLOT)?;

    catalog.last_collection_id = col_id;
    let descriptor = catalog
        .collections
        .entry(name.to_string())
        .or_insert(CollectionDescriptor {
            name: name.to_string(),
            col_id,
            pk: IndexDescriptor::primary_key(head, tail),
            indexes: Vec::new(),
            free_index_pages,
            free_data_pages: Vec::new(),
            document_count: 0,
        });
    Ok(descriptor)
}
