//! Cell allocation over a collection's free-page list.

use tracing::debug;

use crate::error::StorageError;
use crate::types::{CollectionId, MAX_CELL_SIZE, PageAddress, PageId};

use super::PageStore;
use super::page::PageType;
use super::slotted::{Fit, SlottedPage, SlottedPageRef};

/// How many pages from the tail of the free list are tried before a new page
/// is allocated.
const PROBE_LIMIT: usize = 8;

/// Pages with less total free space than this leave the free list.
const MIN_USEFUL_FREE: usize = 128;

/// Where a cell landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellAllocation {
    pub address: PageAddress,
    /// The page was defragmented to make room. Other cells on
    /// `address.page_id` may have moved inside the page.
    pub defragmented: bool,
}

/// Store `bytes` in a new cell of a `page_type` page owned by `collection_id`.
///
/// Probes up to [`PROBE_LIMIT`] pages from the tail of `free_pages`. A page
/// with enough contiguous space is used as is; a page with enough total space
/// is defragmented first. Pages that turn out too full are dropped from the
/// list. Falls back to a fresh page.
pub fn allocate_cell(
    store: &mut impl PageStore,
    free_pages: &mut Vec<PageId>,
    page_type: PageType,
    collection_id: CollectionId,
    bytes: &[u8],
) -> Result<CellAllocation, StorageError> {
    if bytes.len() > MAX_CELL_SIZE {
        return Err(StorageError::PageFull {
            page_id: 0,
            needed: bytes.len(),
        });
    }

    let mut probed = 0;
    let mut idx = free_pages.len();
    while idx > 0 && probed < PROBE_LIMIT {
        idx -= 1;
        probed += 1;
        let page_id = free_pages[idx];
        let mut page = store.read_page(page_id)?;

        let (fit, total_free) = {
            let view = SlottedPageRef::new(&page);
            (view.fit(bytes.len()), view.total_free())
        };
        let defragmented = match fit {
            Fit::Contiguous => false,
            Fit::AfterDefragment => true,
            Fit::No => {
                if total_free < MIN_USEFUL_FREE {
                    free_pages.remove(idx);
                }
                continue;
            }
        };

        let mut slotted = SlottedPage::new(&mut page);
        if defragmented {
            slotted.defragment();
            debug!(page_id, collection_id, "defragmented page for new cell");
        }
        let slot = slotted.insert(bytes)?;
        if slotted.view().total_free() < MIN_USEFUL_FREE {
            free_pages.remove(idx);
        }
        store.write_page(page)?;
        return Ok(CellAllocation {
            address: PageAddress::new(page_id, slot),
            defragmented,
        });
    }

    let mut page = store.allocate_page(page_type, collection_id)?;
    let page_id = page.page_id();
    let mut slotted = SlottedPage::new(&mut page);
    let slot = slotted.insert(bytes)?;
    if slotted.view().total_free() >= MIN_USEFUL_FREE {
        free_pages.push(page_id);
    }
    store.write_page(page)?;
    Ok(CellAllocation {
        address: PageAddress::new(page_id, slot),
        defragmented: false,
    })
}

/// Copy the bytes of the live cell at `address`.
pub fn read_cell(store: &impl PageStore, address: PageAddress) -> Result<Vec<u8>, StorageError> {
    let page = store.read_page(address.page_id)?;
    SlottedPageRef::new(&page)
        .cell(address.slot as usize)
        .map(<[u8]>::to_vec)
        .ok_or(StorageError::MissingCell(address))
}

/// Modify the live cell at `address` in place. The cell keeps its size.
pub fn update_cell<F>(store: &mut impl PageStore, address: PageAddress, f: F) -> Result<(), StorageError>
where
    F: FnOnce(&mut [u8]),
{
    let mut page = store.read_page(address.page_id)?;
    let mut slotted = SlottedPage::new(&mut page);
    let cell = slotted
        .cell_mut(address.slot as usize)
        .ok_or(StorageError::MissingCell(address))?;
    f(cell);
    store.write_page(page)
}

/// Free the cell at `address` and put its page back on `free_pages`.
pub fn free_cell(
    store: &mut impl PageStore,
    free_pages: &mut Vec<PageId>,
    address: PageAddress,
) -> Result<(), StorageError> {
    let mut page = store.read_page(address.page_id)?;
    let mut slotted = SlottedPage::new(&mut page);
    if slotted.view().cell(address.slot as usize).is_none() {
        return Err(StorageError::MissingCell(address));
    }
    slotted.remove(address.slot as usize);
    store.write_page(page)?;
    if !free_pages.contains(&address.page_id) {
        free_pages.push(address.page_id);
    }
    Ok(())
}
