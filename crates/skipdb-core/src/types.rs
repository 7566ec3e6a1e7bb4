//! Core types: page ids, cell addresses, collection ids, engine limits.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Page identifier (offset in units of PAGE_SIZE).
pub type PageId = u64;

/// Transaction identifier (monotonically increasing).
pub type TxnId = u64;

/// Stable identifier of a collection inside the page store.
pub type CollectionId = u32;

/// Size of every page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Size of the common page header in bytes.
pub const PAGE_HEADER_SIZE: usize = 32;

/// Size of a single slot entry in a slotted page (offset: u16 + length: u16).
pub const SLOT_SIZE: usize = 4;

/// Number of skip-list levels carried by index sentinels, and the upper
/// bound of secondary index slots per collection.
pub const MAX_LEVELS: u8 = 32;

/// Maximum length of an index name, in characters.
pub const MAX_INDEX_NAME_LENGTH: usize = 32;

/// Maximum length of a collection name, in characters.
pub const MAX_COLLECTION_NAME_LENGTH: usize = 60;

/// Maximum encoded size of a single index key.
pub const MAX_INDEX_KEY_LENGTH: usize = 1023;

/// Largest cell a slotted page can hold.
pub const MAX_CELL_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE - SLOT_SIZE;

/// Collection id reserved for the catalog itself. Every write transaction
/// locks it because page allocation mutates catalog metadata.
pub const CATALOG_COLLECTION_ID: CollectionId = 0;

/// The catalog chain always starts at the first page after the two headers.
pub const CATALOG_ROOT_PAGE: PageId = 2;

/// Slot of the primary-key index in every collection.
pub const PK_INDEX_SLOT: u8 = 0;

/// Name of the primary-key index and of the document field it indexes.
pub const PK_INDEX_NAME: &str = "_id";

/// Address of a cell: a page plus a slot within that page.
///
/// Addresses survive page defragmentation; only the byte offset of the cell
/// inside the page moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageAddress {
    pub page_id: PageId,
    pub slot: u16,
}

/// Address of an index node.
pub type IndexNodeId = PageAddress;

/// Address of a stored document.
pub type DataBlockId = PageAddress;

impl PageAddress {
    /// Encoded size: page_id (u64 LE) + slot (u16 LE).
    pub const SERIALIZED_SIZE: usize = 10;

    /// The "no address" marker. Page 0 is a header page and never holds cells.
    pub const EMPTY: PageAddress = PageAddress {
        page_id: 0,
        slot: 0,
    };

    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }

    pub fn is_empty(&self) -> bool {
        self.page_id == 0
    }

    /// Convert the empty marker to `None`.
    pub fn to_option(self) -> Option<PageAddress> {
        if self.is_empty() { None } else { Some(self) }
    }

    pub fn from_option(addr: Option<PageAddress>) -> Self {
        addr.unwrap_or(Self::EMPTY)
    }

    /// Write the address into `buf[..SERIALIZED_SIZE]`.
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.page_id.to_le_bytes());
        buf[8..10].copy_from_slice(&self.slot.to_le_bytes());
    }

    /// Read an address from `buf[..SERIALIZED_SIZE]`.
    pub fn read_from(buf: &[u8]) -> Self {
        let mut page = [0u8; 8];
        page.copy_from_slice(&buf[0..8]);
        Self {
            page_id: u64::from_le_bytes(page),
            slot: u16::from_le_bytes([buf[8], buf[9]]),
        }
    }
}

impl fmt::Display for PageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_bytes() {
        let addr = PageAddress::new(0x0102_0304_0506, 517);
        let mut buf = [0u8; PageAddress::SERIALIZED_SIZE];
        addr.write_to(&mut buf);
        assert_eq!(PageAddress::read_from(&buf), addr);
    }

    #[test]
    fn test_empty_address() {
        assert!(PageAddress::EMPTY.is_empty());
        assert_eq!(PageAddress::EMPTY.to_option(), None);
        assert_eq!(PageAddress::from_option(None), PageAddress::EMPTY);
        assert!(!PageAddress::new(5, 0).is_empty());
        assert_eq!(PageAddress::new(5, 0).to_string(), "5:0");
    }
}
