use crate::error::StorageError;
use crate::types::{CATALOG_ROOT_PAGE, PAGE_SIZE, PageId};
use xxhash_rust::xxh64::xxh64;

use super::page::{read_u32, read_u64};

/// Magic bytes identifying a SkipDB database file.
pub const MAGIC: &[u8; 4] = b"SKDB";

/// Current file format version.
pub const VERSION: u32 = 1;

/// Header checksum covers bytes `[0..36]` and is stored right after them.
const CHECKSUM_OFFSET: usize = 36;

/// Double-buffered file header for crash-safe metadata updates.
///
/// Header layout (within a 4096-byte page):
/// ```text
/// [0..4]   magic: "SKDB"
/// [4..8]   version: u32 (1) little-endian
/// [8..12]  page_size: u32 (4096) little-endian
/// [12..20] txn_counter: u64 little-endian
/// [20..28] catalog_root_page: u64 little-endian
/// [28..36] total_page_count: u64 little-endian
/// [36..44] xxhash64 checksum (of bytes 0..36) little-endian
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub txn_counter: u64,
    pub catalog_root_page: PageId,
    pub total_page_count: u64,
}

impl FileHeader {
    /// Header of a freshly created file. `total_page_count` starts at 2 (the
    /// two header pages themselves); the catalog root is written by the first
    /// commit.
    pub fn new() -> Self {
        Self {
            txn_counter: 0,
            catalog_root_page: CATALOG_ROOT_PAGE,
            total_page_count: 2,
        }
    }

    /// Parse a header from a raw page buffer, validating magic, version, and checksum.
    pub fn from_page(page_data: &[u8; PAGE_SIZE]) -> Result<Self, StorageError> {
        if &page_data[0..4] != MAGIC {
            return Err(StorageError::InvalidMagic);
        }

        let stored_checksum = read_u64(page_data, CHECKSUM_OFFSET);
        let computed_checksum = xxh64(&page_data[..CHECKSUM_OFFSET], 0);
        if stored_checksum != computed_checksum {
            return Err(StorageError::CorruptedPage(format!(
                "header checksum mismatch: stored={stored_checksum:#018x}, computed={computed_checksum:#018x}"
            )));
        }

        let version = read_u32(page_data, 4);
        if version != VERSION {
            return Err(StorageError::UnsupportedVersion(version));
        }

        Ok(Self {
            txn_counter: read_u64(page_data, 12),
            catalog_root_page: read_u64(page_data, 20),
            total_page_count: read_u64(page_data, 28),
        })
    }

    /// Serialize this header into a page buffer, including magic, version,
    /// page_size, and the trailing checksum.
    pub fn write_to_page(&self, buf: &mut [u8; PAGE_SIZE]) {
        buf.fill(0);
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&(PAGE_SIZE as u32).to_le_bytes());
        buf[12..20].copy_from_slice(&self.txn_counter.to_le_bytes());
        buf[20..28].copy_from_slice(&self.catalog_root_page.to_le_bytes());
        buf[28..36].copy_from_slice(&self.total_page_count.to_le_bytes());
        let checksum = xxh64(&buf[..CHECKSUM_OFFSET], 0);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 8].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Given two header page buffers, return the valid one with the higher
    /// `txn_counter` and which slot (0 or 1) it came from.
    pub fn select_current(
        header_a: &[u8; PAGE_SIZE],
        header_b: &[u8; PAGE_SIZE],
    ) -> Result<(FileHeader, u8), StorageError> {
        match (Self::from_page(header_a), Self::from_page(header_b)) {
            (Ok(ha), Ok(hb)) => {
                if ha.txn_counter >= hb.txn_counter {
                    Ok((ha, 0))
                } else {
                    Ok((hb, 1))
                }
            }
            (Ok(ha), Err(_)) => Ok((ha, 0)),
            (Err(_), Ok(hb)) => Ok((hb, 1)),
            (Err(e), Err(_)) => Err(e),
        }
    }

    /// Return the other header slot: 0 becomes 1, 1 becomes 0.
    pub fn alternate_slot(current_slot: u8) -> u8 {
        if current_slot == 0 { 1 } else { 0 }
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}
