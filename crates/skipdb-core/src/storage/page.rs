use crate::error::StorageError;
use crate::types::{CollectionId, PAGE_SIZE, PageId};
use xxhash_rust::xxh64::Xxh64;

/// Byte range for the page header checksum computation: bytes 20..4096.
const CHECKSUM_START: usize = 20;

/// Discriminant values for page types stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PageType {
    Header = 0,
    Catalog = 1,
    Index = 2,
    Data = 3,
}

impl PageType {
    /// Convert a u32 discriminant to a `PageType`.
    pub fn from_u32(value: u32) -> Result<Self, StorageError> {
        match value {
            0 => Ok(PageType::Header),
            1 => Ok(PageType::Catalog),
            2 => Ok(PageType::Index),
            3 => Ok(PageType::Data),
            other => Err(StorageError::CorruptedPage(format!(
                "invalid page type discriminant: {other}"
            ))),
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Read a little-endian u16 at `at`.
pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

/// Read a little-endian u32 at `at`.
pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(raw)
}

/// Read a little-endian u64 at `at`.
pub(crate) fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// A fixed-size page backed by a `[u8; PAGE_SIZE]` buffer.
///
/// Common page header layout (first 32 bytes):
/// ```text
/// [0..4]   page_type: u32 (little-endian)
/// [4..12]  page_id: u64 (little-endian)
/// [12..20] xxhash64 checksum (of bytes 0..12 + 20..4096)
/// [20..24] entry_count: u32 (little-endian)
/// [24..28] free_space_offset: u32 (little-endian)
/// [28..32] collection_id: u32 (owner of the cells on this page)
/// ```
#[derive(Clone)]
pub struct Page {
    buf: [u8; PAGE_SIZE],
    page_id: PageId,
}

impl Page {
    /// Create a fresh page with the header initialised.
    pub fn new(page_id: PageId, page_type: PageType, collection_id: CollectionId) -> Self {
        let mut buf = [0u8; PAGE_SIZE];
        buf[0..4].copy_from_slice(&page_type.as_u32().to_le_bytes());
        buf[4..12].copy_from_slice(&page_id.to_le_bytes());
        // free_space_offset = PAGE_SIZE (no cells allocated yet)
        buf[24..28].copy_from_slice(&(PAGE_SIZE as u32).to_le_bytes());
        buf[28..32].copy_from_slice(&collection_id.to_le_bytes());
        Self { buf, page_id }
    }

    /// Wrap an existing raw page buffer.
    pub fn from_bytes(data: [u8; PAGE_SIZE], page_id: PageId) -> Self {
        Self { buf: data, page_id }
    }

    /// Read and validate the page type from the header.
    pub fn page_type(&self) -> Result<PageType, StorageError> {
        PageType::from_u32(read_u32(&self.buf, 0))
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn entry_count(&self) -> u32 {
        read_u32(&self.buf, 20)
    }

    pub fn set_entry_count(&mut self, count: u32) {
        self.buf[20..24].copy_from_slice(&count.to_le_bytes());
    }

    pub fn free_space_offset(&self) -> u32 {
        read_u32(&self.buf, 24)
    }

    pub fn set_free_space_offset(&mut self, offset: u32) {
        self.buf[24..28].copy_from_slice(&offset.to_le_bytes());
    }

    pub fn collection_id(&self) -> CollectionId {
        read_u32(&self.buf, 28)
    }

    /// Raw buffer access (read-only).
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.buf
    }

    /// Raw buffer access (mutable).
    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.buf
    }

    pub fn into_bytes(self) -> [u8; PAGE_SIZE] {
        self.buf
    }
}

/// Compute checksum for a raw page buffer, covering page_type, page_id, and data.
///
/// Hashes bytes `[0..12] + [20..PAGE_SIZE]`, skipping the checksum field at `[12..20]`.
pub fn compute_checksum_buf(buf: &[u8; PAGE_SIZE]) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.update(&buf[0..12]);
    hasher.update(&buf[CHECKSUM_START..PAGE_SIZE]);
    hasher.digest()
}

/// Compute and write the checksum into a raw page buffer at `[12..20]`.
pub fn write_checksum_buf(buf: &mut [u8; PAGE_SIZE]) {
    let cs = compute_checksum_buf(buf);
    buf[12..20].copy_from_slice(&cs.to_le_bytes());
}

/// Verify a raw page buffer's checksum and page_id consistency.
pub fn verify_page_integrity(
    buf: &[u8; PAGE_SIZE],
    expected_page_id: PageId,
) -> Result<(), StorageError> {
    let stored_page_id = read_u64(buf, 4);
    if stored_page_id != expected_page_id {
        return Err(StorageError::CorruptedPage(format!(
            "page_id mismatch: expected {expected_page_id}, found {stored_page_id}"
        )));
    }
    let stored = read_u64(buf, 12);
    let computed = compute_checksum_buf(buf);
    if stored != computed {
        return Err(StorageError::CorruptedPage(format!(
            "checksum mismatch on page {expected_page_id}: stored={stored:#018x}, computed={computed:#018x}"
        )));
    }
    Ok(())
}
