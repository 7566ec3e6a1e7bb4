use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::StorageError;
use crate::types::{PAGE_SIZE, PageId};

use super::header::FileHeader;

/// Low-level file I/O manager for the database file.
///
/// Provides page-granularity reads and writes using `pread`/`pwrite`
/// (via `FileExt::read_at` / `write_at`).
pub struct FileManager {
    file: File,
    total_page_count: u64,
}

impl FileManager {
    /// Create a new database file at `path` with two identical fresh header
    /// pages, fsynced.
    pub fn create(path: &Path) -> Result<(Self, FileHeader), StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let header = FileHeader::new();
        let mut buf = [0u8; PAGE_SIZE];
        header.write_to_page(&mut buf);
        file.write_all_at(&buf, 0)?;
        file.write_all_at(&buf, PAGE_SIZE as u64)?;
        file.sync_all()?;

        Ok((
            Self {
                file,
                total_page_count: header.total_page_count,
            },
            header,
        ))
    }

    /// Open an existing database file at `path`.
    ///
    /// Reads both header pages, selects the current valid one, and returns
    /// the manager together with the active header and its slot index.
    pub fn open(path: &Path) -> Result<(Self, FileHeader, u8), StorageError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut buf_a = [0u8; PAGE_SIZE];
        let mut buf_b = [0u8; PAGE_SIZE];
        file.read_exact_at(&mut buf_a, 0)?;
        file.read_exact_at(&mut buf_b, PAGE_SIZE as u64)?;

        let (header, slot) = FileHeader::select_current(&buf_a, &buf_b)?;
        let on_disk = file.metadata()?.len() / PAGE_SIZE as u64;

        Ok((
            Self {
                file,
                total_page_count: on_disk.max(header.total_page_count),
            },
            header,
            slot,
        ))
    }

    /// Read a full page from disk. Bounds-checked against `total_page_count`.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE], StorageError> {
        if page_id >= self.total_page_count {
            return Err(StorageError::PageOutOfBounds {
                page_id,
                total_pages: self.total_page_count,
            });
        }
        let mut buf = [0u8; PAGE_SIZE];
        self.file
            .read_exact_at(&mut buf, page_id * PAGE_SIZE as u64)?;
        Ok(buf)
    }

    /// Write a full page to disk. Allows writing at `page_id == total_page_count`
    /// (i.e. one past the end) to support growth, but not further.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<(), StorageError> {
        if page_id > self.total_page_count {
            return Err(StorageError::PageOutOfBounds {
                page_id,
                total_pages: self.total_page_count,
            });
        }
        self.file.write_all_at(data, page_id * PAGE_SIZE as u64)?;
        Ok(())
    }

    /// Serialize `header` into header slot 0 or 1.
    pub fn write_header(&self, slot: u8, header: &FileHeader) -> Result<(), StorageError> {
        let mut buf = [0u8; PAGE_SIZE];
        header.write_to_page(&mut buf);
        self.write_page(slot as PageId, &buf)
    }

    /// Grow the file to accommodate `new_total` pages.
    pub fn grow(&mut self, new_total: u64) -> Result<(), StorageError> {
        if new_total <= self.total_page_count {
            return Ok(());
        }
        self.file.set_len(new_total * PAGE_SIZE as u64)?;
        self.total_page_count = new_total;
        Ok(())
    }

    /// Fsync the underlying file.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn total_page_count(&self) -> u64 {
        self.total_page_count
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}
