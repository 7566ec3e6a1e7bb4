//! Write-ahead log for transaction pages.
//!
//! A write transaction appends its dirty pages here before they touch the
//! data file: at every safepoint, and once more at commit followed by a commit
//! record. After the checkpoint has applied the pages in place the log is
//! truncated. On open, committed transactions still present in the log are
//! replayed; anything after the last commit record is discarded.
//!
//! Record format:
//! ```text
//! [0]      kind: u8 (1 = page, 2 = commit)
//! [1..9]   txn_id: u64 LE
//! [9..17]  page_id: u64 LE (0 for commit records)
//! [17..]   payload: PAGE_SIZE bytes (page) or 16 bytes (commit:
//!          total_page_count u64 LE, catalog_root_page u64 LE)
//! [..+8]   xxhash64 of everything above
//! ```

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::warn;
use xxhash_rust::xxh64::xxh64;

use crate::error::StorageError;
use crate::types::{PAGE_SIZE, PageId, TxnId};

use super::page::read_u64;

const RECORD_HEADER_SIZE: usize = 17;
const CHECKSUM_SIZE: usize = 8;
const COMMIT_PAYLOAD_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordKind {
    Page = 1,
    Commit = 2,
}

impl RecordKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordKind::Page),
            2 => Some(RecordKind::Commit),
            _ => None,
        }
    }

    fn payload_size(self) -> usize {
        match self {
            RecordKind::Page => PAGE_SIZE,
            RecordKind::Commit => COMMIT_PAYLOAD_SIZE,
        }
    }
}

/// A transaction whose commit record made it into the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredTxn {
    pub txn_id: TxnId,
    pub total_page_count: u64,
    pub catalog_root_page: PageId,
    /// Latest log offset of every page written by the transaction.
    pub pages: BTreeMap<PageId, u64>,
}

/// Append-only log file next to the database (`<db>.wal`).
pub struct WriteAheadLog {
    file: File,
    path: PathBuf,
    len: u64,
    /// A commit record was appended since the last truncate.
    committed: bool,
}

impl WriteAheadLog {
    /// Open or create the log at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the log holds a commit record that has not been checkpointed.
    /// Such a log must only be cleared by a checkpoint or by recovery.
    pub fn holds_commit(&self) -> bool {
        self.committed
    }

    fn append(
        &mut self,
        kind: RecordKind,
        txn_id: TxnId,
        page_id: PageId,
        payload: &[u8],
    ) -> Result<u64, StorageError> {
        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
        record.push(kind as u8);
        record.extend_from_slice(&txn_id.to_le_bytes());
        record.extend_from_slice(&page_id.to_le_bytes());
        record.extend_from_slice(payload);
        let checksum = xxh64(&record, 0);
        record.extend_from_slice(&checksum.to_le_bytes());

        let start = self.len;
        self.file.write_all_at(&record, start)?;
        self.len += record.len() as u64;
        Ok(start + RECORD_HEADER_SIZE as u64)
    }

    /// Append a page image. Returns the log offset of the page payload.
    pub fn append_page(
        &mut self,
        txn_id: TxnId,
        page_id: PageId,
        data: &[u8; PAGE_SIZE],
    ) -> Result<u64, StorageError> {
        self.append(RecordKind::Page, txn_id, page_id, data)
    }

    /// Append the commit record that makes every earlier page of `txn_id` durable.
    pub fn append_commit(
        &mut self,
        txn_id: TxnId,
        total_page_count: u64,
        catalog_root_page: PageId,
    ) -> Result<(), StorageError> {
        let mut payload = [0u8; COMMIT_PAYLOAD_SIZE];
        payload[0..8].copy_from_slice(&total_page_count.to_le_bytes());
        payload[8..16].copy_from_slice(&catalog_root_page.to_le_bytes());
        self.append(RecordKind::Commit, txn_id, 0, &payload)?;
        self.committed = true;
        Ok(())
    }

    pub fn sync(&self) -> Result<(), StorageError> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Drop every record. Used after a checkpoint and on abort.
    pub fn truncate(&mut self) -> Result<(), StorageError> {
        self.file.set_len(0)?;
        self.len = 0;
        self.committed = false;
        Ok(())
    }

    /// A read handle for page payloads written by the current transaction.
    pub fn reader(&self) -> Result<WalReader, StorageError> {
        Ok(WalReader {
            file: self.file.try_clone()?,
        })
    }

    /// Scan the log and return every committed transaction, in log order.
    ///
    /// A torn or corrupted record ends the scan. Page records not followed by
    /// a commit record for their transaction are discarded.
    pub fn recover(&self) -> Result<Vec<RecoveredTxn>, StorageError> {
        let mut committed = Vec::new();
        let mut pending: BTreeMap<TxnId, BTreeMap<PageId, u64>> = BTreeMap::new();
        let mut offset = 0u64;

        while offset < self.len {
            match self.read_record(offset) {
                Ok((kind, txn_id, page_id, next)) => {
                    match kind {
                        RecordKind::Page => {
                            pending
                                .entry(txn_id)
                                .or_default()
                                .insert(page_id, offset + RECORD_HEADER_SIZE as u64);
                        }
                        RecordKind::Commit => {
                            let payload = self.read_commit_payload(offset)?;
                            committed.push(RecoveredTxn {
                                txn_id,
                                total_page_count: read_u64(&payload, 0),
                                catalog_root_page: read_u64(&payload, 8),
                                pages: pending.remove(&txn_id).unwrap_or_default(),
                            });
                        }
                    }
                    offset = next;
                }
                Err(e) => {
                    warn!(offset, error = %e, "write-ahead log ends in a torn record");
                    break;
                }
            }
        }

        for (txn_id, pages) in &pending {
            warn!(txn_id, pages = pages.len(), "discarding uncommitted log records");
        }
        Ok(committed)
    }

    /// Validate the record at `offset`. Returns its kind, txn, page id and
    /// the offset of the next record.
    fn read_record(&self, offset: u64) -> Result<(RecordKind, TxnId, PageId, u64), StorageError> {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        read_exact_or_torn(&self.file, &mut header, offset)?;
        let kind = RecordKind::from_u8(header[0]).ok_or_else(|| {
            StorageError::CorruptedWal(format!("unknown record kind {} at {offset}", header[0]))
        })?;

        let body_len = RECORD_HEADER_SIZE + kind.payload_size();
        let mut record = vec![0u8; body_len + CHECKSUM_SIZE];
        read_exact_or_torn(&self.file, &mut record, offset)?;
        let stored = read_u64(&record, body_len);
        let computed = xxh64(&record[..body_len], 0);
        if stored != computed {
            return Err(StorageError::CorruptedWal(format!(
                "checksum mismatch at {offset}: stored={stored:#018x}, computed={computed:#018x}"
            )));
        }

        Ok((
            kind,
            read_u64(&header, 1),
            read_u64(&header, 9),
            offset + record.len() as u64,
        ))
    }

    fn read_commit_payload(&self, offset: u64) -> Result<[u8; COMMIT_PAYLOAD_SIZE], StorageError> {
        let mut payload = [0u8; COMMIT_PAYLOAD_SIZE];
        self.file
            .read_exact_at(&mut payload, offset + RECORD_HEADER_SIZE as u64)?;
        Ok(payload)
    }
}

fn read_exact_or_torn(file: &File, buf: &mut [u8], offset: u64) -> Result<(), StorageError> {
    file.read_exact_at(buf, offset).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            StorageError::CorruptedWal(format!("truncated record at {offset}"))
        } else {
            StorageError::Io(e)
        }
    })
}

/// Reads page payloads back from the log by offset.
pub struct WalReader {
    file: File,
}

impl WalReader {
    pub fn read_page_at(&self, offset: u64) -> Result<[u8; PAGE_SIZE], StorageError> {
        let mut buf = [0u8; PAGE_SIZE];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }
}
