//! Error types for all SkipDB operations.

use std::io;
use thiserror::Error;

use crate::types::{CollectionId, PageAddress};

/// Top-level error type for SkipDB operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Transaction(#[from] TxnError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

/// Coarse classification of an [`Error`], used by callers that only care
/// about how to react to a failure rather than its exact cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, detected before anything is mutated.
    Validation,
    /// A referenced collection, index or document does not exist.
    NotFound,
    /// A unique index already holds an equal key.
    Constraint,
    /// Read/write failure at the page or document layer.
    Storage,
    /// Lock timeout or cancellation.
    Concurrency,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Storage(_) | Error::Encoding(_) => ErrorKind::Storage,
            Error::Transaction(_) => ErrorKind::Concurrency,
            Error::Constraint(_) => ErrorKind::Constraint,
            Error::Expression(_) => ErrorKind::Validation,
            Error::Schema(e) => match e {
                SchemaError::CollectionNotFound(_)
                | SchemaError::IndexNotFound { .. }
                | SchemaError::DocumentNotFound(_) => ErrorKind::NotFound,
                _ => ErrorKind::Validation,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupted page: {0}")]
    CorruptedPage(String),

    #[error("corrupted write-ahead log: {0}")]
    CorruptedWal(String),

    #[error("invalid magic bytes")]
    InvalidMagic,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),

    #[error("database file is locked")]
    FileLocked,

    #[error("a committed transaction was not checkpointed; reopen the database to recover it")]
    RecoveryRequired,

    #[error("page out of bounds: {page_id} >= {total_pages}")]
    PageOutOfBounds { page_id: u64, total_pages: u64 },

    #[error("page {page_id} has no room for a {needed}-byte cell")]
    PageFull { page_id: u64, needed: usize },

    #[error("no live cell at {0}")]
    MissingCell(PageAddress),
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("document exceeds maximum size of {max} bytes (got {actual})")]
    DocumentTooLarge { max: usize, actual: usize },

    #[error("index key exceeds maximum size of {max} bytes (got {actual})")]
    KeyTooLarge { max: usize, actual: usize },

    #[error("value of type {0} cannot be used as an index key")]
    UnsupportedKeyType(&'static str),

    #[error("malformed index node: {0}")]
    MalformedNode(String),

    #[error("serialization failed: {0}")]
    Serialize(String),

    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("timed out waiting for locks on collections {0:?}")]
    LockTimeout(Vec<CollectionId>),

    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("invalid collection name: '{0}'")]
    InvalidCollectionName(String),

    #[error("index not found: {collection}.{index}")]
    IndexNotFound { collection: String, index: String },

    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("invalid index name: '{0}'")]
    InvalidIndexName(String),

    #[error("index name '{name}' exceeds maximum length of {max}")]
    IndexNameTooLong { name: String, max: usize },

    #[error("expression is not indexable: {0}")]
    ExpressionNotIndexable(String),

    #[error("collection '{0}' has no free index slot")]
    IndexSlotsExhausted(String),

    #[error("document has no usable _id field")]
    MissingPrimaryKey,

    #[error("document not found: {0}")]
    DocumentNotFound(String),
}

#[derive(Debug, Error)]
pub enum ConstraintError {
    #[error("duplicate key {key} in unique index {collection}.{index}")]
    DuplicateKey {
        collection: String,
        index: String,
        key: String,
    },
}

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("unexpected {found} at position {position} in '{source_text}'")]
    Unexpected {
        source_text: String,
        position: usize,
        found: String,
    },

    #[error("unknown function {0}()")]
    UnknownFunction(String),

    #[error("empty expression")]
    Empty,
}

pub type Result<T> = std::result::Result<T, Error>;
