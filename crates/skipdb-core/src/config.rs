//! Database options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoding::collation::Collation;
use crate::error::{EncodingError, Error};

/// Controls whether commits and safepoints fsync the write-ahead log and the
/// data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Fsync on every safepoint and commit (default). Maximum durability.
    #[default]
    Full,
    /// Skip fsync entirely. Data may be lost on crash but writes are
    /// much faster. Useful for bulk loads and tests.
    None,
}

/// Options accepted by [`SkipDB::create_with_options`](crate::api::SkipDB::create_with_options)
/// and [`SkipDB::open_with_options`](crate::api::SkipDB::open_with_options).
///
/// Every field has a default, so a partial JSON object (or `{}`) deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseOptions {
    #[serde(default)]
    pub sync_mode: SyncMode,

    /// A transaction reports a safepoint as due once it holds this many dirty
    /// pages in memory.
    #[serde(default = "default_safepoint_dirty_pages")]
    pub safepoint_dirty_pages: usize,

    /// How long `begin_transaction` waits for collection locks. `None` blocks.
    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,

    /// Key collation. Only read when a database is created; an existing file
    /// keeps the collation it was created with.
    #[serde(default)]
    pub collation: Collation,
}

fn default_safepoint_dirty_pages() -> usize {
    256
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            safepoint_dirty_pages: default_safepoint_dirty_pages(),
            lock_timeout_ms: None,
            collation: Collation::default(),
        }
    }
}

impl DatabaseOptions {
    /// Parse options from a JSON document.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| EncodingError::Deserialize(e.to_string()).into())
    }

    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    pub fn safepoint_dirty_pages(mut self, pages: usize) -> Self {
        self.safepoint_dirty_pages = pages.max(1);
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn collation(mut self, collation: Collation) -> Self {
        self.collation = collation;
        self
    }

    pub(crate) fn lock_timeout_duration(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}
