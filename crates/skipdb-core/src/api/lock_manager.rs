//! Collection-level locks for write transactions.
//!
//! A transaction locks its whole set of collection ids in one step. Waiting
//! happens while holding none of them, so two transactions can never each
//! hold part of what the other needs.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::TxnError;
use crate::types::CollectionId;

#[derive(Default)]
pub struct LockManager {
    held: Mutex<BTreeSet<CollectionId>>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every id in `ids`, blocking until all are free.
    ///
    /// With a `timeout`, gives up with [`TxnError::LockTimeout`] once it
    /// expires.
    pub fn acquire(
        self: &Arc<Self>,
        ids: &[CollectionId],
        timeout: Option<Duration>,
    ) -> Result<LockSet, TxnError> {
        let mut wanted = ids.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut held = self.held.lock();
        while wanted.iter().any(|id| held.contains(id)) {
            match deadline {
                Some(deadline) => {
                    let waited = self.released.wait_until(&mut held, deadline);
                    if waited.timed_out() && wanted.iter().any(|id| held.contains(id)) {
                        return Err(TxnError::LockTimeout(wanted));
                    }
                }
                None => self.released.wait(&mut held),
            }
        }
        held.extend(wanted.iter().copied());

        Ok(LockSet {
            manager: Arc::clone(self),
            ids: wanted,
        })
    }

    pub fn is_locked(&self, id: CollectionId) -> bool {
        self.held.lock().contains(&id)
    }
}

/// Locks held by one transaction. Released on drop.
pub struct LockSet {
    manager: Arc<LockManager>,
    ids: Vec<CollectionId>,
}

impl LockSet {
    /// Locked ids, sorted and de-duplicated.
    pub fn ids(&self) -> &[CollectionId] {
        &self.ids
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        let mut held = self.manager.held.lock();
        for id in &self.ids {
            held.remove(id);
        }
        drop(held);
        self.manager.released.notify_all();
    }
}
