use crate::catalog::IndexDescriptor;
use crate::error::Result;
use crate::storage::PageStore;
use crate::types::IndexNodeId;

use super::node::IndexNode;

/// Ascending level-0 cursor over the non-sentinel nodes of one index.
///
/// The cursor holds a snapshot of its current node. When the page under it
/// may have been defragmented, call [`IndexCursor::reload_current`].
pub struct IndexCursor {
    head: IndexNodeId,
    tail: IndexNodeId,
    current: Option<IndexNode>,
    done: bool,
}

impl IndexCursor {
    /// A cursor positioned before the first node.
    pub fn new(index: &IndexDescriptor) -> Self {
        Self {
            head: index.head,
            tail: index.tail,
            current: None,
            done: false,
        }
    }

    /// Advance to the next node. Returns `false` once the tail is reached.
    pub fn move_next(&mut self, store: &impl PageStore) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        let next = match &self.current {
            Some(node) => node.next(0),
            None => IndexNode::load(store, self.head)?.next(0),
        };
        if next == self.tail || next.is_empty() {
            self.current = None;
            self.done = true;
            return Ok(false);
        }
        self.current = Some(IndexNode::load(store, next)?);
        Ok(true)
    }

    pub fn current(&self) -> Option<&IndexNode> {
        self.current.as_ref()
    }

    /// Re-read the current node by identity.
    pub fn reload_current(&mut self, store: &impl PageStore) -> Result<()> {
        if let Some(node) = self.current.as_mut() {
            node.reload(store)?;
        }
        Ok(())
    }

    /// Drain the remaining nodes into a vector.
    pub fn collect_remaining(mut self, store: &impl PageStore) -> Result<Vec<IndexNode>> {
        let mut nodes = Vec::new();
        while self.move_next(store)? {
            if let Some(node) = self.current() {
                nodes.push(node.clone());
            }
        }
        Ok(nodes)
    }
}
