//! Skip-list algorithms over index nodes stored in pages.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::debug;
use xxhash_rust::xxh64::Xxh64;

use crate::catalog::{CollectionDescriptor, IndexDescriptor};
use crate::encoding::{Collation, IndexKey};
use crate::error::{ConstraintError, Result};
use crate::storage::PageStore;
use crate::types::{DataBlockId, IndexNodeId, MAX_LEVELS, PageAddress, PageId};

use super::cursor::IndexCursor;
use super::node::{
    IndexLevel, IndexNode, create_head_tail, free_node, write_level_next, write_level_prev,
    write_next_node,
};

const LEVEL_SEED: u64 = 0x5ec0_0d1e_u64;

/// Number of levels for a new node.
///
/// Geometric with p = 1/2, but derived from a hash of the key and the data
/// pointer instead of a random source, so rebuilding the same index yields
/// the same shape.
pub fn level_for(key_bytes: &[u8], data_block: DataBlockId) -> usize {
    let mut hasher = Xxh64::new(LEVEL_SEED);
    hasher.update(key_bytes);
    let mut addr = [0u8; PageAddress::SERIALIZED_SIZE];
    data_block.write_to(&mut addr);
    hasher.update(&addr);
    let ones = hasher.digest().trailing_ones() as usize;
    (1 + ones).min(MAX_LEVELS as usize)
}

/// Result of [`IndexService::add_node`].
#[derive(Debug)]
pub struct AddedNode {
    pub node: IndexNode,
    /// Page that was defragmented to make room for the node. Any snapshot of
    /// another node on this page must be reloaded before its bytes are used.
    pub defragmented_page: Option<PageId>,
}

/// Outcome of [`IndexService::check_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexIntegrity {
    /// Non-sentinel nodes on level 0.
    pub nodes: u64,
    pub problems: Vec<String>,
}

impl IndexIntegrity {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Skip-list operations for the indexes of one collection.
///
/// Holds the collection descriptor mutably because node allocation and
/// removal update its free index page list.
pub struct IndexService<'a> {
    collection: &'a mut CollectionDescriptor,
    collation: Collation,
}

impl<'a> IndexService<'a> {
    pub fn new(collection: &'a mut CollectionDescriptor, collation: Collation) -> Self {
        Self {
            collection,
            collation,
        }
    }

    /// Allocate head and tail sentinels for a new index in `slot`.
    pub fn create_head_tail(
        &mut self,
        store: &mut impl PageStore,
        slot: u8,
    ) -> Result<(IndexNodeId, IndexNodeId)> {
        create_head_tail(
            store,
            &mut self.collection.free_index_pages,
            self.collection.col_id,
            slot,
        )
    }

    /// Insert `key` into `index`, pointing at `data_block`.
    ///
    /// When `last` is given, it is the previous node of the same document and
    /// its `next_node` is set to the new node. The new node's own `next_node`
    /// is left empty.
    ///
    /// A unique index rejects an equal key before anything is allocated.
    pub fn add_node(
        &mut self,
        store: &mut impl PageStore,
        index: &IndexDescriptor,
        key: IndexKey,
        data_block: DataBlockId,
        last: Option<&mut IndexNode>,
    ) -> Result<AddedNode> {
        let key_bytes = key.encode()?;
        let level_count = level_for(&key_bytes, data_block);

        let mut preds = [PageAddress::EMPTY; MAX_LEVELS as usize];
        let mut succs = [PageAddress::EMPTY; MAX_LEVELS as usize];
        let mut cur = IndexNode::load(store, index.head)?;
        let mut equal_at_level0 = false;

        for level in (0..MAX_LEVELS as usize).rev() {
            loop {
                let next_addr = cur.next(level);
                if next_addr == index.tail {
                    break;
                }
                let next = IndexNode::load(store, next_addr)?;
                let ord = self.collation.compare(&next.key, &key);
                if ord == Ordering::Less || (!index.unique && ord == Ordering::Equal) {
                    cur = next;
                } else {
                    if level == 0 && ord == Ordering::Equal {
                        equal_at_level0 = true;
                    }
                    break;
                }
            }
            preds[level] = cur.position;
            succs[level] = cur.next(level);
        }

        if index.unique && equal_at_level0 {
            return Err(ConstraintError::DuplicateKey {
                collection: self.collection.name.clone(),
                index: index.name.clone(),
                key: key.to_string(),
            }
            .into());
        }

        let levels = (0..level_count)
            .map(|i| IndexLevel {
                prev: preds[i],
                next: succs[i],
            })
            .collect();
        let (node, defragmented) = IndexNode::insert(
            store,
            &mut self.collection.free_index_pages,
            self.collection.col_id,
            index.slot,
            levels,
            key,
            Some(data_block),
            None,
        )?;

        for level in 0..level_count {
            write_level_next(store, preds[level], level, node.position)?;
            write_level_prev(store, succs[level], level, node.position)?;
        }

        if let Some(last) = last {
            write_next_node(store, last.position, Some(node.position))?;
            last.next_node = Some(node.position);
        }

        let defragmented_page = defragmented.then_some(node.position.page_id);
        if let Some(page_id) = defragmented_page {
            debug!(
                collection = %self.collection.name,
                index = %index.name,
                page_id,
                "index page defragmented during insert"
            );
        }
        Ok(AddedNode {
            node,
            defragmented_page,
        })
    }

    /// First node whose key equals `key` under the collation.
    pub fn find(
        &self,
        store: &impl PageStore,
        index: &IndexDescriptor,
        key: &IndexKey,
    ) -> Result<Option<IndexNode>> {
        find_node(store, index, self.collation, key)
    }

    /// Unlink the node at `position` from every level and free its cell.
    pub fn delete_node(&mut self, store: &mut impl PageStore, position: IndexNodeId) -> Result<()> {
        let node = IndexNode::load(store, position)?;
        for (level, link) in node.levels.iter().enumerate() {
            write_level_next(store, link.prev, level, link.next)?;
            write_level_prev(store, link.next, level, link.prev)?;
        }
        free_node(store, &mut self.collection.free_index_pages, position)
    }

    /// Delete a document's node chain, starting at its primary-key node.
    /// Returns the number of nodes removed.
    pub fn delete_document_nodes(
        &mut self,
        store: &mut impl PageStore,
        pk_node: IndexNodeId,
    ) -> Result<u64> {
        let mut removed = 0;
        let mut next = Some(pk_node);
        while let Some(position) = next {
            next = IndexNode::load(store, position)?.next_node;
            self.delete_node(store, position)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Verify ordering and link symmetry on every level of `index`.
    pub fn check_integrity(
        &self,
        store: &impl PageStore,
        index: &IndexDescriptor,
    ) -> Result<IndexIntegrity> {
        check_integrity(store, index, self.collation)
    }
}

/// Lookup shared by [`IndexService::find`] and read-only callers.
pub fn find_node(
    store: &impl PageStore,
    index: &IndexDescriptor,
    collation: Collation,
    key: &IndexKey,
) -> Result<Option<IndexNode>> {
    let mut cur = IndexNode::load(store, index.head)?;
    for level in (0..MAX_LEVELS as usize).rev() {
        loop {
            let next_addr = cur.next(level);
            if next_addr == index.tail {
                break;
            }
            let next = IndexNode::load(store, next_addr)?;
            match collation.compare(&next.key, key) {
                Ordering::Less => cur = next,
                Ordering::Equal if level == 0 => return Ok(Some(next)),
                _ => break,
            }
        }
    }
    Ok(None)
}

/// Every node whose key equals `key`, in level-0 order.
pub fn find_all(
    store: &impl PageStore,
    index: &IndexDescriptor,
    collation: Collation,
    key: &IndexKey,
) -> Result<Vec<IndexNode>> {
    let mut matches = Vec::new();
    let mut next = find_node(store, index, collation, key)?;
    while let Some(node) = next {
        let following = node.next(0);
        matches.push(node);
        next = None;
        if following != index.tail && !following.is_empty() {
            let candidate = IndexNode::load(store, following)?;
            if collation.equals(&candidate.key, key) {
                next = Some(candidate);
            }
        }
    }
    Ok(matches)
}

/// All non-sentinel nodes of `index`, ascending.
pub fn scan(store: &impl PageStore, index: &IndexDescriptor) -> Result<Vec<IndexNode>> {
    IndexCursor::new(index).collect_remaining(store)
}

pub fn check_integrity(
    store: &impl PageStore,
    index: &IndexDescriptor,
    collation: Collation,
) -> Result<IndexIntegrity> {
    let mut report = IndexIntegrity::default();

    for level in 0..MAX_LEVELS as usize {
        let mut visited = HashSet::new();
        let mut cur = IndexNode::load(store, index.head)?;
        loop {
            let next_addr = cur.next(level);
            if next_addr.is_empty() {
                report
                    .problems
                    .push(format!("level {level}: chain from head ends before tail at {}", cur.position));
                break;
            }
            if !visited.insert(next_addr) {
                report
                    .problems
                    .push(format!("level {level}: cycle through {next_addr}"));
                break;
            }
            let next = IndexNode::load(store, next_addr)?;
            if next.level_count() <= level || next.prev(level) != cur.position {
                report.problems.push(format!(
                    "level {level}: {} -> {next_addr} has no matching back link",
                    cur.position
                ));
            }
            if next.slot != index.slot {
                report.problems.push(format!(
                    "level {level}: node {next_addr} belongs to slot {}",
                    next.slot
                ));
            }
            match collation.compare(&cur.key, &next.key) {
                Ordering::Greater => report.problems.push(format!(
                    "level {level}: {} sorts after {next_addr}",
                    cur.position
                )),
                Ordering::Equal if index.unique && level == 0 && !cur.key.is_sentinel() => {
                    report.problems.push(format!(
                        "duplicate key {} in unique index at {next_addr}",
                        next.key
                    ))
                }
                _ => {}
            }
            if next_addr == index.tail {
                break;
            }
            if level == 0 {
                report.nodes += 1;
            }
            cur = next;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::InMemoryPageStore;
    use crate::types::PK_INDEX_SLOT;

    fn setup(unique: bool) -> (InMemoryPageStore, CollectionDescriptor, IndexDescriptor) {
        let mut store = InMemoryPageStore::new();
        let mut free_index_pages = Vec::new();
        let (pk_head, pk_tail) =
            create_head_tail(&mut store, &mut free_index_pages, 1, PK_INDEX_SLOT).unwrap();
        let mut collection = CollectionDescriptor {
            name: "people".into(),
            col_id: 1,
            pk: IndexDescriptor::primary_key(pk_head, pk_tail),
            indexes: Vec::new(),
            free_index_pages,
            free_data_pages: Vec::new(),
            document_count: 0,
        };
        let (head, tail) = IndexService::new(&mut collection, Collation::default())
            .create_head_tail(&mut store, 1)
            .unwrap();
        let index = IndexDescriptor {
            slot: 1,
            name: "by_name".into(),
            expression: "$.name".into(),
            unique,
            head,
            tail,
        };
        (store, collection, index)
    }

    fn doc(n: u16) -> DataBlockId {
        PageAddress::new(900, n)
    }

    fn s(v: &str) -> IndexKey {
        IndexKey::String(v.to_string())
    }

    #[test]
    fn test_level_policy_is_deterministic_and_bounded() {
        let key = s("abc").encode().unwrap();
        assert_eq!(level_for(&key, doc(1)), level_for(&key, doc(1)));
        let levels: Vec<usize> = (0..2000).map(|i| level_for(&key, doc(i))).collect();
        assert!(levels.iter().all(|&l| (1..=MAX_LEVELS as usize).contains(&l)));
        let ones = levels.iter().filter(|&&l| l == 1).count();
        assert!(ones > 800 && ones < 1200, "{ones} single-level nodes");
    }

    #[test]
    fn test_insert_keeps_order() {
        let (mut store, mut collection, index) = setup(false);
        let mut service = IndexService::new(&mut collection, Collation::default());
        for (i, name) in ["mike", "alice", "zoe", "bob", "alice", "carl"].iter().enumerate() {
            service
                .add_node(&mut store, &index, s(name), doc(i as u16), None)
                .unwrap();
        }

        let keys: Vec<IndexKey> = scan(&store, &index).unwrap().into_iter().map(|n| n.key).collect();
        assert_eq!(keys, vec![s("alice"), s("alice"), s("bob"), s("carl"), s("mike"), s("zoe")]);

        let report = service.check_integrity(&store, &index).unwrap();
        assert!(report.is_ok(), "{:?}", report.problems);
        assert_eq!(report.nodes, 6);
    }

    #[test]
    fn test_equal_keys_keep_insertion_order() {
        let (mut store, mut collection, index) = setup(false);
        let mut service = IndexService::new(&mut collection, Collation::default());
        for i in 0..5 {
            service.add_node(&mut store, &index, s("same"), doc(i), None).unwrap();
        }
        let blocks: Vec<_> = find_all(&store, &index, Collation::default(), &s("same"))
            .unwrap()
            .into_iter()
            .map(|n| n.data_block.unwrap())
            .collect();
        assert_eq!(blocks, (0..5).map(doc).collect::<Vec<_>>());
    }

    #[test]
    fn test_unique_rejects_before_allocation() {
        let (mut store, mut collection, index) = setup(true);
        let mut service = IndexService::new(&mut collection, Collation::ignore_case());
        service.add_node(&mut store, &index, s("Ann"), doc(1), None).unwrap();

        let pages_before = store.page_count();
        let err = service
            .add_node(&mut store, &index, s("ann"), doc(2), None)
            .unwrap_err();
        assert!(matches!(err, Error::Constraint(ConstraintError::DuplicateKey { .. })));
        assert_eq!(store.page_count(), pages_before);
        assert_eq!(scan(&store, &index).unwrap().len(), 1);
    }

    #[test]
    fn test_add_node_links_document_chain() {
        let (mut store, mut collection, index) = setup(false);
        let mut service = IndexService::new(&mut collection, Collation::default());
        let mut first = service
            .add_node(&mut store, &index, s("a"), doc(1), None)
            .unwrap()
            .node;
        let second = service
            .add_node(&mut store, &index, s("b"), doc(1), Some(&mut first))
            .unwrap()
            .node;

        assert_eq!(first.next_node, Some(second.position));
        assert_eq!(
            IndexNode::load(&store, first.position).unwrap().next_node,
            Some(second.position)
        );
        assert_eq!(second.next_node, None);
    }

    #[test]
    fn test_find() {
        let (mut store, mut collection, index) = setup(true);
        let mut service = IndexService::new(&mut collection, Collation::default());
        for (i, name) in ["d", "b", "a", "c"].iter().enumerate() {
            service.add_node(&mut store, &index, s(name), doc(i as u16), None).unwrap();
        }
        let found = service.find(&store, &index, &s("c")).unwrap().unwrap();
        assert_eq!(found.data_block, Some(doc(3)));
        assert!(service.find(&store, &index, &s("e")).unwrap().is_none());
    }

    #[test]
    fn test_delete_nodes_and_chain() {
        let (mut store, mut collection, index) = setup(false);
        let mut service = IndexService::new(&mut collection, Collation::default());
        let mut ids = Vec::new();
        for i in 0..20u16 {
            let added = service
                .add_node(&mut store, &index, IndexKey::Int(i as i64), doc(i), None)
                .unwrap();
            ids.push(added.node.position);
        }
        for id in ids.iter().step_by(2) {
            service.delete_node(&mut store, *id).unwrap();
        }
        let report = service.check_integrity(&store, &index).unwrap();
        assert!(report.is_ok(), "{:?}", report.problems);
        assert_eq!(report.nodes, 10);

        let mut first = IndexNode::load(&store, ids[1]).unwrap();
        service
            .add_node(&mut store, &index, IndexKey::Int(100), doc(1), Some(&mut first))
            .unwrap();
        assert_eq!(service.delete_document_nodes(&mut store, ids[1]).unwrap(), 2);
        assert_eq!(service.check_integrity(&store, &index).unwrap().nodes, 9);
    }

    #[test]
    fn test_integrity_detects_broken_back_link() {
        let (mut store, mut collection, index) = setup(false);
        let mut service = IndexService::new(&mut collection, Collation::default());
        let a = service.add_node(&mut store, &index, s("a"), doc(1), None).unwrap().node;
        service.add_node(&mut store, &index, s("b"), doc(2), None).unwrap();

        write_level_prev(&mut store, index.tail, 0, a.position).unwrap();
        let report = service.check_integrity(&store, &index).unwrap();
        assert!(!report.is_ok());
    }
}
