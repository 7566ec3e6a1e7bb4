//! In-page representation of skip-list nodes.
//!
//! Node cell layout:
//! ```text
//! [0]                slot: u8 (index slot within the collection)
//! [1]                levels: u8
//! [2..12]            data_block: PageAddress (empty for sentinels)
//! [12..22]           next_node: PageAddress (per-document chain)
//! [22..22+20*levels] (prev: PageAddress, next: PageAddress) per level
//! [..]               key: MessagePack-encoded IndexKey
//! ```
//!
//! A loaded [`IndexNode`] is a copy of the cell. Pointer updates go straight
//! to the page through the `write_*` functions and never through the copy,
//! so a copy can be stale; [`IndexNode::reload`] refreshes it by identity.

use crate::encoding::IndexKey;
use crate::error::{EncodingError, Result};
use crate::storage::PageStore;
use crate::storage::alloc::{allocate_cell, free_cell, read_cell, update_cell};
use crate::storage::page::PageType;
use crate::types::{CollectionId, DataBlockId, IndexNodeId, MAX_LEVELS, PageAddress, PageId};

const SLOT_OFFSET: usize = 0;
const LEVELS_OFFSET: usize = 1;
const DATA_BLOCK_OFFSET: usize = 2;
const NEXT_NODE_OFFSET: usize = 12;
const LEVELS_START: usize = 22;
const LEVEL_SIZE: usize = PageAddress::SERIALIZED_SIZE * 2;

/// Forward and backward pointers of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexLevel {
    pub prev: PageAddress,
    pub next: PageAddress,
}

impl IndexLevel {
    pub const UNLINKED: IndexLevel = IndexLevel {
        prev: PageAddress::EMPTY,
        next: PageAddress::EMPTY,
    };
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexNode {
    pub position: IndexNodeId,
    pub slot: u8,
    pub levels: Vec<IndexLevel>,
    pub key: IndexKey,
    pub data_block: Option<DataBlockId>,
    pub next_node: Option<IndexNodeId>,
}

fn level_offset(level: usize) -> usize {
    LEVELS_START + level * LEVEL_SIZE
}

impl IndexNode {
    /// Size of the cell a node with `levels` levels and an encoded key of
    /// `key_len` bytes occupies.
    pub fn cell_size(levels: usize, key_len: usize) -> usize {
        LEVELS_START + levels * LEVEL_SIZE + key_len
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn next(&self, level: usize) -> PageAddress {
        self.levels[level].next
    }

    pub fn prev(&self, level: usize) -> PageAddress {
        self.levels[level].prev
    }

    /// Serialize into a cell image with `key_bytes` as the encoded key.
    fn encode_cell(&self, key_bytes: &[u8]) -> Vec<u8> {
        let mut cell = vec![0u8; Self::cell_size(self.levels.len(), key_bytes.len())];
        cell[SLOT_OFFSET] = self.slot;
        cell[LEVELS_OFFSET] = self.levels.len() as u8;
        PageAddress::from_option(self.data_block).write_to(&mut cell[DATA_BLOCK_OFFSET..]);
        PageAddress::from_option(self.next_node).write_to(&mut cell[NEXT_NODE_OFFSET..]);
        for (i, level) in self.levels.iter().enumerate() {
            let at = level_offset(i);
            level.prev.write_to(&mut cell[at..]);
            level.next.write_to(&mut cell[at + PageAddress::SERIALIZED_SIZE..]);
        }
        let key_at = level_offset(self.levels.len());
        cell[key_at..].copy_from_slice(key_bytes);
        cell
    }

    /// Parse a cell image read from `position`.
    pub fn decode(position: IndexNodeId, cell: &[u8]) -> std::result::Result<Self, EncodingError> {
        if cell.len() < LEVELS_START {
            return Err(EncodingError::MalformedNode(format!(
                "cell at {position} is {} bytes",
                cell.len()
            )));
        }
        let level_count = cell[LEVELS_OFFSET] as usize;
        let key_at = level_offset(level_count);
        if level_count == 0 || level_count > MAX_LEVELS as usize || cell.len() < key_at {
            return Err(EncodingError::MalformedNode(format!(
                "cell at {position} claims {level_count} levels in {} bytes",
                cell.len()
            )));
        }

        let levels = (0..level_count)
            .map(|i| {
                let at = level_offset(i);
                IndexLevel {
                    prev: PageAddress::read_from(&cell[at..]),
                    next: PageAddress::read_from(&cell[at + PageAddress::SERIALIZED_SIZE..]),
                }
            })
            .collect();

        Ok(Self {
            position,
            slot: cell[SLOT_OFFSET],
            levels,
            key: IndexKey::decode(&cell[key_at..])?,
            data_block: PageAddress::read_from(&cell[DATA_BLOCK_OFFSET..]).to_option(),
            next_node: PageAddress::read_from(&cell[NEXT_NODE_OFFSET..]).to_option(),
        })
    }

    /// Read the node stored at `position`.
    pub fn load(store: &impl PageStore, position: IndexNodeId) -> Result<Self> {
        let cell = read_cell(store, position)?;
        Ok(Self::decode(position, &cell)?)
    }

    /// Re-read this node by identity, picking up pointer changes and any
    /// relocation of its cell inside the page.
    pub fn reload(&mut self, store: &impl PageStore) -> Result<()> {
        *self = Self::load(store, self.position)?;
        Ok(())
    }

    /// Store a new node and return it with its assigned position.
    ///
    /// Also reports whether the allocation defragmented the node's page.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn insert(
        store: &mut impl PageStore,
        free_pages: &mut Vec<PageId>,
        collection_id: CollectionId,
        slot: u8,
        levels: Vec<IndexLevel>,
        key: IndexKey,
        data_block: Option<DataBlockId>,
        next_node: Option<IndexNodeId>,
    ) -> Result<(Self, bool)> {
        let key_bytes = key.encode()?;
        let mut node = IndexNode {
            position: PageAddress::EMPTY,
            slot,
            levels,
            key,
            data_block,
            next_node,
        };
        let cell = node.encode_cell(&key_bytes);
        let allocation = allocate_cell(store, free_pages, PageType::Index, collection_id, &cell)?;
        node.position = allocation.address;
        Ok((node, allocation.defragmented))
    }
}

/// Point `node`'s level `level` forward at `next`.
pub fn write_level_next(
    store: &mut impl PageStore,
    node: IndexNodeId,
    level: usize,
    next: IndexNodeId,
) -> Result<()> {
    let at = level_offset(level) + PageAddress::SERIALIZED_SIZE;
    update_cell(store, node, |cell| next.write_to(&mut cell[at..]))?;
    Ok(())
}

/// Point `node`'s level `level` backward at `prev`.
pub fn write_level_prev(
    store: &mut impl PageStore,
    node: IndexNodeId,
    level: usize,
    prev: IndexNodeId,
) -> Result<()> {
    let at = level_offset(level);
    update_cell(store, node, |cell| prev.write_to(&mut cell[at..]))?;
    Ok(())
}

/// Set the per-document chain pointer of `node`.
pub fn write_next_node(
    store: &mut impl PageStore,
    node: IndexNodeId,
    next_node: Option<IndexNodeId>,
) -> Result<()> {
    update_cell(store, node, |cell| {
        PageAddress::from_option(next_node).write_to(&mut cell[NEXT_NODE_OFFSET..])
    })?;
    Ok(())
}

/// Allocate the head and tail sentinels of a new index. Both carry
/// [`MAX_LEVELS`] levels and are linked to each other at every level.
pub fn create_head_tail(
    store: &mut impl PageStore,
    free_pages: &mut Vec<PageId>,
    collection_id: CollectionId,
    slot: u8,
) -> Result<(IndexNodeId, IndexNodeId)> {
    let unlinked = vec![IndexLevel::UNLINKED; MAX_LEVELS as usize];
    let (head, _) = IndexNode::insert(
        store,
        free_pages,
        collection_id,
        slot,
        unlinked,
        IndexKey::MinValue,
        None,
        None,
    )?;

    let tail_levels = vec![
        IndexLevel {
            prev: head.position,
            next: PageAddress::EMPTY,
        };
        MAX_LEVELS as usize
    ];
    let (tail, _) = IndexNode::insert(
        store,
        free_pages,
        collection_id,
        slot,
        tail_levels,
        IndexKey::MaxValue,
        None,
        None,
    )?;

    update_cell(store, head.position, |cell| {
        for level in 0..MAX_LEVELS as usize {
            tail.position
                .write_to(&mut cell[level_offset(level) + PageAddress::SERIALIZED_SIZE..]);
        }
    })?;
    Ok((head.position, tail.position))
}

/// Free the cell of a node that is no longer linked anywhere.
pub fn free_node(
    store: &mut impl PageStore,
    free_pages: &mut Vec<PageId>,
    node: IndexNodeId,
) -> Result<()> {
    free_cell(store, free_pages, node)?;
    Ok(())
}
