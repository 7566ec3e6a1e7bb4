//! Catalog: collections, their indexes, and free-page bookkeeping.
//!
//! The whole catalog is one value. A write transaction loads it from the
//! committed pages, mutates it, and writes it back with [`ops::persist`].

pub mod ops;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::encoding::Collation;
use crate::error::SchemaError;
use crate::types::{
    CollectionId, IndexNodeId, MAX_COLLECTION_NAME_LENGTH, MAX_INDEX_NAME_LENGTH, MAX_LEVELS,
    PK_INDEX_NAME, PK_INDEX_SLOT, PageId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub collation: Collation,
    pub last_collection_id: CollectionId,
    pub collections: BTreeMap<String, CollectionDescriptor>,
}

impl Catalog {
    pub fn new(collation: Collation) -> Self {
        Self {
            collation,
            last_collection_id: 0,
            collections: BTreeMap::new(),
        }
    }

    pub fn collection(&self, name: &str) -> Result<&CollectionDescriptor, SchemaError> {
        self.collections
            .get(name)
            .ok_or_else(|| SchemaError::CollectionNotFound(name.to_string()))
    }

    pub fn collection_mut(&mut self, name: &str) -> Result<&mut CollectionDescriptor, SchemaError> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| SchemaError::CollectionNotFound(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    pub name: String,
    pub col_id: CollectionId,
    /// Primary-key index: slot 0, named `_id`, always unique.
    pub pk: IndexDescriptor,
    /// Secondary indexes ordered by slot.
    pub indexes: Vec<IndexDescriptor>,
    /// Index pages of this collection that still have reusable space.
    pub free_index_pages: Vec<PageId>,
    /// Data pages of this collection that still have reusable space.
    pub free_data_pages: Vec<PageId>,
    pub document_count: u64,
}

impl CollectionDescriptor {
    /// Look up an index by name; `_id` resolves to the primary key.
    pub fn index(&self, name: &str) -> Option<&IndexDescriptor> {
        if name == PK_INDEX_NAME {
            return Some(&self.pk);
        }
        self.indexes.iter().find(|idx| idx.name == name)
    }

    pub fn require_index(&self, name: &str) -> Result<&IndexDescriptor, SchemaError> {
        self.index(name).ok_or_else(|| SchemaError::IndexNotFound {
            collection: self.name.clone(),
            index: name.to_string(),
        })
    }

    /// Lowest secondary slot not in use.
    pub fn next_free_slot(&self) -> Option<u8> {
        plan_index_slot(self.indexes.iter().map(|idx| idx.slot))
    }

    /// Add a secondary index, keeping `indexes` ordered by slot.
    pub fn push_index(&mut self, index: IndexDescriptor) {
        let at = self
            .indexes
            .iter()
            .position(|existing| existing.slot > index.slot)
            .unwrap_or(self.indexes.len());
        self.indexes.insert(at, index);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub slot: u8,
    pub name: String,
    /// Key expression source text.
    pub expression: String,
    pub unique: bool,
    /// Sentinels. Fixed for the lifetime of the index.
    pub head: IndexNodeId,
    pub tail: IndexNodeId,
}

impl IndexDescriptor {
    pub fn primary_key(head: IndexNodeId, tail: IndexNodeId) -> Self {
        Self {
            slot: PK_INDEX_SLOT,
            name: PK_INDEX_NAME.to_string(),
            expression: format!("$.{PK_INDEX_NAME}"),
            unique: true,
            head,
            tail,
        }
    }
}

/// Pick the lowest slot in `1..=MAX_LEVELS` that is not in `used`.
pub fn plan_index_slot(used: impl IntoIterator<Item = u8>) -> Option<u8> {
    let mut taken = [false; MAX_LEVELS as usize + 1];
    for slot in used {
        if let Some(flag) = taken.get_mut(slot as usize) {
            *flag = true;
        }
    }
    (1..=MAX_LEVELS).find(|&slot| !taken[slot as usize])
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

pub fn validate_collection_name(name: &str) -> Result<(), SchemaError> {
    if !is_identifier(name) || name.len() > MAX_COLLECTION_NAME_LENGTH {
        return Err(SchemaError::InvalidCollectionName(name.to_string()));
    }
    Ok(())
}

pub fn validate_index_name(name: &str) -> Result<(), SchemaError> {
    if !is_identifier(name) || name == PK_INDEX_NAME {
        return Err(SchemaError::InvalidIndexName(name.to_string()));
    }
    if name.len() > MAX_INDEX_NAME_LENGTH {
        return Err(SchemaError::IndexNameTooLong {
            name: name.to_string(),
            max: MAX_INDEX_NAME_LENGTH,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageAddress;

    fn index(slot: u8, name: &str) -> IndexDescriptor {
        IndexDescriptor {
            slot,
            name: name.to_string(),
            expression: format!("$.{name}"),
            unique: false,
            head: PageAddress::new(3, slot as u16 * 2),
            tail: PageAddress::new(3, slot as u16 * 2 + 1),
        }
    }

    #[test]
    fn test_plan_index_slot() {
        assert_eq!(plan_index_slot([]), Some(1));
        assert_eq!(plan_index_slot([1, 2, 4]), Some(3));
        assert_eq!(plan_index_slot(1..=MAX_LEVELS), None);
        assert_eq!(plan_index_slot([0, 200]), Some(1));
    }

    #[test]
    fn test_push_index_keeps_slot_order() {
        let mut col = CollectionDescriptor {
            name: "users".into(),
            col_id: 1,
            pk: IndexDescriptor::primary_key(PageAddress::new(3, 0), PageAddress::new(3, 1)),
            indexes: vec![index(1, "a"), index(3, "c")],
            free_index_pages: vec![],
            free_data_pages: vec![],
            document_count: 0,
        };
        assert_eq!(col.next_free_slot(), Some(2));
        col.push_index(index(2, "b"));
        let slots: Vec<u8> = col.indexes.iter().map(|i| i.slot).collect();
        assert_eq!(slots, vec![1, 2, 3]);

        assert_eq!(col.index("_id").unwrap().slot, PK_INDEX_SLOT);
        assert_eq!(col.index("b").unwrap().slot, 2);
        assert!(matches!(
            col.require_index("zzz"),
            Err(SchemaError::IndexNotFound { .. })
        ));
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_collection_name("users").is_ok());
        assert!(validate_collection_name("_meta_2").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("1users").is_err());
        assert!(validate_collection_name("us-ers").is_err());
        assert!(validate_collection_name(&"c".repeat(61)).is_err());

        assert!(validate_index_name("by_email").is_ok());
        assert!(matches!(
            validate_index_name("by email"),
            Err(SchemaError::InvalidIndexName(_))
        ));
        assert!(matches!(
            validate_index_name("_id"),
            Err(SchemaError::InvalidIndexName(_))
        ));
        assert!(matches!(
            validate_index_name(&"i".repeat(33)),
            Err(SchemaError::IndexNameTooLong { max: 32, .. })
        ));
        assert!(validate_index_name(&"i".repeat(32)).is_ok());
    }
}
