//! Document store: JSON documents encoded with MessagePack in data-page cells.
//!
//! A document occupies exactly one cell, so its encoded size is bounded by
//! [`MAX_CELL_SIZE`]. Space is taken from and returned to the owning
//! collection's free data page list.

use serde_json::{Map, Value};

use crate::catalog::CollectionDescriptor;
use crate::encoding::IndexKey;
use crate::error::{EncodingError, Result, SchemaError};
use crate::storage::PageStore;
use crate::storage::alloc::{allocate_cell, free_cell, read_cell};
use crate::storage::page::PageType;
use crate::types::{DataBlockId, MAX_CELL_SIZE, PK_INDEX_NAME};

/// The primary key of `doc` as an index key.
pub fn primary_key(doc: &Value) -> Result<IndexKey> {
    let id = doc
        .get(PK_INDEX_NAME)
        .filter(|id| !id.is_null())
        .ok_or(SchemaError::MissingPrimaryKey)?;
    Ok(IndexKey::from_json(id)?)
}

pub fn encode_document(doc: &Value) -> std::result::Result<Vec<u8>, EncodingError> {
    let bytes = rmp_serde::to_vec(doc).map_err(|e| EncodingError::Serialize(e.to_string()))?;
    if bytes.len() > MAX_CELL_SIZE {
        return Err(EncodingError::DocumentTooLarge {
            max: MAX_CELL_SIZE,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

pub fn decode_document(bytes: &[u8]) -> std::result::Result<Value, EncodingError> {
    rmp_serde::from_slice(bytes).map_err(|e| EncodingError::Deserialize(e.to_string()))
}

/// Store `doc` and return its data block address.
pub fn insert_document(
    store: &mut impl PageStore,
    collection: &mut CollectionDescriptor,
    doc: &Value,
) -> Result<DataBlockId> {
    let bytes = encode_document(doc)?;
    let allocation = allocate_cell(
        store,
        &mut collection.free_data_pages,
        PageType::Data,
        collection.col_id,
        &bytes,
    )?;
    Ok(allocation.address)
}

pub fn read_document(store: &impl PageStore, address: DataBlockId) -> Result<Value> {
    let bytes = read_cell(store, address)?;
    Ok(decode_document(&bytes)?)
}

/// Read a document keeping only the top-level `fields`.
///
/// `_id` is always kept. An empty `fields` returns the whole document.
pub fn read_projected_fields(
    store: &impl PageStore,
    address: DataBlockId,
    fields: &[String],
) -> Result<Value> {
    let doc = read_document(store, address)?;
    Ok(project(doc, fields))
}

fn project(doc: Value, fields: &[String]) -> Value {
    if fields.is_empty() {
        return doc;
    }
    match doc {
        Value::Object(mut obj) => {
            let mut result = Map::new();
            if let Some(id) = obj.remove(PK_INDEX_NAME) {
                result.insert(PK_INDEX_NAME.to_string(), id);
            }
            for field in fields {
                if let Some(v) = obj.remove(field.as_str()) {
                    result.insert(field.clone(), v);
                }
            }
            Value::Object(result)
        }
        other => other,
    }
}

/// Free the cell holding a document.
pub fn delete_document(
    store: &mut impl PageStore,
    collection: &mut CollectionDescriptor,
    address: DataBlockId,
) -> Result<()> {
    free_cell(store, &mut collection.free_data_pages, address)?;
    Ok(())
}
