//! Building a secondary index over an existing collection.
//!
//! The build runs as one transaction:
//! 1. validate names and the expression, touching nothing
//! 2. resolve the collection in a read snapshot, then lock it and the catalog
//! 3. register the index in the catalog and create its sentinels
//! 4. walk the primary key in order, inserting one node per key and
//!    chaining the new nodes into each document's node chain
//! 5. commit
//!
//! Any failure after step 2 drops the transaction, which discards every page
//! and catalog change.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::catalog::{IndexDescriptor, validate_collection_name, validate_index_name};
use crate::document;
use crate::encoding::Collation;
use crate::error::{Error, SchemaError, TxnError};
use crate::expr::{self, KeyExpr};
use crate::index::node::write_next_node;
use crate::index::{IndexCursor, IndexService};

use super::database::{SkipDB, data_block_of};
use super::transaction::Transaction;

/// Counters reported by a finished index build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexBuildStats {
    /// Index nodes created.
    pub nodes: u64,
    /// Documents visited.
    pub documents: u64,
    /// Node insertions that had to defragment a page first.
    pub defragmentations: u64,
    pub safepoints: u64,
}

pub(crate) struct IndexRequest<'r> {
    pub collection: &'r str,
    pub name: &'r str,
    pub expression: &'r str,
    pub unique: bool,
}

pub(crate) fn build_index(
    db: &SkipDB,
    request: &IndexRequest<'_>,
    cancel: Option<&AtomicBool>,
) -> Result<IndexBuildStats, Error> {
    validate_collection_name(request.collection)?;
    validate_index_name(request.name)?;
    let key_expr = expr::parse(request.expression)?;
    if !key_expr.is_indexable() {
        return Err(SchemaError::ExpressionNotIndexable(request.expression.to_string()).into());
    }

    let col_id =
        db.read_snapshot(|_, catalog| Ok(catalog.collection(request.collection)?.col_id))?;
    let mut txn = db.begin_transaction(&[col_id])?;

    let index = register(&mut txn, request)?;
    txn.persist_catalog()?;

    let stats = populate(&mut txn, request.collection, &index, &key_expr, cancel)?;
    txn.commit()?;

    info!(
        collection = request.collection,
        index = request.name,
        slot = index.slot,
        nodes = stats.nodes,
        documents = stats.documents,
        defragmentations = stats.defragmentations,
        safepoints = stats.safepoints,
        "index build complete"
    );
    Ok(stats)
}

/// Add the index to the catalog copy of `txn` and create its sentinels.
fn register(txn: &mut Transaction, request: &IndexRequest<'_>) -> Result<IndexDescriptor, Error> {
    let collation = txn.catalog().collation;
    let (store, catalog) = txn.parts_mut();
    let col = catalog.collection_mut(request.collection)?;

    if col.index(request.name).is_some() {
        return Err(SchemaError::IndexAlreadyExists(request.name.to_string()).into());
    }
    let slot = col
        .next_free_slot()
        .ok_or_else(|| SchemaError::IndexSlotsExhausted(col.name.clone()))?;
    let (head, tail) = IndexService::new(col, collation).create_head_tail(store, slot)?;

    let index = IndexDescriptor {
        slot,
        name: request.name.to_string(),
        expression: request.expression.to_string(),
        unique: request.unique,
        head,
        tail,
    };
    col.push_index(index.clone());
    Ok(index)
}

fn populate(
    txn: &mut Transaction,
    collection: &str,
    index: &IndexDescriptor,
    key_expr: &KeyExpr,
    cancel: Option<&AtomicBool>,
) -> Result<IndexBuildStats, Error> {
    let collation: Collation = txn.catalog().collation;
    let fields = key_expr.fields();
    let pk = txn.catalog().collection(collection)?.pk.clone();
    let mut cursor = IndexCursor::new(&pk);
    let mut stats = IndexBuildStats::default();

    loop {
        let (store, catalog) = txn.parts_mut();
        if !cursor.move_next(&*store)? {
            break;
        }
        let Some(pk_node) = cursor.current().cloned() else {
            break;
        };
        let data_block = data_block_of(&pk_node)?;
        let chained = pk_node.next_node;

        let doc = document::read_projected_fields(&*store, data_block, &fields)?;
        let keys = key_expr.evaluate_keys(&doc, collation)?;

        let col = catalog.collection_mut(collection)?;
        let mut service = IndexService::new(col, collation);
        let mut last = pk_node;
        let mut created = 0u64;
        for key in keys {
            let added = service.add_node(store, index, key, data_block, Some(&mut last))?;
            if let Some(page_id) = added.defragmented_page {
                stats.defragmentations += 1;
                if cursor
                    .current()
                    .is_some_and(|node| node.position.page_id == page_id)
                {
                    cursor.reload_current(&*store)?;
                }
            }
            // Only the identity of `last` is used, so it never needs a reload.
            last = added.node;
            created += 1;
        }
        if created > 0 {
            // The document's older nodes follow the new ones.
            write_next_node(store, last.position, chained)?;
        }

        stats.nodes += created;
        stats.documents += 1;

        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(TxnError::Cancelled.into());
        }
        if txn.safepoint() {
            txn.do_safepoint()?;
            stats.safepoints += 1;
        }
    }
    Ok(stats)
}
