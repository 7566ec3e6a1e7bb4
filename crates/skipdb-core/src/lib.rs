//! # SkipDB
//!
//! An embedded, page-based document store with skip-list secondary indexes.
//!
//! Documents live in fixed-size pages of a single file. Every collection has
//! a primary-key index on `_id`; secondary indexes are built from key
//! expressions and kept as multi-level skip lists whose nodes are addressed
//! by `(page, slot)`. Writes go through transactions backed by a write-ahead
//! log, so an index build is either fully visible or not at all.
//!
//! ## Quick Start
//!
//! ```no_run
//! use skipdb_core::api::SkipDB;
//! use serde_json::json;
//!
//! let db = SkipDB::create("my_database.db").unwrap();
//! db.create_collection("users").unwrap();
//!
//! db.insert("users", json!({"_id": 1, "name": "Alice", "tags": ["admin", "ops"]}))
//!     .unwrap();
//!
//! // One node per tag.
//! let nodes = db
//!     .create_index("users")
//!     .name("by_tag")
//!     .expression("$.tags[*]")
//!     .execute()
//!     .unwrap();
//! assert_eq!(nodes, 2);
//!
//! let admins = db.find_by_index("users", "by_tag", &json!("admin")).unwrap();
//! assert_eq!(admins[0]["name"], "Alice");
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod document;
pub mod encoding;
pub mod error;
pub mod expr;
pub mod index;
pub mod storage;
pub mod types;
