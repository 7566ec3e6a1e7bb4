use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::error::{Error, ExpressionError, SchemaError};

use super::create_index::{IndexBuildStats, IndexRequest, build_index};
use super::database::SkipDB;

/// Builder for creating a secondary index.
///
/// ```no_run
/// # use skipdb_core::api::SkipDB;
/// # let db = SkipDB::open("my_database.db").unwrap();
/// let nodes = db
///     .create_index("users")
///     .name("by_email")
///     .expression("LOWER($.email)")
///     .unique(true)
///     .execute()
///     .unwrap();
/// ```
pub struct CreateIndexBuilder<'a> {
    db: &'a SkipDB,
    collection: String,
    name: Option<String>,
    expression: Option<String>,
    unique: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> CreateIndexBuilder<'a> {
    pub(crate) fn new(db: &'a SkipDB, collection: String) -> Self {
        Self {
            db,
            collection,
            name: None,
            expression: None,
            unique: false,
            cancel: None,
        }
    }

    /// Set the index name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set the key expression, e.g. `$.email` or `$.tags[*]`.
    pub fn expression(mut self, expression: &str) -> Self {
        self.expression = Some(expression.to_string());
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Abort the build when `flag` is set. Checked between documents.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Build the index. Returns the number of index nodes created.
    pub fn execute(self) -> Result<u64, Error> {
        Ok(self.execute_with_stats()?.nodes)
    }

    pub fn execute_with_stats(self) -> Result<IndexBuildStats, Error> {
        let name = self
            .name
            .ok_or_else(|| SchemaError::InvalidIndexName(String::new()))?;
        let expression = self.expression.ok_or(ExpressionError::Empty)?;
        let request = IndexRequest {
            collection: &self.collection,
            name: &name,
            expression: &expression,
            unique: self.unique,
        };
        build_index(self.db, &request, self.cancel.as_deref())
    }
}
