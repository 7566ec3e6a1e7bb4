//! Public API: database handle, transactions, index builds and commands.

pub mod builders;
pub mod command;
pub mod create_index;
pub mod database;
pub mod lock_manager;
pub mod page_store;
pub mod transaction;

pub use builders::CreateIndexBuilder;
pub use command::{Command, CommandOutput};
pub use create_index::IndexBuildStats;
pub use database::SkipDB;
pub use transaction::Transaction;
