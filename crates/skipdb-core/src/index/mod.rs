//! Persistent skip-list indexes addressed by `(page, slot)`.

pub mod cursor;
pub mod node;
pub mod service;

pub use cursor::IndexCursor;
pub use node::{IndexLevel, IndexNode};
pub use service::{AddedNode, IndexIntegrity, IndexService};
