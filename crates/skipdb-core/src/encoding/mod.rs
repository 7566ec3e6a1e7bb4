//! Index key representation and collation.

pub mod collation;
pub mod key;

pub use collation::Collation;
pub use key::IndexKey;
