//! Data models shared by sessions and the check binary.

pub mod query;

pub use query::{ColumnMetadata, QueryParam};
