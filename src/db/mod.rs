//! Database access layer.
//!
//! - Request scopes, sessions and cursors
//! - Transactions
//! - Session provider and request registry
//! - Pool construction
//! - Error classification, parameter binding and row conversion

pub mod classify;
pub mod cursor;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod provider;
pub mod registry;
pub mod scope;
pub mod session;
pub mod tx;
pub mod types;

pub use classify::{error_code, is_deadlocked, is_duplicate_key, is_no_rows};
pub use cursor::{Cursor, OneRow, RowIter};
pub use pool::{PoolStats, build_pool};
pub use provider::{RequestSession, SessionProvider};
pub use registry::{RequestMetadata, SessionRegistry};
pub use scope::RequestScope;
pub use session::Session;
pub use tx::{IsolationLevel, TxOptions};
pub use types::RowToJson;
