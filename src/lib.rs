//! Request-scoped MySQL sessions.
//!
//! A [`SessionProvider`] owns one shared `sqlx` pool and gives every request
//! its own [`Session`]. A session allows one open cursor at a time, tracks at
//! most one transaction and closes its children when it is closed, so a
//! request cannot leak connections past its completion.

pub mod config;
pub mod db;
pub mod error;
pub mod fts;
pub mod models;

pub use config::{Config, MySqlConfig, PoolOptions};
pub use db::{
    Cursor, IsolationLevel, OneRow, PoolStats, RequestScope, RequestSession, RowIter, Session,
    SessionProvider, TxOptions,
};
pub use error::{ConfigError, SessionError, SessionResult};
pub use fts::{fts_cleanup, fts_word_break};
pub use models::{ColumnMetadata, QueryParam};
