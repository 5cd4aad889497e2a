//! Classification of MySQL errors.
//!
//! These helpers accept any error and walk its `source()` chain, so they work on
//! a bare `sqlx::Error`, on a `SessionError`, or on an application error that
//! wraps either.

use crate::error::SessionError;
use sqlx::mysql::MySqlDatabaseError;
use std::error::Error as StdError;

/// Duplicate entry for a unique key.
pub const ER_DUP_ENTRY: u16 = 1062;

/// Deadlock found when trying to get a lock.
pub const ER_LOCK_DEADLOCK: u16 = 1213;

fn mysql_code_of(err: &sqlx::Error) -> Option<u16> {
    match err {
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<MySqlDatabaseError>()
            .map(MySqlDatabaseError::number),
        _ => None,
    }
}

fn sqlx_of<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a sqlx::Error> {
    if let Some(err) = err.downcast_ref::<sqlx::Error>() {
        return Some(err);
    }
    err.downcast_ref::<SessionError>()
        .and_then(SessionError::as_sqlx)
}

/// The MySQL server error number carried anywhere in `err`'s chain, or 0.
pub fn error_code(err: &(dyn StdError + 'static)) -> u16 {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(code) = sqlx_of(err).and_then(mysql_code_of) {
            return code;
        }
        if let Some(db) = err.downcast_ref::<MySqlDatabaseError>() {
            return db.number();
        }
        current = err.source();
    }
    0
}

/// True when `err` is a duplicate key violation.
pub fn is_duplicate_key(err: &(dyn StdError + 'static)) -> bool {
    error_code(err) == ER_DUP_ENTRY
}

/// True when `err` is a deadlock reported by the server.
pub fn is_deadlocked(err: &(dyn StdError + 'static)) -> bool {
    error_code(err) == ER_LOCK_DEADLOCK
}

/// True when `err` reports that a single-row query found nothing.
pub fn is_no_rows(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if matches!(sqlx_of(err), Some(sqlx::Error::RowNotFound)) {
            return true;
        }
        current = err.source();
    }
    false
}
