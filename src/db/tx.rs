//! Transaction handles.
//!
//! A `TxHandle` owns the pooled connection a transaction runs on. It is moved
//! into cursor tasks while rows stream and handed back afterwards, so it is a
//! plain owned value rather than a borrow of the session.

use crate::db::scope::RequestScope;
use crate::error::{ConfigError, SessionError, SessionResult};
use sqlx::pool::PoolConnection;
use sqlx::{Executor, MySql, MySqlConnection, MySqlPool};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for a rollback, which runs even after the scope has ended.
const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Keyword form used by `SET TRANSACTION ISOLATION LEVEL`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    /// Value form used by the `transaction_isolation` system variable.
    pub fn as_variable(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ-UNCOMMITTED",
            Self::ReadCommitted => "READ-COMMITTED",
            Self::RepeatableRead => "REPEATABLE-READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_variable())
    }
}

impl FromStr for IsolationLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "READ UNCOMMITTED" => Ok(Self::ReadUncommitted),
            "READ COMMITTED" => Ok(Self::ReadCommitted),
            "REPEATABLE READ" => Ok(Self::RepeatableRead),
            "SERIALIZABLE" => Ok(Self::Serializable),
            _ => Err(ConfigError::InvalidIsolation {
                value: s.to_string(),
            }),
        }
    }
}

/// Options for `Session::begin_tx`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// Isolation for this transaction only; the connection default otherwise.
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

impl TxOptions {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn start_statement(&self) -> &'static str {
        if self.read_only {
            "START TRANSACTION READ ONLY"
        } else {
            "START TRANSACTION"
        }
    }
}

/// An open transaction and the connection it runs on.
pub(crate) struct TxHandle {
    conn: Option<PoolConnection<MySql>>,
}

impl fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle")
            .field("open", &self.conn.is_some())
            .finish()
    }
}

impl TxHandle {
    /// Acquire a connection and start a transaction on it.
    pub(crate) async fn begin(
        pool: &MySqlPool,
        options: TxOptions,
        scope: &RequestScope,
    ) -> SessionResult<Self> {
        let mut conn = scope.run(pool.acquire()).await?;

        let started = scope
            .run(async {
                if let Some(level) = options.isolation {
                    let set = format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql());
                    (&mut *conn).execute(set.as_str()).await?;
                }
                (&mut *conn).execute(options.start_statement()).await
            })
            .await;

        if let Err(e) = started {
            // The connection may be mid-statement; never hand it back to the pool.
            conn.close_on_drop();
            return Err(e);
        }

        debug!(
            isolation = ?options.isolation,
            read_only = options.read_only,
            "Transaction started"
        );
        Ok(Self { conn: Some(conn) })
    }

    pub(crate) fn conn_mut(&mut self) -> SessionResult<&mut MySqlConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| SessionError::internal("transaction connection already released"))
    }

    /// Commit. On failure the handle stays usable for a rollback.
    pub(crate) async fn commit(&mut self, scope: &RequestScope) -> SessionResult<()> {
        let conn = self.conn_mut()?;
        scope.run(conn.execute("COMMIT")).await?;
        // The connection is clean again.
        self.conn = None;
        debug!("Transaction committed");
        Ok(())
    }

    /// Commit the work so far and immediately open a new transaction on the
    /// same connection.
    pub(crate) async fn partial_commit(&mut self, scope: &RequestScope) -> SessionResult<()> {
        let conn = self.conn_mut()?;
        scope
            .run(conn.execute("COMMIT AND CHAIN NO RELEASE"))
            .await?;
        debug!("Transaction partially committed");
        Ok(())
    }

    /// Roll back and release the connection, whatever the outcome.
    pub(crate) async fn rollback(mut self) -> SessionResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let res = rollback_conn(&mut conn).await;
        if res.is_err() {
            conn.close_on_drop();
        }
        res
    }
}

async fn rollback_conn(conn: &mut PoolConnection<MySql>) -> SessionResult<()> {
    match tokio::time::timeout(
        ROLLBACK_TIMEOUT,
        (&mut **conn).execute("ROLLBACK"),
    )
    .await
    {
        Ok(res) => {
            res?;
            debug!("Transaction rolled back");
            Ok(())
        }
        Err(_) => Err(SessionError::DeadlineExceeded),
    }
}

impl Drop for TxHandle {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Transaction dropped while open, rolling back in background");
                handle.spawn(async move {
                    if let Err(e) = rollback_conn(&mut conn).await {
                        warn!(error = %e, "Background rollback failed, closing connection");
                        conn.close_on_drop();
                    }
                });
            }
            Err(_) => {
                // Without a runtime the connection cannot be cleaned; the server
                // rolls back when the socket closes.
                warn!("Transaction dropped outside a runtime, discarding connection");
                drop(conn.detach());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_parsing() {
        assert_eq!(
            "REPEATABLE-READ".parse::<IsolationLevel>(),
            Ok(IsolationLevel::RepeatableRead)
        );
        assert_eq!(
            "read committed".parse::<IsolationLevel>(),
            Ok(IsolationLevel::ReadCommitted)
        );
        assert_eq!(
            "Serializable".parse::<IsolationLevel>(),
            Ok(IsolationLevel::Serializable)
        );
        assert!(matches!(
            "SNAPSHOT".parse::<IsolationLevel>(),
            Err(ConfigError::InvalidIsolation { .. })
        ));
    }

    #[test]
    fn test_isolation_level_forms() {
        let level = IsolationLevel::ReadUncommitted;
        assert_eq!(level.as_sql(), "READ UNCOMMITTED");
        assert_eq!(level.to_string(), "READ-UNCOMMITTED");
    }

    #[test]
    fn test_tx_options_builder() {
        let opts = TxOptions::default()
            .isolation(IsolationLevel::Serializable)
            .read_only();
        assert_eq!(opts.isolation, Some(IsolationLevel::Serializable));
        assert!(opts.read_only);
        assert_eq!(opts.start_statement(), "START TRANSACTION READ ONLY");
        assert_eq!(TxOptions::default().start_statement(), "START TRANSACTION");
    }
}
