//! Cursor wrappers.
//!
//! A [`Cursor`] streams the rows of one query from a background task through a
//! bounded channel. The session that opened it keeps a [`CursorTracker`] to the
//! same shared state, so it can see whether the cursor is closed and can close
//! it itself without touching the driver.

use crate::db::params::build_query;
use crate::db::scope::RequestScope;
use crate::db::tx::TxHandle;
use crate::db::types::RowToJson;
use crate::error::{SessionError, SessionResult};
use crate::models::{ColumnMetadata, QueryParam};
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use sqlx::mysql::MySqlRow;
use sqlx::{ColumnIndex, Decode, FromRow, MySql, MySqlPool, Row, Type};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Rows buffered ahead of the reader.
const ROW_BUFFER: usize = 16;

/// State shared between a cursor, its streaming task and the owning session.
#[derive(Debug)]
pub(crate) struct CursorTracker {
    closed: AtomicBool,
    stop: Notify,
    finished: CancellationToken,
    origin: String,
}

impl CursorTracker {
    fn new(origin: String) -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
            stop: Notify::new(),
            finished: CancellationToken::new(),
            origin,
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn origin(&self) -> &str {
        &self.origin
    }

    /// Mark closed and stop the streaming task. Returns false if already closed.
    pub(crate) fn signal_close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.stop.notify_one();
        }
        first
    }

    /// Stop the streaming task without marking the cursor closed. The owner
    /// still has to close it before the session opens another cursor.
    pub(crate) fn stop_stream(&self) {
        self.stop.notify_one();
    }

    /// Wait until the streaming task has released its connection.
    pub(crate) async fn finished(&self) {
        self.finished.cancelled().await;
    }
}

/// Where a cursor's rows come from.
pub(crate) enum Lane {
    Pool(MySqlPool),
    /// A lent transaction, returned through the sender once streaming stops.
    Tx(TxHandle, oneshot::Sender<TxHandle>),
}

/// A multi-row query result.
///
/// Closing is idempotent. Dropping an unclosed cursor closes it.
pub struct Cursor {
    rows: mpsc::Receiver<SessionResult<MySqlRow>>,
    peeked: Option<MySqlRow>,
    tracker: Arc<CursorTracker>,
    task: Option<JoinHandle<()>>,
}

impl Cursor {
    /// Start streaming `sql` on `lane` and wait for the first row.
    ///
    /// Errors raised before the first row (bad SQL, pool timeout, scope end)
    /// are returned here instead of from `next`.
    pub(crate) async fn open(
        lane: Lane,
        sql: String,
        params: Vec<QueryParam>,
        scope: RequestScope,
        origin: String,
    ) -> SessionResult<Self> {
        let (tx, rx) = mpsc::channel(ROW_BUFFER);
        let tracker = CursorTracker::new(origin);
        let task = tokio::spawn(stream_rows(lane, sql, params, scope, tx, tracker.clone()));

        let mut cursor = Self {
            rows: rx,
            peeked: None,
            tracker,
            task: Some(task),
        };

        match cursor.rows.recv().await {
            Some(Ok(row)) => cursor.peeked = Some(row),
            Some(Err(e)) => {
                cursor.close().await?;
                return Err(e);
            }
            None => {}
        }
        Ok(cursor)
    }

    pub(crate) fn tracker(&self) -> Arc<CursorTracker> {
        self.tracker.clone()
    }

    /// Next row, or `None` once the result is exhausted or the cursor closed.
    pub async fn next(&mut self) -> SessionResult<Option<MySqlRow>> {
        if self.tracker.is_closed() {
            return Ok(None);
        }
        if let Some(row) = self.peeked.take() {
            return Ok(Some(row));
        }
        match self.rows.recv().await {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Read every remaining row.
    pub async fn collect(&mut self) -> SessionResult<Vec<MySqlRow>> {
        let mut out = Vec::new();
        while let Some(row) = self.next().await? {
            out.push(row);
        }
        Ok(out)
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Where this cursor was opened, as `file:line:col`.
    pub fn origin(&self) -> &str {
        self.tracker.origin()
    }

    /// Stop streaming and release the connection. Safe to call repeatedly.
    pub async fn close(&mut self) -> SessionResult<()> {
        self.tracker.signal_close();
        self.rows.close();
        self.peeked = None;
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| SessionError::internal(format!("cursor task failed: {e}")))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("origin", &self.tracker.origin())
            .field("closed", &self.tracker.is_closed())
            .finish()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.tracker.signal_close() {
            debug!(origin = %self.tracker.origin(), "Cursor dropped without close");
        }
    }
}

async fn stream_rows(
    lane: Lane,
    sql: String,
    params: Vec<QueryParam>,
    scope: RequestScope,
    out: mpsc::Sender<SessionResult<MySqlRow>>,
    tracker: Arc<CursorTracker>,
) {
    let _finished = tracker.finished.clone().drop_guard();

    match lane {
        Lane::Pool(pool) => {
            let mut rows = build_query(&sql, params).fetch(&pool);
            pump(&mut rows, &scope, &out, &tracker).await;
        }
        Lane::Tx(mut handle, back) => {
            match handle.conn_mut() {
                Ok(conn) => {
                    let mut rows = build_query(&sql, params).fetch(conn);
                    pump(&mut rows, &scope, &out, &tracker).await;
                }
                Err(e) => {
                    let _ = out.send(Err(e)).await;
                }
            }
            // A dropped receiver means the session is gone; dropping the
            // handle then rolls the transaction back.
            let _ = back.send(handle);
        }
    }
}

async fn pump(
    rows: &mut BoxStream<'_, Result<MySqlRow, sqlx::Error>>,
    scope: &RequestScope,
    out: &mpsc::Sender<SessionResult<MySqlRow>>,
    tracker: &CursorTracker,
) {
    loop {
        if tracker.is_closed() {
            return;
        }
        let permit = tokio::select! {
            biased;
            _ = tracker.stop.notified() => return,
            permit = out.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };
        let item = tokio::select! {
            biased;
            _ = tracker.stop.notified() => return,
            item = scope.run(rows.try_next()) => item,
        };
        match item {
            Ok(Some(row)) => permit.send(Ok(row)),
            Ok(None) => return,
            Err(e) => {
                permit.send(Err(e));
                return;
            }
        }
    }
}

/// Result of a single-row query.
///
/// Acquisition never fails; a precondition failure or driver error is
/// reported by every accessor instead.
pub enum OneRow {
    Ready(MySqlRow),
    Missing,
    Failed(SessionError),
}

impl fmt::Debug for OneRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(_) => f.write_str("Ready(..)"),
            Self::Missing => f.write_str("Missing"),
            Self::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

impl OneRow {
    /// The deferred error, if any. `Missing` reports `RowNotFound`.
    pub fn err(&self) -> Option<SessionError> {
        match self {
            Self::Ready(_) => None,
            Self::Missing => Some(sqlx::Error::RowNotFound.into()),
            Self::Failed(e) => Some(e.clone()),
        }
    }

    fn row(&self) -> SessionResult<&MySqlRow> {
        match self {
            Self::Ready(row) => Ok(row),
            Self::Missing => Err(sqlx::Error::RowNotFound.into()),
            Self::Failed(e) => Err(e.clone()),
        }
    }

    /// Decode one column.
    pub fn try_get<'r, T, I>(&'r self, index: I) -> SessionResult<T>
    where
        I: ColumnIndex<MySqlRow>,
        T: Decode<'r, MySql> + Type<MySql>,
    {
        Ok(self.row()?.try_get(index)?)
    }

    /// Decode the whole row, e.g. into a tuple or a `FromRow` struct.
    pub fn scan<'r, T>(&'r self) -> SessionResult<T>
    where
        T: FromRow<'r, MySqlRow>,
    {
        Ok(T::from_row(self.row()?)?)
    }

    pub fn columns(&self) -> SessionResult<Vec<String>> {
        Ok(self
            .row()?
            .column_metadata()
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    pub fn column_metadata(&self) -> SessionResult<Vec<ColumnMetadata>> {
        Ok(self.row()?.column_metadata())
    }

    pub fn to_json_map(&self) -> SessionResult<serde_json::Map<String, serde_json::Value>> {
        Ok(self.row()?.to_json_map())
    }

    pub fn into_row(self) -> SessionResult<MySqlRow> {
        match self {
            Self::Ready(row) => Ok(row),
            Self::Missing => Err(sqlx::Error::RowNotFound.into()),
            Self::Failed(e) => Err(e),
        }
    }
}

/// Deferred multi-row query that always closes its cursor.
pub struct RowIter<'a> {
    open: std::pin::Pin<Box<dyn Future<Output = SessionResult<Cursor>> + Send + 'a>>,
}

impl<'a> RowIter<'a> {
    pub(crate) fn new(open: impl Future<Output = SessionResult<Cursor>> + Send + 'a) -> Self {
        Self {
            open: Box::pin(open),
        }
    }

    /// Call `f` for every row until the rows run out or an error occurs.
    ///
    /// Errors from opening the cursor are reported before any row is seen.
    /// The first error from `f` or the driver stops iteration and is returned.
    pub async fn for_each<F, E>(self, mut f: F) -> Result<(), E>
    where
        F: FnMut(MySqlRow) -> Result<(), E>,
        E: From<SessionError>,
    {
        let mut cursor = self.open.await?;
        let res = loop {
            match cursor.next().await {
                Ok(Some(row)) => {
                    if let Err(e) = f(row) {
                        break Err(e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(E::from(e)),
            }
        };
        let closed = cursor.close().await;
        res?;
        closed.map_err(E::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_close_is_idempotent() {
        let tracker = CursorTracker::new("src/lib.rs:1:1".to_string());
        assert!(!tracker.is_closed());
        assert!(tracker.signal_close());
        assert!(!tracker.signal_close());
        assert!(tracker.is_closed());
        assert_eq!(tracker.origin(), "src/lib.rs:1:1");
    }

    #[test]
    fn test_one_row_failed_reports_on_every_accessor() {
        let row = OneRow::Failed(SessionError::rows_not_closed("src/a.rs:3:7"));
        assert!(matches!(row.err(), Some(SessionError::RowsNotClosed { .. })));
        assert!(matches!(
            row.try_get::<i64, _>(0),
            Err(SessionError::RowsNotClosed { .. })
        ));
        assert!(matches!(
            row.scan::<(i64,)>(),
            Err(SessionError::RowsNotClosed { .. })
        ));
        assert!(matches!(row.columns(), Err(SessionError::RowsNotClosed { .. })));
        assert!(matches!(
            row.column_metadata(),
            Err(SessionError::RowsNotClosed { .. })
        ));
        assert!(matches!(
            row.to_json_map(),
            Err(SessionError::RowsNotClosed { .. })
        ));
        assert!(matches!(
            row.into_row(),
            Err(SessionError::RowsNotClosed { .. })
        ));
    }

    #[test]
    fn test_one_row_missing_is_no_rows() {
        let row = OneRow::Missing;
        let err = row.err().expect("missing row reports an error");
        assert!(crate::db::classify::is_no_rows(&err));
    }

    #[test]
    fn test_stop_stream_leaves_cursor_open() {
        let tracker = CursorTracker::new("src/b.rs:9:1".to_string());
        tracker.stop_stream();
        assert!(!tracker.is_closed());
        assert!(tracker.signal_close());
    }

    #[tokio::test]
    async fn test_finished_resolves_after_guard_drops() {
        let tracker = CursorTracker::new("here".to_string());
        let guard = tracker.finished.clone().drop_guard();
        drop(guard);
        tracker.finished().await;
    }
}
