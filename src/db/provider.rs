//! Session provider: one shared pool, one root session per request.
//!
//! The provider opens the pool once and hands every request a
//! [`RequestSession`]. Completing the request closes its session tree, which
//! only ever rolls back; commits must be explicit. Requests that are dropped
//! without completing are closed in the background.

use crate::config::MySqlConfig;
use crate::db::pool::{PoolStats, build_pool};
use crate::db::registry::{RequestMetadata, SessionRegistry, retire};
use crate::db::scope::RequestScope;
use crate::db::session::Session;
use crate::error::{SessionError, SessionResult};
use sqlx::MySqlPool;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long `shutdown` waits for the pool to close.
pub const SHUTDOWN_BUDGET: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct SessionProvider {
    pool: MySqlPool,
    registry: Arc<SessionRegistry>,
    reaper_stop: CancellationToken,
    /// False when the pool was handed in by the caller, who then owns it.
    close_on_shutdown: bool,
}

impl std::fmt::Debug for SessionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProvider")
            .field("stats", &self.stats())
            .field("close_on_shutdown", &self.close_on_shutdown)
            .finish()
    }
}

impl SessionProvider {
    /// Validate `config` and open the pool.
    ///
    /// Validation resolves the host, so it runs on the blocking pool.
    pub async fn connect(mut config: MySqlConfig) -> SessionResult<Self> {
        let config = tokio::task::spawn_blocking(move || config.validate().map(|()| config))
            .await
            .map_err(|e| SessionError::internal(format!("config validation task failed: {e}")))??;
        let pool = build_pool(&config).await?;
        Ok(Self {
            close_on_shutdown: true,
            ..Self::from_pool(pool)
        })
    }

    /// Serve sessions from an existing pool. `shutdown` leaves it open.
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self {
            pool,
            registry: Arc::new(SessionRegistry::new()),
            reaper_stop: CancellationToken::new(),
            close_on_shutdown: false,
        }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats::of(&self.pool)
    }

    /// Create the root session for a request bound to `scope`.
    pub async fn open_request(&self, scope: RequestScope) -> RequestSession {
        let session = Session::new(self.pool.clone(), scope);
        let request_id = self.registry.register(session.clone()).await;
        debug!(request_id = %request_id, "Request opened");
        RequestSession {
            request_id,
            session,
            registry: Arc::clone(&self.registry),
            completed: false,
        }
    }

    /// Open a request, run `body` with its session and complete the request,
    /// whatever `body` returns.
    pub async fn with_request<F, Fut, T>(&self, scope: RequestScope, body: F) -> T
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = T>,
    {
        let request = self.open_request(scope).await;
        let output = body(request.session().clone()).await;
        request.complete().await;
        output
    }

    /// The root session of a live request.
    pub async fn managed_session(&self, request_id: &str) -> Option<Session> {
        self.registry.get(request_id).await
    }

    pub async fn list_requests(&self) -> Vec<RequestMetadata> {
        self.registry.list_all().await
    }

    /// Complete requests still open after `max_ttl`. Zero disables reaping.
    pub fn start_reaper(&self, max_ttl: Duration) -> Option<JoinHandle<()>> {
        Arc::clone(&self.registry).start_reaper(max_ttl, self.reaper_stop.child_token())
    }

    /// Stop the reaper, close every live request and, if the provider opened
    /// the pool, close it within [`SHUTDOWN_BUDGET`].
    pub async fn shutdown(&self) -> SessionResult<()> {
        self.reaper_stop.cancel();

        let live = self.registry.drain().await;
        if !live.is_empty() {
            warn!(count = live.len(), "Closing requests still open at shutdown");
        }
        for (request_id, session) in live {
            retire(&request_id, &session).await;
        }

        if !self.close_on_shutdown {
            return Ok(());
        }
        match tokio::time::timeout(SHUTDOWN_BUDGET, self.pool.close()).await {
            Ok(()) => {
                info!("MySQL pool closed");
                Ok(())
            }
            Err(_) => {
                let stats = self.stats();
                warn!(
                    in_use = stats.in_use,
                    budget_ms = SHUTDOWN_BUDGET.as_millis() as u64,
                    "MySQL pool did not close in time"
                );
                Err(SessionError::ShutdownIncomplete {
                    budget_ms: SHUTDOWN_BUDGET.as_millis() as u64,
                })
            }
        }
    }
}

/// The root session of one request.
///
/// Call [`complete`](Self::complete) when the request ends. Dropping the
/// guard instead cancels the request scope and closes the session tree on a
/// background task.
pub struct RequestSession {
    request_id: String,
    session: Session,
    registry: Arc<SessionRegistry>,
    completed: bool,
}

impl RequestSession {
    pub fn id(&self) -> &str {
        &self.request_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Close the request's session tree and forget the request.
    pub async fn complete(mut self) {
        self.completed = true;
        finish(&self.registry, &self.request_id, &self.session).await;
    }
}

async fn finish(registry: &SessionRegistry, request_id: &str, session: &Session) {
    // Reaper or shutdown may already have taken it.
    if registry.remove(request_id).await.is_some() {
        retire(request_id, session).await;
    }
}

impl Deref for RequestSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl std::fmt::Debug for RequestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSession")
            .field("request_id", &self.request_id)
            .field("completed", &self.completed)
            .finish()
    }
}

impl Drop for RequestSession {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        warn!(request_id = %self.request_id, "Request dropped without completing");
        self.session.scope().cancel();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let registry = Arc::clone(&self.registry);
                let request_id = std::mem::take(&mut self.request_id);
                let session = self.session.clone();
                handle.spawn(async move {
                    finish(&registry, &request_id, &session).await;
                });
            }
            Err(_) => {
                warn!(
                    request_id = %self.request_id,
                    "No runtime to close dropped request; connections return when the session is freed"
                );
            }
        }
    }
}
