//! Registry of live request sessions.
//!
//! The provider records the root session of every open request here so it can
//! be looked up by request id, listed, and reaped if the request outlives its
//! time-to-live without being completed.

use crate::db::session::Session;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on how often the reaper looks for expired requests.
const REAPER_INTERVAL: Duration = Duration::from_secs(5);

struct RegistryEntry {
    session: Session,
    created_at: Instant,
}

/// Metadata about a live request (for listing without touching its session).
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    pub request_id: String,
    /// When the request started (absolute time)
    pub started_at: DateTime<Utc>,
    /// Seconds since the request started
    pub age_secs: u64,
}

pub struct SessionRegistry {
    requests: RwLock<HashMap<String, RegistryEntry>>,
    /// System start time for converting Instant to DateTime
    system_start_instant: Instant,
    /// System start time as UTC DateTime
    system_start_datetime: DateTime<Utc>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            system_start_instant: Instant::now(),
            system_start_datetime: Utc::now(),
        }
    }

    /// Register `session` under a fresh request id.
    pub async fn register(&self, session: Session) -> String {
        let request_id = generate_request_id();
        let entry = RegistryEntry {
            session,
            created_at: Instant::now(),
        };
        self.requests.write().await.insert(request_id.clone(), entry);
        debug!(request_id = %request_id, "Request registered");
        request_id
    }

    /// The root session of a live request.
    pub async fn get(&self, request_id: &str) -> Option<Session> {
        self.requests
            .read()
            .await
            .get(request_id)
            .map(|entry| entry.session.clone())
    }

    /// Remove a request, returning its session if it was still registered.
    pub async fn remove(&self, request_id: &str) -> Option<Session> {
        self.requests
            .write()
            .await
            .remove(request_id)
            .map(|entry| entry.session)
    }

    /// List all live requests with their metadata.
    pub async fn list_all(&self) -> Vec<RequestMetadata> {
        let requests = self.requests.read().await;
        requests
            .iter()
            .map(|(id, entry)| {
                // Convert Instant to DateTime by calculating offset from system start
                let offset_from_start = entry.created_at.duration_since(self.system_start_instant);
                RequestMetadata {
                    request_id: id.clone(),
                    started_at: self.system_start_datetime + offset_from_start,
                    age_secs: entry.created_at.elapsed().as_secs(),
                }
            })
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Remove and return every live request.
    pub async fn drain(&self) -> Vec<(String, Session)> {
        self.requests
            .write()
            .await
            .drain()
            .map(|(id, entry)| (id, entry.session))
            .collect()
    }

    /// Remove and return every request older than `max_ttl`.
    async fn take_expired(&self, max_ttl: Duration) -> Vec<(String, Session)> {
        let mut requests = self.requests.write().await;
        let expired_ids: Vec<String> = requests
            .iter()
            .filter(|(_, entry)| entry.created_at.elapsed() > max_ttl)
            .map(|(id, _)| id.clone())
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|id| requests.remove(&id).map(|entry| (id, entry.session)))
            .collect()
    }

    /// Complete every request older than `max_ttl`. Returns how many were reaped.
    pub async fn reap_expired(&self, max_ttl: Duration) -> usize {
        let expired = self.take_expired(max_ttl).await;
        let count = expired.len();
        for (request_id, session) in expired {
            warn!(
                request_id = %request_id,
                max_ttl_secs = max_ttl.as_secs(),
                "Reaping request that exceeded its time-to-live"
            );
            retire(&request_id, &session).await;
        }
        count
    }

    /// Start a background task that reaps expired requests until `stop` fires.
    ///
    /// A zero `max_ttl` means requests never expire; no task is started.
    pub fn start_reaper(
        self: Arc<Self>,
        max_ttl: Duration,
        stop: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if max_ttl.is_zero() {
            return None;
        }
        let period = max_ttl.min(REAPER_INTERVAL);
        info!(
            max_ttl_secs = max_ttl.as_secs(),
            period_ms = period.as_millis() as u64,
            "Starting request reaper"
        );
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        self.reap_expired(max_ttl).await;
                    }
                }
            }
            debug!("Request reaper stopped");
        }))
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// End a request: cancel its scope so in-flight work lets go of the session,
/// then close the session tree and log whatever failed.
pub(crate) async fn retire(request_id: &str, session: &Session) {
    session.scope().cancel();
    let errors = session.close().await;
    if errors.is_empty() {
        debug!(request_id = %request_id, "Request session closed");
        return;
    }
    for e in &errors {
        error!(request_id = %request_id, error = %e, "Error closing request session");
    }
}

/// Generate a unique request ID.
fn generate_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}
