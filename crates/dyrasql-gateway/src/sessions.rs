//! Query session affinity
//!
//! Maps a Trino query id to the cluster that accepted it, so follow-up
//! requests reach the same coordinator without re-running routing.
//!
//! # Session Lifecycle
//! 1. Created from the `id` of the initial statement response
//! 2. Touched by every follow-up request
//! 3. Evicted on the terminal page, on cancellation, or after idling too long

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::metrics;

#[derive(Debug, Clone)]
pub struct QuerySession {
    pub query_id: String,
    pub cluster_id: String,
    /// Fingerprint of the routed statement; absent for keepalives
    pub fingerprint: Option<String>,
    pub created_at: Instant,
    pub last_access: Instant,
}

impl QuerySession {
    pub fn new(query_id: impl Into<String>, cluster_id: impl Into<String>, fingerprint: Option<String>) -> Self {
        let now = Instant::now();
        Self {
            query_id: query_id.into(),
            cluster_id: cluster_id.into(),
            fingerprint,
            created_at: now,
            last_access: now,
        }
    }

    pub fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.last_access.elapsed() > idle_timeout
    }
}

/// Concurrent query id -> session table
pub struct SessionTable {
    sessions: DashMap<String, QuerySession>,
    idle_timeout: Duration,
}

impl SessionTable {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn insert(&self, session: QuerySession) {
        debug!(query_id = %session.query_id, cluster = %session.cluster_id, "Session opened");
        self.sessions.insert(session.query_id.clone(), session);
        metrics::set_active_sessions(self.sessions.len());
    }

    /// Look up a session and reset its idle timer
    pub fn touch(&self, query_id: &str) -> Option<QuerySession> {
        self.sessions.get_mut(query_id).map(|mut entry| {
            entry.last_access = Instant::now();
            entry.clone()
        })
    }

    pub fn evict(&self, query_id: &str) -> Option<QuerySession> {
        let removed = self.sessions.remove(query_id).map(|(_, s)| s);
        if removed.is_some() {
            debug!(query_id = %query_id, "Session closed");
            metrics::set_active_sessions(self.sessions.len());
        }
        removed
    }

    /// Drop sessions idle past the timeout, returning how many went
    pub fn sweep_idle(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|query_id, session| {
            if session.is_idle(self.idle_timeout) {
                info!(query_id = %query_id, "Dropping idle session (idle for {:?})", session.last_access.elapsed());
                false
            } else {
                true
            }
        });
        let removed = before.saturating_sub(self.sessions.len());
        metrics::set_active_sessions(self.sessions.len());
        removed
    }

    /// Periodic idle sweep; runs until the runtime shuts down
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let table = Arc::clone(self);
        let period = (table.idle_timeout / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let removed = table.sweep_idle();
                if removed > 0 {
                    info!("Session sweep removed {} idle sessions", removed);
                }
            }
        })
    }
}
