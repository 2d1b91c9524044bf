//! History Manager
//!
//! Decision cache plus execution history, in front of a [`HistoryStore`].
//!
//! Every store call is bounded by a timeout. Store failures never reach the
//! caller: lookups degrade to a miss (always compute fresh), writes and metric
//! recording are logged and dropped. Recording a metric never touches the
//! cached decision for the same fingerprint.

pub mod redis_store;
pub mod store;

use dyrasql_common::{DyraError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use redis_store::RedisHistoryStore;
pub use store::{HistoryStore, MemoryHistoryStore};

use crate::metrics;
use crate::model::{short_fingerprint, ExecutionMetric, RoutingDecision};

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    /// Store calls that failed or timed out
    pub errors: AtomicU64,
}

impl CacheStats {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_access("hit");
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_access("miss");
    }

    fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_access("error");
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

pub struct HistoryManager {
    store: Arc<dyn HistoryStore>,
    decision_ttl: Duration,
    store_timeout: Duration,
    stats: CacheStats,
}

impl HistoryManager {
    pub fn new(store: Arc<dyn HistoryStore>, decision_ttl: Duration, store_timeout: Duration) -> Self {
        Self {
            store,
            decision_ttl,
            store_timeout,
            stats: CacheStats::default(),
        }
    }

    /// TTL applied to freshly computed decisions
    pub fn decision_ttl(&self) -> Duration {
        self.decision_ttl
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    async fn bounded<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DyraError::CacheUnavailable(format!(
                "{} timed out after {:?}",
                op, self.store_timeout
            ))),
        }
    }

    /// Cached decision marked `cached = true`, or `None` on miss, expiry or store failure
    pub async fn get_decision(&self, fingerprint: &str) -> Option<RoutingDecision> {
        match self
            .bounded("get_decision", self.store.get_decision(fingerprint))
            .await
        {
            Ok(Some(mut decision)) if !decision.is_expired() => {
                self.stats.hit();
                decision.cached = true;
                debug!("Decision cache hit for {}", short_fingerprint(fingerprint));
                Some(decision)
            }
            Ok(_) => {
                self.stats.miss();
                None
            }
            Err(e) => {
                self.stats.error();
                warn!(
                    "History store ({}) lookup failed, computing fresh: {}",
                    self.store.backend(),
                    e
                );
                None
            }
        }
    }

    /// Replace the cached decision for the fingerprint
    pub async fn put_decision(&self, decision: &RoutingDecision, ttl: Duration) {
        let mut stored = decision.clone();
        stored.cached = false;
        if let Err(e) = self
            .bounded("put_decision", self.store.put_decision(&stored, ttl))
            .await
        {
            self.stats.error();
            warn!(
                "Failed to cache decision for {}: {}",
                short_fingerprint(&decision.fingerprint),
                e
            );
        }
    }

    /// Append an execution metric. Failures are logged and swallowed.
    pub async fn record_metric(&self, metric: &ExecutionMetric, channel: &str) {
        match self
            .bounded("append_metric", self.store.append_metric(metric))
            .await
        {
            Ok(()) => {
                metrics::record_execution_metric(channel, "ok");
                debug!(
                    "Recorded {} metric for {}: {:.2}s success={}",
                    channel,
                    short_fingerprint(&metric.fingerprint),
                    metric.execution_time,
                    metric.success
                );
            }
            Err(e) => {
                self.stats.error();
                metrics::record_execution_metric(channel, "error");
                warn!(
                    "Failed to record metric for {}: {}",
                    short_fingerprint(&metric.fingerprint),
                    e
                );
            }
        }
    }

    /// Up to `n` most recent metrics; empty on store failure
    pub async fn recent_metrics(&self, fingerprint: &str, n: usize) -> Vec<ExecutionMetric> {
        match self
            .bounded("recent_metrics", self.store.recent_metrics(fingerprint, n))
            .await
        {
            Ok(metrics) => metrics,
            Err(e) => {
                self.stats.error();
                warn!(
                    "Failed to load history for {}: {}",
                    short_fingerprint(fingerprint),
                    e
                );
                Vec::new()
            }
        }
    }
}
