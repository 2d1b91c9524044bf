//! History store abstraction and the in-process implementation

use async_trait::async_trait;
use dashmap::DashMap;
use dyrasql_common::Result;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::model::{ExecutionMetric, RoutingDecision};

/// Metrics retained per fingerprint; only the newest few are ever read
pub const MAX_METRICS_PER_FINGERPRINT: usize = 100;

/// How long an in-process metric list survives without a new append
pub const DEFAULT_METRIC_RETENTION: Duration = Duration::from_secs(86_400);

/// Persistent decision cache and execution history
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Stored decision, or `None` when absent or expired
    async fn get_decision(&self, fingerprint: &str) -> Result<Option<RoutingDecision>>;

    /// Replace the decision for its fingerprint, expiring after `ttl`
    async fn put_decision(&self, decision: &RoutingDecision, ttl: Duration) -> Result<()>;

    async fn append_metric(&self, metric: &ExecutionMetric) -> Result<()>;

    /// Up to `n` metrics for the fingerprint, most recent first
    async fn recent_metrics(&self, fingerprint: &str, n: usize) -> Result<Vec<ExecutionMetric>>;

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}

struct StoredDecision {
    decision: RoutingDecision,
    expires_at: Instant,
}

struct MetricHistory {
    entries: VecDeque<ExecutionMetric>,
    last_append: Instant,
}

/// In-process store used when no Redis URL is configured.
///
/// Expired decisions and metric lists idle past the retention are only
/// reclaimed by [`MemoryHistoryStore::sweep`]; run it with
/// [`MemoryHistoryStore::spawn_sweeper`].
pub struct MemoryHistoryStore {
    decisions: DashMap<String, StoredDecision>,
    metrics: Mutex<HashMap<String, MetricHistory>>,
    metric_retention: Duration,
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_METRIC_RETENTION)
    }
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(metric_retention: Duration) -> Self {
        Self {
            decisions: DashMap::new(),
            metrics: Mutex::new(HashMap::new()),
            metric_retention,
        }
    }

    pub fn decision_count(&self) -> usize {
        self.decisions.len()
    }

    pub fn metric_key_count(&self) -> usize {
        self.metrics.lock().len()
    }

    /// Drop expired decisions and idle metric lists; returns (decisions, metric lists) removed
    pub fn sweep(&self) -> (usize, usize) {
        let now = Instant::now();

        let before = self.decisions.len();
        self.decisions.retain(|_, entry| entry.expires_at > now);
        let decisions_removed = before.saturating_sub(self.decisions.len());

        let mut metrics = self.metrics.lock();
        let before = metrics.len();
        let retention = self.metric_retention;
        metrics.retain(|_, history| now.duration_since(history.last_append) < retention);
        let metrics_removed = before.saturating_sub(metrics.len());

        (decisions_removed, metrics_removed)
    }

    /// Periodic sweep; runs until the runtime shuts down
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let (decisions, metrics) = store.sweep();
                if decisions + metrics > 0 {
                    info!(
                        "History sweep removed {} decisions and {} metric lists",
                        decisions, metrics
                    );
                }
            }
        })
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn get_decision(&self, fingerprint: &str) -> Result<Option<RoutingDecision>> {
        if let Some(entry) = self.decisions.get(fingerprint) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.decision.clone()));
            }
            // Expired, remove it
            drop(entry);
            self.decisions.remove(fingerprint);
        }
        Ok(None)
    }

    async fn put_decision(&self, decision: &RoutingDecision, ttl: Duration) -> Result<()> {
        self.decisions.insert(
            decision.fingerprint.clone(),
            StoredDecision {
                decision: decision.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn append_metric(&self, metric: &ExecutionMetric) -> Result<()> {
        let mut metrics = self.metrics.lock();
        let history = metrics
            .entry(metric.fingerprint.clone())
            .or_insert_with(|| MetricHistory {
                entries: VecDeque::new(),
                last_append: Instant::now(),
            });
        history.last_append = Instant::now();
        history.entries.push_front(metric.clone());
        history.entries.truncate(MAX_METRICS_PER_FINGERPRINT);
        Ok(())
    }

    async fn recent_metrics(&self, fingerprint: &str, n: usize) -> Result<Vec<ExecutionMetric>> {
        Ok(self
            .metrics
            .lock()
            .get(fingerprint)
            .map(|history| history.entries.iter().take(n).cloned().collect())
            .unwrap_or_default())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterTier;
    use crate::model::RoutingFactors;

    #[tokio::test]
    async fn test_decision_expires() {
        let store = MemoryHistoryStore::new();
        let d = RoutingDecision::new(
            "fp",
            "ecs",
            ClusterTier::Light,
            0.1,
            RoutingFactors::default(),
            Duration::from_secs(60),
        );
        store.put_decision(&d, Duration::from_millis(30)).await.unwrap();
        assert!(store.get_decision("fp").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get_decision("fp").await.unwrap().is_none());
        assert_eq!(store.decision_count(), 0);
    }

    #[tokio::test]
    async fn test_metrics_newest_first_and_bounded() {
        let store = MemoryHistoryStore::new();
        for i in 0..(MAX_METRICS_PER_FINGERPRINT + 5) {
            store
                .append_metric(&ExecutionMetric::new("fp", i as f64, true))
                .await
                .unwrap();
        }
        let recent = store.recent_metrics("fp", 3).await.unwrap();
        let times: Vec<f64> = recent.iter().map(|m| m.execution_time).collect();
        assert_eq!(times, vec![104.0, 103.0, 102.0]);
        assert_eq!(
            store.recent_metrics("fp", 1000).await.unwrap().len(),
            MAX_METRICS_PER_FINGERPRINT
        );
        assert!(store.recent_metrics("other", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_reclaims_expired_decisions_and_idle_metrics() {
        let store = MemoryHistoryStore::with_retention(Duration::from_millis(10));
        for i in 0..1000 {
            let fingerprint = format!("fp-{}", i);
            let d = RoutingDecision::new(
                fingerprint.clone(),
                "ecs",
                ClusterTier::Light,
                0.1,
                RoutingFactors::default(),
                Duration::from_secs(60),
            );
            store.put_decision(&d, Duration::from_millis(1)).await.unwrap();
            store
                .append_metric(&ExecutionMetric::new(fingerprint, 1.0, true))
                .await
                .unwrap();
        }
        let live = RoutingDecision::new(
            "live",
            "ecs",
            ClusterTier::Light,
            0.1,
            RoutingFactors::default(),
            Duration::from_secs(60),
        );
        store.put_decision(&live, Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.decision_count(), 1001);
        assert_eq!(store.metric_key_count(), 1000);

        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .append_metric(&ExecutionMetric::new("fresh", 2.0, true))
            .await
            .unwrap();

        assert_eq!(store.sweep(), (1000, 1000));
        assert_eq!(store.decision_count(), 1);
        assert_eq!(store.metric_key_count(), 1);
        assert!(store.get_decision("live").await.unwrap().is_some());
        assert_eq!(store.recent_metrics("fresh", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_sweeper_runs() {
        let store = Arc::new(MemoryHistoryStore::with_retention(Duration::from_millis(5)));
        store
            .append_metric(&ExecutionMetric::new("fp", 1.0, true))
            .await
            .unwrap();
        let sweeper = store.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.abort();
        assert_eq!(store.metric_key_count(), 0);
    }
}
