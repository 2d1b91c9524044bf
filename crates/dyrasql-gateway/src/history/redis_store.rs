//! Redis-backed history store
//!
//! ## Key Design
//! - `{prefix}:decision:{fingerprint}`: decision JSON, written with `SETEX`
//! - `{prefix}:metrics:{fingerprint}`: list of metric JSON, newest at the head
//!
//! Connection pooling via `redis::aio::ConnectionManager` (cloneable, reconnects on its own).

use async_trait::async_trait;
use dyrasql_common::{DyraError, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::store::{HistoryStore, MAX_METRICS_PER_FINGERPRINT};
use crate::model::{short_fingerprint, ExecutionMetric, RoutingDecision};

pub const DEFAULT_KEY_PREFIX: &str = "dyrasql";

pub struct RedisHistoryStore {
    redis: redis::aio::ConnectionManager,
    key_prefix: String,
}

fn unavailable(err: redis::RedisError) -> DyraError {
    DyraError::CacheUnavailable(err.to_string())
}

impl RedisHistoryStore {
    /// Connect to Redis, giving up after `connect_timeout`
    pub async fn connect(redis_url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| DyraError::Config(format!("invalid Redis URL: {}", e)))?;
        let redis = match tokio::time::timeout(connect_timeout, client.get_connection_manager()).await {
            Ok(connected) => connected.map_err(unavailable)?,
            Err(_) => {
                return Err(DyraError::CacheUnavailable(format!(
                    "connecting to Redis timed out after {:?}",
                    connect_timeout
                )))
            }
        };
        info!("History store connected to Redis: {}", redis_url);
        Ok(Self {
            redis,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        })
    }

    fn decision_key(&self, fingerprint: &str) -> String {
        format!("{}:decision:{}", self.key_prefix, fingerprint)
    }

    fn metrics_key(&self, fingerprint: &str) -> String {
        format!("{}:metrics:{}", self.key_prefix, fingerprint)
    }
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn get_decision(&self, fingerprint: &str) -> Result<Option<RoutingDecision>> {
        let key = self.decision_key(fingerprint);
        let mut conn = self.redis.clone();
        let raw = redis::cmd("GET")
            .arg(&key)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(unavailable)?;

        match raw {
            Some(json) => match serde_json::from_str::<RoutingDecision>(&json) {
                Ok(decision) => Ok(Some(decision)),
                Err(e) => {
                    // unreadable entries behave like a miss and get overwritten
                    warn!(key = %key, error = %e, "Discarding corrupt cached decision");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn put_decision(&self, decision: &RoutingDecision, ttl: Duration) -> Result<()> {
        let key = self.decision_key(&decision.fingerprint);
        let payload = serde_json::to_string(decision)?;
        let mut conn = self.redis.clone();
        redis::cmd("SETEX")
            .arg(&key)
            .arg(ttl.as_secs().max(1))
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(unavailable)?;
        debug!(fingerprint = short_fingerprint(&decision.fingerprint), ttl = ?ttl, "Cached decision");
        Ok(())
    }

    async fn append_metric(&self, metric: &ExecutionMetric) -> Result<()> {
        let key = self.metrics_key(&metric.fingerprint);
        let payload = serde_json::to_string(metric)?;
        let mut conn = self.redis.clone();
        redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(&key)
            .arg(payload)
            .ignore()
            .cmd("LTRIM")
            .arg(&key)
            .arg(0)
            .arg(MAX_METRICS_PER_FINGERPRINT as isize - 1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn recent_metrics(&self, fingerprint: &str, n: usize) -> Result<Vec<ExecutionMetric>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let key = self.metrics_key(fingerprint);
        let mut conn = self.redis.clone();
        let raw = redis::cmd("LRANGE")
            .arg(&key)
            .arg(0)
            .arg(n as isize - 1)
            .query_async::<Vec<String>>(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(raw
            .iter()
            .filter_map(|json| match serde_json::from_str::<ExecutionMetric>(json) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping corrupt execution metric");
                    None
                }
            })
            .collect())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
