//! Query Router - picks the execution cluster for a statement
//!
//! Flow for one statement:
//! - keepalive probes go straight to the light cluster, never analyzed or cached
//! - otherwise normalize, then consult the decision cache by fingerprint
//! - on a miss: analyze, load recent history, score, cache the new decision

use dyrasql_common::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::analyzer::{is_keepalive, NormalizedQuery, QueryAnalyzer};
use crate::cluster::{ClusterProfile, ClusterRegistry, ClusterTier};
use crate::decision_engine::{DecisionEngine, HISTORY_WINDOW};
use crate::history::HistoryManager;
use crate::metrics;
use crate::model::{short_fingerprint, QueryAnalysis, RoutingDecision, RoutingFactors};

/// How a decision was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Keepalive,
    Cached,
    Metadata,
    Computed,
}

impl RouteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteSource::Keepalive => "keepalive",
            RouteSource::Cached => "cached",
            RouteSource::Metadata => "metadata",
            RouteSource::Computed => "computed",
        }
    }
}

/// Outcome of routing one statement
#[derive(Debug, Clone)]
pub struct Route {
    pub decision: RoutingDecision,
    /// Present only when the statement was analyzed on this request
    pub analysis: Option<QueryAnalysis>,
    pub source: RouteSource,
}

impl Route {
    pub fn is_keepalive(&self) -> bool {
        self.source == RouteSource::Keepalive
    }
}

pub struct QueryRouter {
    analyzer: QueryAnalyzer,
    engine: DecisionEngine,
    history: Arc<HistoryManager>,
    clusters: Arc<ClusterRegistry>,
}

impl QueryRouter {
    pub fn new(
        analyzer: QueryAnalyzer,
        engine: DecisionEngine,
        history: Arc<HistoryManager>,
        clusters: Arc<ClusterRegistry>,
    ) -> Self {
        Self {
            analyzer,
            engine,
            history,
            clusters,
        }
    }

    pub fn clusters(&self) -> &ClusterRegistry {
        &self.clusters
    }

    pub fn history(&self) -> &Arc<HistoryManager> {
        &self.history
    }

    /// Cluster profile for a decision; unknown ids (stale cache entries) fall back to the lightest
    pub fn cluster_for(&self, decision: &RoutingDecision) -> &ClusterProfile {
        self.clusters.get_or_lightest(&decision.cluster_id)
    }

    /// Route a raw statement. Fails only with `QuerySyntax`.
    pub async fn route(&self, sql: &str) -> Result<Route> {
        let query = NormalizedQuery::new(sql)?;

        if is_keepalive(sql) {
            let light = self.clusters.lightest();
            debug!("Keepalive routed to {}", light.id);
            metrics::record_routing_decision(&light.id, RouteSource::Keepalive.as_str(), 0.0);
            return Ok(Route {
                decision: RoutingDecision::new(
                    query.fingerprint,
                    light.id.clone(),
                    ClusterTier::Light,
                    0.0,
                    RoutingFactors::default(),
                    self.history.decision_ttl(),
                ),
                analysis: None,
                source: RouteSource::Keepalive,
            });
        }

        if let Some(decision) = self.history.get_decision(&query.fingerprint).await {
            metrics::record_routing_decision(
                &decision.cluster_id,
                RouteSource::Cached.as_str(),
                decision.score,
            );
            debug!(
                "Cached route for {} -> {}",
                short_fingerprint(&decision.fingerprint),
                decision.cluster_id
            );
            return Ok(Route {
                decision,
                analysis: None,
                source: RouteSource::Cached,
            });
        }

        let analysis = self.analyzer.analyze_normalized(&query).await?;
        let history = self
            .history
            .recent_metrics(&query.fingerprint, HISTORY_WINDOW)
            .await;
        let scored = self.engine.decide(&analysis, &history);
        let cluster = self.clusters.for_tier(scored.tier);

        let mut decision = RoutingDecision::new(
            query.fingerprint.clone(),
            cluster.id.clone(),
            scored.tier,
            scored.score,
            scored.factors,
            self.history.decision_ttl(),
        );
        decision.analysis_degraded = analysis.is_degraded();
        self.history
            .put_decision(&decision, self.history.decision_ttl())
            .await;

        let source = if analysis.is_metadata_query {
            RouteSource::Metadata
        } else {
            RouteSource::Computed
        };
        metrics::record_routing_decision(&cluster.id, source.as_str(), decision.score);
        info!(
            "Routed {} to {} ({}): score={:.3} volume={:.2} complexity={:.2} historical={:.2} degraded={}",
            short_fingerprint(&decision.fingerprint),
            cluster.id,
            scored.tier,
            decision.score,
            decision.factors.volume,
            decision.factors.complexity,
            decision.factors.historical,
            decision.analysis_degraded
        );

        Ok(Route {
            decision,
            analysis: Some(analysis),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::explain::tests::{io_rows, ScriptedExecutor};
    use crate::analyzer::{AnalyzerConfig, ExplainFailure};
    use crate::cluster::test_registry;
    use crate::history::MemoryHistoryStore;
    use crate::model::ExecutionMetric;
    use dyrasql_common::DyraError;
    use std::time::Duration;

    fn router(executor: ScriptedExecutor) -> (QueryRouter, Arc<ScriptedExecutor>) {
        let executor = Arc::new(executor);
        let history = Arc::new(HistoryManager::new(
            Arc::new(MemoryHistoryStore::new()),
            Duration::from_secs(86_400),
            Duration::from_millis(200),
        ));
        let router = QueryRouter::new(
            QueryAnalyzer::new(executor.clone(), AnalyzerConfig::default()),
            DecisionEngine::default(),
            history,
            Arc::new(test_registry("http://ecs", "http://std", "http://opt")),
        );
        (router, executor)
    }

    #[tokio::test]
    async fn test_keepalive_is_light_and_uncached() {
        let (router, executor) = router(ScriptedExecutor::failing());
        for _ in 0..2 {
            let route = router.route("select 1;").await.unwrap();
            assert!(route.is_keepalive());
            assert_eq!(route.decision.cluster_id, "ecs");
            assert!(!route.decision.cached);
        }
        assert!(executor.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_second_submission_is_cached() {
        let (router, executor) = router(ScriptedExecutor::new(
            Ok(io_rows(5.0 * 1024.0 * 1024.0 * 1024.0, 1e6)),
            Ok(vec![]),
        ));
        let sql = "SELECT region, sum(amount) FROM sales.orders WHERE dt = '2024-01-01' GROUP BY region";
        let first = router.route(sql).await.unwrap();
        assert_eq!(first.source, RouteSource::Computed);
        assert!(!first.decision.cached);
        assert!(first.analysis.is_some());

        // literal-only difference shares the fingerprint
        let second = router
            .route("select region, SUM(amount) from sales.orders where dt = '2024-02-01' group by region")
            .await
            .unwrap();
        assert_eq!(second.source, RouteSource::Cached);
        assert!(second.decision.cached);
        assert!(second.analysis.is_none());
        assert_eq!(second.decision.score, first.decision.score);
        assert_eq!(second.decision.cluster_id, first.decision.cluster_id);
        assert_eq!(executor.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_goes_light() {
        let (router, executor) = router(ScriptedExecutor::failing());
        let route = router.route("SHOW TABLES").await.unwrap();
        assert_eq!(route.source, RouteSource::Metadata);
        assert_eq!(route.decision.tier, ClusterTier::Light);
        assert_eq!(route.decision.score, 0.0);
        assert!(executor.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_explain_is_degraded() {
        let (router, _) = router(ScriptedExecutor::failing());
        let route = router.route("SELECT * FROM sales.orders").await.unwrap();
        assert!(route.decision.analysis_degraded);
        assert_eq!(route.decision.factors.volume, 0.5);
    }

    #[tokio::test]
    async fn test_syntax_error_aborts() {
        let (router, _) = router(ScriptedExecutor::new(
            Err(ExplainFailure::Rejected {
                error_name: Some("SYNTAX_ERROR".into()),
                message: "line 1:8: mismatched input 'FORM'".into(),
            }),
            Ok(vec![]),
        ));
        let err = router.route("SELECT * FROM sales.orders WHER id = 1").await.unwrap_err();
        assert!(matches!(err, DyraError::QuerySyntax(_)));
        assert!(matches!(router.route("   ").await.unwrap_err(), DyraError::QuerySyntax(_)));
    }

    #[tokio::test]
    async fn test_history_feeds_historical_factor() {
        let (router, _) = router(ScriptedExecutor::failing());
        let sql = "SELECT * FROM sales.orders o JOIN sales.items i ON o.id = i.order_id";
        let fp = NormalizedQuery::new(sql).unwrap().fingerprint;
        for _ in 0..3 {
            router
                .history()
                .record_metric(&ExecutionMetric::new(fp.clone(), 300.0, true), "side_channel")
                .await;
        }
        let route = router.route(sql).await.unwrap();
        assert!(route.decision.factors.historical > 0.5);
    }
}
