//! DyraSQL Gateway Service
//!
//! Trino-compatible entry point. Clients submit statements to `/v1/statement`
//! as they would to a coordinator; each statement is scored and sent to the
//! light, medium or heavy cluster.

use anyhow::Context;
use clap::Parser;
use dyrasql_gateway::analyzer::QueryAnalyzer;
use dyrasql_gateway::cluster_client::{ClusterClient, TrinoExplainExecutor};
use dyrasql_gateway::config::Args;
use dyrasql_gateway::decision_engine::DecisionEngine;
use dyrasql_gateway::history::{HistoryManager, HistoryStore, MemoryHistoryStore, RedisHistoryStore};
use dyrasql_gateway::http_api::{self, AppState};
use dyrasql_gateway::query_router::QueryRouter;
use dyrasql_gateway::sessions::SessionTable;
use dyrasql_gateway::{metrics, telemetry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const HISTORY_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let config = Args::parse().into_config()?;

    telemetry::init(&config.log_level, config.json_logs)?;

    info!("Starting DyraSQL Gateway");
    info!("  HTTP port: {}", config.http_port);
    info!("  Mode: {}", config.proxy.mode.as_str());
    info!("  Streaming threshold: {} bytes", config.proxy.streaming_threshold);
    info!(
        "  Weights: volume={} complexity={} historical={}",
        config.weights.volume, config.weights.complexity, config.weights.historical
    );
    info!(
        "  Thresholds: light<{} medium<={}",
        config.thresholds.light(),
        config.thresholds.medium()
    );
    for cluster in config.clusters.iter() {
        info!(
            "  Cluster {} ({}): {} / {}",
            cluster.id, cluster.tier, cluster.internal_url, cluster.external_url
        );
    }

    metrics::init_metrics();

    let redis = match &config.redis_url {
        Some(url) => match RedisHistoryStore::connect(url, config.cache_timeout).await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("Redis history store unavailable ({}), using in-process store", e);
                None
            }
        },
        None => {
            info!("No Redis URL configured, using in-process history store");
            None
        }
    };
    let mut history_sweeper = None;
    let store: Arc<dyn HistoryStore> = match redis {
        Some(store) => Arc::new(store),
        None => {
            let memory = Arc::new(MemoryHistoryStore::with_retention(config.decision_ttl));
            history_sweeper = Some(memory.spawn_sweeper(HISTORY_SWEEP_PERIOD));
            memory
        }
    };
    let history = Arc::new(HistoryManager::new(store, config.decision_ttl, config.cache_timeout));

    let cluster_client = ClusterClient::new(config.proxy.data_timeout)?;
    let clusters = Arc::new(config.clusters.clone());
    let explain = Arc::new(TrinoExplainExecutor::new(
        &cluster_client,
        clusters.lightest().clone(),
        config.explain_user.clone(),
    ));
    let analyzer = QueryAnalyzer::new(explain, config.analyzer.clone());
    let engine = DecisionEngine::new(config.weights, config.thresholds)?;
    let router = Arc::new(QueryRouter::new(analyzer, engine, history, clusters));

    let sessions = Arc::new(SessionTable::new(config.session_idle));
    let sweeper = sessions.spawn_sweeper();

    let app = http_api::router(AppState {
        router,
        cluster_client,
        sessions,
        settings: Arc::new(config.proxy.clone()),
    });

    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("failed to bind {}", http_addr))?;
    info!("HTTP server listening on {}", http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down DyraSQL Gateway");
        })
        .await
        .context("HTTP server failed")?;

    sweeper.abort();
    if let Some(history_sweeper) = history_sweeper {
        history_sweeper.abort();
    }
    Ok(())
}
