//! DyraSQL gateway
//!
//! Routes each SQL statement to one of three Trino clusters (light, medium,
//! heavy) from a weighted score over data volume, structural complexity and
//! execution history, then proxies the Trino statement protocol to it.

pub mod analyzer;
pub mod cluster;
pub mod cluster_client;
pub mod config;
pub mod decision_engine;
pub mod errors;
pub mod history;
pub mod http_api;
pub mod metrics;
pub mod model;
pub mod protocol;
pub mod proxy;
pub mod query_router;
pub mod sessions;
pub mod telemetry;
