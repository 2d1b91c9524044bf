//! Execution cluster registry
//!
//! Three statically configured Trino clusters, one per tier. Profiles are
//! immutable after startup.

use dyrasql_common::{DyraError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster tier, ordered light < medium < heavy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterTier {
    Light,
    Medium,
    Heavy,
}

impl ClusterTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterTier::Light => "light",
            ClusterTier::Medium => "medium",
            ClusterTier::Heavy => "heavy",
        }
    }
}

impl fmt::Display for ClusterTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of one execution cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub id: String,
    /// URL the router uses to reach the coordinator
    pub internal_url: String,
    /// URL clients use in bypass mode
    pub external_url: String,
    pub tier: ClusterTier,
}

impl ClusterProfile {
    pub fn new(
        id: impl Into<String>,
        internal_url: impl Into<String>,
        external_url: impl Into<String>,
        tier: ClusterTier,
    ) -> Self {
        Self {
            id: id.into(),
            internal_url: trim_base(internal_url.into()),
            external_url: trim_base(external_url.into()),
            tier,
        }
    }

    /// Absolute URL for a path on this cluster
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.internal_url, path.trim_start_matches('/'))
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Registry of the three tiers
#[derive(Debug, Clone)]
pub struct ClusterRegistry {
    light: ClusterProfile,
    medium: ClusterProfile,
    heavy: ClusterProfile,
}

impl ClusterRegistry {
    /// Build the registry, checking that each profile sits in its slot and ids are unique
    pub fn new(light: ClusterProfile, medium: ClusterProfile, heavy: ClusterProfile) -> Result<Self> {
        for (profile, tier) in [
            (&light, ClusterTier::Light),
            (&medium, ClusterTier::Medium),
            (&heavy, ClusterTier::Heavy),
        ] {
            if profile.tier != tier {
                return Err(DyraError::Config(format!(
                    "cluster {} configured as {} but registered as {}",
                    profile.id, profile.tier, tier
                )));
            }
            if profile.id.trim().is_empty() || profile.internal_url.is_empty() {
                return Err(DyraError::Config(format!(
                    "{} cluster needs an id and an internal url",
                    tier
                )));
            }
        }
        if light.id == medium.id || light.id == heavy.id || medium.id == heavy.id {
            return Err(DyraError::Config("cluster ids must be unique".into()));
        }
        Ok(Self {
            light,
            medium,
            heavy,
        })
    }

    pub fn for_tier(&self, tier: ClusterTier) -> &ClusterProfile {
        match tier {
            ClusterTier::Light => &self.light,
            ClusterTier::Medium => &self.medium,
            ClusterTier::Heavy => &self.heavy,
        }
    }

    /// The lightest cluster: metadata queries, keepalives and explains go here
    pub fn lightest(&self) -> &ClusterProfile {
        &self.light
    }

    pub fn get(&self, id: &str) -> Option<&ClusterProfile> {
        self.iter().find(|c| c.id == id)
    }

    /// Resolve a cluster id, falling back to the lightest cluster for unknown ids
    pub fn get_or_lightest(&self, id: &str) -> &ClusterProfile {
        self.get(id).unwrap_or(&self.light)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusterProfile> {
        [&self.light, &self.medium, &self.heavy].into_iter()
    }
}

#[cfg(test)]
pub(crate) fn test_registry(light_url: &str, medium_url: &str, heavy_url: &str) -> ClusterRegistry {
    ClusterRegistry::new(
        ClusterProfile::new("ecs", light_url, "http://localhost:8081", ClusterTier::Light),
        ClusterProfile::new("emr-standard", medium_url, "http://localhost:8082", ClusterTier::Medium),
        ClusterProfile::new("emr-optimized", heavy_url, "http://localhost:8083", ClusterTier::Heavy),
    )
    .unwrap()
}
