//! Configuration loading and management.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Claim time-to-live in seconds. Fixed at acquisition; there is no
    /// renewal. A stale claim is only reclaimed lazily at the next claim
    /// attempt.
    #[serde(default = "default_claim_ttl")]
    pub claim_ttl_seconds: i64,

    /// Default WIP limit applied when a column is created without one.
    /// 0 means unlimited.
    #[serde(default)]
    pub default_wip_limit: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            claim_ttl_seconds: default_claim_ttl(),
            default_wip_limit: 0,
        }
    }
}

fn default_claim_ttl() -> i64 {
    3600
}

impl EngineConfig {
    /// Load configuration from a YAML file, falling back to defaults when the
    /// file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot honor. A non-positive TTL would mint
    /// claims that are expired the moment they are written.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.claim_ttl_seconds > 0,
            "claim_ttl_seconds must be positive, got {}",
            self.claim_ttl_seconds
        );
        anyhow::ensure!(
            self.default_wip_limit >= 0,
            "default_wip_limit must be zero or positive, got {}",
            self.default_wip_limit
        );
        Ok(())
    }
}
