use std::path::Path;

use anyhow::{Context, bail};
use meridian_net::ring::{FRAME_HEADER_BYTES, MIN_CAPACITY};
use meridian_shard::ShardConfig;
use serde::{Deserialize, Serialize};

/// Host-level settings plus the config every shard is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub node_id: String,
    pub zone_count: u32,
    pub zone_width: f32,
    /// Bytes per ring; each client gets one input and one output ring.
    pub ring_capacity: usize,
    pub shard: ShardConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-0".to_owned(),
            zone_count: 2,
            zone_width: 512.0,
            ring_capacity: 1 << 20,
            shard: ShardConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        tracing::info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.shard.validate()?;
        if self.zone_count == 0 {
            bail!("zone_count must be at least 1");
        }
        if !(self.zone_width.is_finite() && self.zone_width > 0.0) {
            bail!("zone_width must be positive, got {}", self.zone_width);
        }
        if self.ring_capacity < MIN_CAPACITY || self.ring_capacity % 4 != 0 {
            bail!(
                "ring_capacity must be a multiple of 4 and at least {MIN_CAPACITY}, got {}",
                self.ring_capacity
            );
        }
        if self.ring_capacity < self.shard.max_bytes_per_snapshot + FRAME_HEADER_BYTES {
            bail!(
                "ring_capacity {} cannot hold a {}-byte snapshot",
                self.ring_capacity,
                self.shard.max_bytes_per_snapshot
            );
        }
        Ok(())
    }
}
