use meridian_common::EntityId;
use meridian_ecs::{DuplicatePolicy, WorldOptions};
use meridian_kernel::GameKitOptions;
use serde::{Deserialize, Serialize};

/// Smallest accepted per-snapshot byte budget; below this not even an empty
/// snapshot envelope fits reliably.
pub const MIN_SNAPSHOT_BYTES: usize = 256;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Per-shard tuning. Every field has a default; JSON configs only need to
/// name what they override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    pub simulation_hz: f32,
    pub snapshot_hz: f32,
    pub aoi_radius: f32,
    pub aoi_cell_size: f32,
    pub keyframe_interval_sec: f32,
    /// How long an unanswered migration request waits before it is re-sent.
    pub migration_retry_sec: f32,
    pub max_entities_per_snapshot: usize,
    pub max_bytes_per_snapshot: usize,
    /// Input ring messages consumed per client per tick; the rest wait.
    pub max_inputs_per_tick: usize,
    pub max_entities: usize,
    pub max_components: usize,
    pub reject_duplicate_components: bool,
    pub game: GameKitOptions,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            simulation_hz: 30.0,
            snapshot_hz: 20.0,
            aoi_radius: 50.0,
            aoi_cell_size: 16.0,
            keyframe_interval_sec: 2.0,
            migration_retry_sec: 1.0,
            max_entities_per_snapshot: 400,
            max_bytes_per_snapshot: 48 * 1024,
            max_inputs_per_tick: 256,
            max_entities: 100_000,
            max_components: 1024,
            reject_duplicate_components: false,
            game: GameKitOptions::default(),
        }
    }
}

impl ShardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |field, v: f32| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(invalid(field, format!("must be a positive number, got {v}")))
            }
        };
        positive("simulation_hz", self.simulation_hz)?;
        positive("snapshot_hz", self.snapshot_hz)?;
        positive("aoi_cell_size", self.aoi_cell_size)?;
        if !(self.aoi_radius.is_finite() && self.aoi_radius >= 0.0) {
            return Err(invalid("aoi_radius", format!("must be >= 0, got {}", self.aoi_radius)));
        }
        if !(self.keyframe_interval_sec.is_finite() && self.keyframe_interval_sec >= 0.0) {
            return Err(invalid(
                "keyframe_interval_sec",
                format!("must be >= 0, got {}", self.keyframe_interval_sec),
            ));
        }
        if !(self.migration_retry_sec.is_finite() && self.migration_retry_sec >= 0.0) {
            return Err(invalid(
                "migration_retry_sec",
                format!("must be >= 0, got {}", self.migration_retry_sec),
            ));
        }
        if self.snapshot_hz > self.simulation_hz {
            tracing::warn!(
                snapshot_hz = self.snapshot_hz,
                simulation_hz = self.simulation_hz,
                "snapshot rate above simulation rate, snapshots will go out every tick"
            );
        }
        if self.max_entities_per_snapshot == 0 {
            return Err(invalid("max_entities_per_snapshot", "must be at least 1"));
        }
        if self.max_bytes_per_snapshot < MIN_SNAPSHOT_BYTES {
            return Err(invalid(
                "max_bytes_per_snapshot",
                format!("must be at least {MIN_SNAPSHOT_BYTES}"),
            ));
        }
        if self.max_inputs_per_tick == 0 {
            return Err(invalid("max_inputs_per_tick", "must be at least 1"));
        }
        if self.max_entities == 0 || self.max_entities > EntityId::MAX_INDEX as usize + 1 {
            return Err(invalid(
                "max_entities",
                format!("must be in 1..={}", EntityId::MAX_INDEX as usize + 1),
            ));
        }
        if self.max_components == 0 {
            return Err(invalid("max_components", "must be at least 1"));
        }
        if !(self.game.default_speed.is_finite() && self.game.default_speed >= 0.0) {
            return Err(invalid("game.default_speed", "must be >= 0"));
        }
        Ok(())
    }

    pub fn world_options(&self) -> WorldOptions {
        WorldOptions {
            max_entities: self.max_entities,
            max_components: self.max_components,
            duplicate_policy: if self.reject_duplicate_components {
                DuplicatePolicy::Reject
            } else {
                DuplicatePolicy::Ignore
            },
        }
    }
}
