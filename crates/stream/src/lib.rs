//! Spatial services for a shard: the area-of-interest grid, the static zone
//! partition and tick cadence helpers.
//!
//! # Invariants
//! - An entity sits in exactly one AOI cell; empty cells are never stored.
//! - Zones of a linear partition tile X without gaps or overlap.
//! - Cadence intervals are always at least one tick.

mod aoi;
mod error;
mod timing;
mod zone;

pub use aoi::{AoiGrid, CellCoord, within_radius};
pub use error::StreamError;
pub use timing::{TickTimer, seconds_to_ticks, snapshot_interval_ticks, tick_period};
pub use zone::{UNBOUNDED, Zone, ZoneBounds, ZoneManager};

pub fn crate_info() -> &'static str {
    "meridian-stream v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("stream"));
    }
}
