//! Shared types used across the meridian crates.
//!
//! # Invariants
//! - An `EntityId` is only meaningful together with the world that issued it.
//! - Identifier types are `Copy` and totally ordered for deterministic maps.

mod types;

pub use types::{ClientId, EntityId, HandoffState, Transform, ZoneId};

pub fn crate_info() -> &'static str {
    "meridian-common v0.1.0"
}
