//! Sparse-set entity-component store with signature queries and a staged
//! scheduler.
//!
//! Components are registered at runtime as either tags (presence only) or
//! structured records of numeric fields laid out column-per-field. Every
//! entity carries a flat bitset signature that queries test against.
//!
//! # Invariants
//! - Signature bit `c` is set iff component `c`'s store holds the entity.
//! - Stores are dense: removal swaps the last row in, no tombstones.
//! - A stale `EntityId` never reads or writes another entity's data.
//! - Entity destruction only happens at the end of the `Post` stage.
//! - Changed flags are cleared only at the end of the `Snapshot` stage.

pub mod component;
pub mod entity;
pub mod error;
pub mod events;
pub mod query;
pub mod registry;
pub mod resources;
pub mod schedule;
pub mod signature;
pub mod storage;
pub mod world;

pub use component::{ComponentDef, ComponentId, ComponentKind, FieldHandle, FieldSpec, FieldType, Scalar};
pub use entity::EntityRegistry;
pub use error::EcsError;
pub use events::EventBus;
pub use query::{QueryIter, QuerySpec};
pub use registry::{ComponentInfo, ComponentRegistry};
pub use resources::Resources;
pub use schedule::{Scheduler, Stage, StageReport, System, SystemDescriptor, WriteConflict};
pub use world::{DuplicatePolicy, World, WorldOptions};

pub use meridian_common::EntityId;

pub fn crate_info() -> &'static str {
    "meridian-ecs v0.1.0"
}
