//! Shard runtime: one zone of the world simulated on its own thread.
//!
//! Each tick drains client input rings, runs the scheduler stages, refreshes
//! the AOI grid, flags players that left the zone for migration and, on the
//! snapshot cadence, writes a relevance-filtered full or delta snapshot to
//! every client's output ring.
//!
//! # Invariants
//! - A shard never detaches a client on its own; migration is requested and
//!   the router decides.
//! - At most one migration request is outstanding per client; an unanswered
//!   one is re-sent after `migration_retry_sec`.
//! - Messages queued in the `ClientOutbox` during a tick reach the rings
//!   before the tick returns.
//! - A snapshot that could not be enqueued leaves the delta baseline alone and
//!   makes the next snapshot a keyframe.
//! - Ring handles leave a shard only through `ShardEvent::Detached`.

pub mod client;
pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod metrics;
pub mod shard;
pub mod snapshot;

pub use client::ClientContext;
pub use config::{ConfigError, ShardConfig};
pub use context::{ClientOutbox, CommandOrigin, MessageHandler, ShardContext, ShardPlugin};
pub use control::{ClientRings, GatewayRings, MigrationRequest, ShardCommand, ShardEvent};
pub use error::ShardError;
pub use metrics::ShardMetrics;
pub use shard::{ERROR_PROTOCOL_MISMATCH, Shard, ShardState};

pub fn crate_info() -> &'static str {
    "meridian-shard v0.1.0"
}
