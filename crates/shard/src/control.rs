//! Messages exchanged between a shard thread and whoever routes clients to it.

use glam::Vec3;
use meridian_common::{ClientId, HandoffState, ZoneId};
use meridian_net::{RingError, RingReader, RingWriter, channel};

/// The shard's ends of one client's ring pair. Moves with the client when it
/// changes shard, so each ring only ever has one producer and one consumer.
#[derive(Debug)]
pub struct ClientRings {
    /// Client envelopes, gateway → shard.
    pub input: RingReader,
    /// Server envelopes, shard → gateway.
    pub output: RingWriter,
}

impl ClientRings {
    /// Fresh input and output rings of `capacity` bytes each, split into the
    /// gateway's ends and the shard's ends.
    pub fn pair(capacity: usize) -> Result<(GatewayRings, ClientRings), RingError> {
        let (input_tx, input_rx) = channel(capacity)?;
        let (output_tx, output_rx) = channel(capacity)?;
        Ok((
            GatewayRings {
                input: input_tx,
                output: output_rx,
            },
            ClientRings {
                input: input_rx,
                output: output_tx,
            },
        ))
    }
}

/// The transport side of a client's ring pair.
#[derive(Debug)]
pub struct GatewayRings {
    pub input: RingWriter,
    pub output: RingReader,
}

#[derive(Debug)]
pub enum ShardCommand {
    /// New session. Spawns at `spawn`, or at the zone centre.
    Attach {
        client: ClientId,
        rings: ClientRings,
        spawn: Option<Vec3>,
    },
    /// Arrival from a neighbouring shard.
    AttachWithState {
        client: ClientId,
        state: HandoffState,
        rings: ClientRings,
    },
    Detach { client: ClientId },
    Shutdown,
}

/// A client's player left this shard's bounds towards zone `to`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MigrationRequest {
    pub client: ClientId,
    pub from: ZoneId,
    pub to: ZoneId,
    pub state: HandoffState,
}

#[derive(Debug)]
pub enum ShardEvent {
    MigrationRequested(MigrationRequest),
    /// The client's context is gone; its rings are handed back.
    Detached {
        zone: ZoneId,
        client: ClientId,
        rings: ClientRings,
    },
    Stopped { zone: ZoneId },
}
