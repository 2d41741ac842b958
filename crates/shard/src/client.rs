use std::collections::BTreeSet;

use meridian_common::{ClientId, EntityId};
use meridian_net::{Body, Envelope, MSG_SERVER_ENVELOPE, SendError, send_envelope};

use crate::control::ClientRings;

/// Per-client state held by the shard that currently owns the client.
#[derive(Debug)]
pub struct ClientContext {
    pub client: ClientId,
    pub owner_tag: u32,
    pub rings: ClientRings,
    /// The client's player entity.
    pub entity: EntityId,
    pub last_input_seq: u32,
    /// Entities the client was last told about; the delta baseline.
    pub aoi_prev: BTreeSet<EntityId>,
    pub last_full_tick: Option<u64>,
    /// Set after a dropped snapshot so the next one resynchronises.
    pub force_keyframe: bool,
    /// Tick of the latest migration request sent for this client.
    pub migration_requested_at: Option<u64>,
    next_sequence: u32,
}

impl ClientContext {
    pub fn new(client: ClientId, rings: ClientRings, entity: EntityId) -> Self {
        Self {
            client,
            owner_tag: client.owner_tag(),
            rings,
            entity,
            last_input_seq: 0,
            aoi_prev: BTreeSet::new(),
            last_full_tick: None,
            force_keyframe: false,
            migration_requested_at: None,
            next_sequence: 0,
        }
    }

    pub fn keyframe_due(&self, tick: u64, interval: u64) -> bool {
        self.force_keyframe
            || self
                .last_full_tick
                .is_none_or(|t| tick.saturating_sub(t) >= interval)
    }

    /// A request is outstanding until `retry_after` ticks pass without the
    /// client being detached; after that the shard asks again.
    pub fn migration_awaiting(&self, tick: u64, retry_after: u64) -> bool {
        self.migration_requested_at
            .is_some_and(|t| tick.saturating_sub(t) < retry_after)
    }

    pub fn next_sequence(&mut self) -> u32 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        seq
    }

    /// Encode `body` into a fresh envelope and enqueue it on the output ring.
    pub fn send(&mut self, body: Body, flags: u16) -> Result<usize, SendError> {
        let env = Envelope::new(self.next_sequence(), body);
        send_envelope(&mut self.rings.output, MSG_SERVER_ENVELOPE, flags, &env)
    }

    pub fn into_rings(self) -> ClientRings {
        self.rings
    }
}
