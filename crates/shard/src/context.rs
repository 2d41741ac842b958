//! Extension surface handed to plugins while a shard is being set up.

use std::collections::{BTreeMap, HashMap};

use meridian_common::{ClientId, EntityId};
use meridian_ecs::{EcsError, Scheduler, SystemDescriptor, World};
use meridian_kernel::GameKit;
use meridian_net::{MSG_SERVER_ENVELOPE, RingError};
use meridian_stream::{TickTimer, Zone};

use crate::client::ClientContext;
use crate::error::ShardError;
use crate::metrics::ShardMetrics;

/// Who sent a `Command` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOrigin {
    pub client: ClientId,
    pub entity: EntityId,
}

pub type MessageHandler = Box<dyn FnMut(&mut World, CommandOrigin, &[u8]) -> Result<(), EcsError> + Send>;

/// Pre-encoded envelopes addressed to clients, queued by message handlers and
/// systems while the shard runs. Lives in the world's resources; the shard
/// writes everything queued to the output rings at the end of each tick.
#[derive(Debug, Default)]
pub struct ClientOutbox {
    queued: Vec<(ClientId, Vec<u8>)>,
}

impl ClientOutbox {
    /// The world's outbox, created on first use.
    pub fn of(world: &mut World) -> &mut Self {
        world.resources_mut().get_or_insert_with(Self::default)
    }

    pub fn send(&mut self, client: ClientId, bytes: impl Into<Vec<u8>>) {
        self.queued.push((client, bytes.into()));
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub(crate) fn take(&mut self) -> Vec<(ClientId, Vec<u8>)> {
        std::mem::take(&mut self.queued)
    }
}

pub trait ShardPlugin {
    fn name(&self) -> &str;
    fn init(&mut self, ctx: &mut ShardContext<'_>) -> Result<(), ShardError>;
}

pub struct ShardContext<'a> {
    pub(crate) zone: &'a Zone,
    pub(crate) world: &'a mut World,
    pub(crate) scheduler: &'a mut Scheduler,
    pub(crate) kit: &'a GameKit,
    pub(crate) handlers: &'a mut HashMap<u16, MessageHandler>,
    pub(crate) clients: &'a mut BTreeMap<ClientId, ClientContext>,
    pub(crate) metrics: &'a mut ShardMetrics,
    pub(crate) timer: &'a TickTimer,
}

impl ShardContext<'_> {
    pub fn zone(&self) -> &Zone {
        self.zone
    }

    pub fn game(&self) -> &GameKit {
        self.kit
    }

    pub fn world(&self) -> &World {
        self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        self.world
    }

    pub fn add_system(&mut self, desc: SystemDescriptor) {
        self.scheduler.add(desc);
    }

    /// Route `Command` bodies of `command_type` to `handler`. Returns true if
    /// an earlier handler for the same type was replaced.
    pub fn register_message<F>(&mut self, command_type: u16, handler: F) -> bool
    where
        F: FnMut(&mut World, CommandOrigin, &[u8]) -> Result<(), EcsError> + Send + 'static,
    {
        let replaced = self.handlers.insert(command_type, Box::new(handler)).is_some();
        if replaced {
            tracing::warn!(command_type, "message handler replaced");
        }
        replaced
    }

    /// Enqueue pre-encoded envelope bytes for an attached client right away.
    /// Returns false when the client is not on this shard. Handlers and
    /// systems running later use [`ClientOutbox`] instead.
    pub fn send_to_client(&mut self, client: ClientId, bytes: &[u8]) -> Result<bool, RingError> {
        let Some(ctx) = self.clients.get_mut(&client) else {
            return Ok(false);
        };
        ctx.rings.output.enqueue(MSG_SERVER_ENVELOPE, 0, bytes)?;
        Ok(true)
    }

    pub fn counter(&mut self, name: &str) -> &mut u64 {
        self.metrics.counter(name)
    }

    pub fn timing(&self) -> &TickTimer {
        self.timer
    }
}

impl std::fmt::Debug for ShardContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardContext")
            .field("zone", &self.zone.id)
            .field("handlers", &self.handlers.len())
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}
