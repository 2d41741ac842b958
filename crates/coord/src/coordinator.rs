use std::collections::{BTreeMap, HashMap};

use crossbeam_channel::Receiver;
use glam::Vec3;
use meridian_common::{ClientId, HandoffState, ZoneId};
use meridian_shard::{ClientRings, MigrationRequest, ShardCommand, ShardEvent};
use serde::Serialize;

use crate::link::{ClientNotifier, LinkClosed, ShardLink};

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("migration of {client} rejected: {reason}")]
    Invalid { client: ClientId, reason: String },
    #[error("no shard serves {0}")]
    UnknownShard(ZoneId),
    #[error("client {0} is already routed")]
    AlreadyRouted(ClientId),
    #[error("client {0} is not routed")]
    UnknownClient(ClientId),
    #[error("command link to {0} is closed")]
    LinkClosed(ZoneId),
}

/// Where a client currently lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub gateway: String,
    /// Zone the session was opened in.
    pub origin: ZoneId,
    pub shard: ZoneId,
    pub previous: Option<ZoneId>,
    pub migrations: u32,
}

#[derive(Debug, Clone, Copy)]
struct PendingMigration {
    from: ZoneId,
    to: ZoneId,
    state: HandoffState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub migrations_started: u64,
    pub migrations_completed: u64,
    pub migrations_rejected: u64,
    pub clients_opened: u64,
    pub clients_closed: u64,
}

/// Routes clients to shards and carries a player across a zone edge.
///
/// A migration is two-phase: the origin is told to detach, and once it hands
/// the client's rings back the target is told to attach with the captured
/// state. Only one shard ever holds a client's rings.
pub struct MigrationCoordinator<L, N> {
    shards: BTreeMap<ZoneId, L>,
    routes: HashMap<ClientId, Route>,
    pending: HashMap<ClientId, PendingMigration>,
    notifier: N,
    stats: CoordinatorStats,
}

impl<L: ShardLink, N: ClientNotifier> MigrationCoordinator<L, N> {
    pub fn new(notifier: N) -> Self {
        Self {
            shards: BTreeMap::new(),
            routes: HashMap::new(),
            pending: HashMap::new(),
            notifier,
            stats: CoordinatorStats::default(),
        }
    }

    pub fn add_shard(&mut self, zone: ZoneId, link: L) {
        if self.shards.insert(zone, link).is_some() {
            tracing::warn!(%zone, "shard link replaced");
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn route(&self, client: ClientId) -> Option<&Route> {
        self.routes.get(&client)
    }

    pub fn client_count(&self) -> usize {
        self.routes.len()
    }

    pub fn is_migrating(&self, client: ClientId) -> bool {
        self.pending.contains_key(&client)
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    fn send(&self, zone: ZoneId, cmd: ShardCommand) -> Result<(), MigrationError> {
        let link = self.shards.get(&zone).ok_or(MigrationError::UnknownShard(zone))?;
        link.send(cmd).map_err(|LinkClosed(_)| MigrationError::LinkClosed(zone))
    }

    /// Start a session on `zone`'s shard.
    pub fn open_client(
        &mut self,
        client: ClientId,
        gateway: impl Into<String>,
        zone: ZoneId,
        rings: ClientRings,
        spawn: Option<Vec3>,
    ) -> Result<(), MigrationError> {
        if self.routes.contains_key(&client) {
            return Err(MigrationError::AlreadyRouted(client));
        }
        self.send(zone, ShardCommand::Attach { client, rings, spawn })?;
        let route = Route {
            gateway: gateway.into(),
            origin: zone,
            shard: zone,
            previous: None,
            migrations: 0,
        };
        tracing::info!(%client, %zone, gateway = %route.gateway, "client opened");
        self.routes.insert(client, route);
        self.stats.clients_opened += 1;
        Ok(())
    }

    /// End a session. The shard's `Detached` event releases the rings.
    pub fn close_client(&mut self, client: ClientId) -> Result<(), MigrationError> {
        let route = self
            .routes
            .remove(&client)
            .ok_or(MigrationError::UnknownClient(client))?;
        // A client mid-migration is still attached to the origin until it detaches.
        let zone = self.pending.remove(&client).map_or(route.shard, |p| p.from);
        self.stats.clients_closed += 1;
        tracing::info!(%client, %zone, "client closed");
        self.send(zone, ShardCommand::Detach { client })
    }

    pub fn handle_event(&mut self, event: ShardEvent) -> Result<(), MigrationError> {
        match event {
            ShardEvent::MigrationRequested(req) => {
                let result = self.begin_migration(req);
                if let Err(err) = &result {
                    self.stats.migrations_rejected += 1;
                    tracing::warn!(%err, "migration request dropped");
                }
                result
            }
            ShardEvent::Detached { zone, client, rings } => self.on_detached(zone, client, rings),
            ShardEvent::Stopped { zone } => {
                self.on_stopped(zone);
                Ok(())
            }
        }
    }

    /// Handle every event currently queued on `events`. Errors are logged.
    pub fn pump(&mut self, events: &Receiver<ShardEvent>) -> usize {
        let mut handled = 0;
        for event in events.try_iter() {
            if let Err(err) = self.handle_event(event) {
                tracing::debug!(%err, "shard event not applied");
            }
            handled += 1;
        }
        handled
    }

    fn begin_migration(&mut self, req: MigrationRequest) -> Result<(), MigrationError> {
        let invalid = |reason: String| MigrationError::Invalid {
            client: req.client,
            reason,
        };
        if !self.shards.contains_key(&req.from) {
            return Err(invalid(format!("origin {} has no shard", req.from)));
        }
        if !self.shards.contains_key(&req.to) {
            return Err(invalid(format!("target {} has no shard", req.to)));
        }
        let Some(route) = self.routes.get(&req.client) else {
            return Err(invalid("client is not routed".into()));
        };
        if route.shard != req.from {
            return Err(invalid(format!(
                "stale request from {}, client is on {}",
                req.from, route.shard
            )));
        }
        if self.pending.contains_key(&req.client) {
            return Err(invalid("migration already in progress".into()));
        }

        self.send(req.from, ShardCommand::Detach { client: req.client })?;
        self.pending.insert(
            req.client,
            PendingMigration {
                from: req.from,
                to: req.to,
                state: req.state,
            },
        );
        if let Some(route) = self.routes.get_mut(&req.client) {
            route.previous = Some(req.from);
            route.shard = req.to;
        }
        self.stats.migrations_started += 1;
        tracing::info!(client = %req.client, from = %req.from, to = %req.to, "migration started");
        Ok(())
    }

    fn on_detached(&mut self, zone: ZoneId, client: ClientId, rings: ClientRings) -> Result<(), MigrationError> {
        match self.pending.remove(&client) {
            Some(p) if p.from == zone => {
                let cmd = ShardCommand::AttachWithState {
                    client,
                    state: p.state,
                    rings,
                };
                if let Err(err) = self.send(p.to, cmd) {
                    self.routes.remove(&client);
                    return Err(err);
                }
                if let Some(route) = self.routes.get_mut(&client) {
                    route.migrations += 1;
                }
                self.stats.migrations_completed += 1;
                self.notifier.zone_changed(client, p.from, p.to);
                Ok(())
            }
            Some(p) => {
                tracing::warn!(%client, %zone, expected = %p.from, "detach from unexpected shard");
                self.pending.insert(client, p);
                Ok(())
            }
            None => {
                if self.routes.get(&client).is_some_and(|r| r.shard == zone) {
                    tracing::warn!(%client, %zone, "shard released client on its own, forgetting route");
                    self.routes.remove(&client);
                } else {
                    tracing::debug!(%client, %zone, "client rings released");
                }
                Ok(())
            }
        }
    }

    fn on_stopped(&mut self, zone: ZoneId) {
        self.shards.remove(&zone);
        let before = self.routes.len();
        self.routes.retain(|_, r| r.shard != zone);
        self.pending.retain(|_, p| p.to != zone && p.from != zone);
        tracing::info!(%zone, dropped_routes = before - self.routes.len(), "shard stopped");
    }
}

impl<L, N> std::fmt::Debug for MigrationCoordinator<L, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationCoordinator")
            .field("shards", &self.shards.keys().collect::<Vec<_>>())
            .field("routes", &self.routes.len())
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
