use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use glam::Vec3;
use meridian_common::{ClientId, EntityId, HandoffState, ZoneId};
use meridian_ecs::{Scheduler, Stage, World};
use meridian_kernel::{GameKit, InputSample};
use meridian_net::{
    Body, Envelope, ErrorMessage, FLAG_DROPPABLE, MSG_CLIENT_ENVELOPE, MSG_SERVER_ENVELOPE, PROTOCOL_MAJOR,
    PROTOCOL_MINOR, Pong, ServerHello, ServerInfo, ServerSnapshot, now_ms,
};
use meridian_stream::{
    AoiGrid, TickTimer, Zone, ZoneManager, seconds_to_ticks, snapshot_interval_ticks, tick_period,
};

use crate::client::ClientContext;
use crate::config::ShardConfig;
use crate::context::{ClientOutbox, CommandOrigin, MessageHandler, ShardContext, ShardPlugin};
use crate::control::{ClientRings, MigrationRequest, ShardCommand, ShardEvent};
use crate::error::ShardError;
use crate::metrics::ShardMetrics;
use crate::snapshot::{self, Observer, SnapshotLimits};

/// `ErrorMessage::code` sent when a client's protocol major differs.
pub const ERROR_PROTOCOL_MISMATCH: u32 = 1;

const TIMER_HISTORY: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// One zone's simulation: a world, its scheduler and the clients whose
/// players live in the zone.
pub struct Shard {
    zone: Zone,
    zones: ZoneManager,
    config: ShardConfig,
    state: ShardState,
    world: World,
    scheduler: Scheduler,
    kit: GameKit,
    aoi: AoiGrid,
    clients: BTreeMap<ClientId, ClientContext>,
    handlers: HashMap<u16, MessageHandler>,
    metrics: ShardMetrics,
    timer: TickTimer,
    tick: u64,
    dt: f32,
    snapshot_interval: u64,
    keyframe_interval: u64,
    migration_retry: u64,
    events: Vec<ShardEvent>,
}

impl Shard {
    pub fn new(zone_id: ZoneId, zones: ZoneManager, config: ShardConfig) -> Result<Self, ShardError> {
        config.validate()?;
        let zone = zones.get(zone_id).cloned().ok_or(ShardError::UnknownZone(zone_id))?;

        let mut world = World::new(config.world_options());
        let mut scheduler = Scheduler::new();
        let kit = GameKit::install(&mut world, &mut scheduler, config.game)?;
        world.resources_mut().insert(ClientOutbox::default());
        let aoi = AoiGrid::new(config.aoi_cell_size)?;
        let timer = TickTimer::new(TIMER_HISTORY, tick_period(config.simulation_hz)?);
        let snapshot_interval = snapshot_interval_ticks(config.simulation_hz, config.snapshot_hz)?;
        let keyframe_interval = seconds_to_ticks(config.keyframe_interval_sec, config.simulation_hz);
        let migration_retry = seconds_to_ticks(config.migration_retry_sec, config.simulation_hz);

        tracing::info!(
            zone = %zone.id,
            snapshot_interval,
            keyframe_interval,
            "shard created"
        );
        Ok(Self {
            zone,
            zones,
            dt: 1.0 / config.simulation_hz,
            config,
            state: ShardState::Starting,
            world,
            scheduler,
            kit,
            aoi,
            clients: BTreeMap::new(),
            handlers: HashMap::new(),
            metrics: ShardMetrics::default(),
            timer,
            tick: 0,
            snapshot_interval,
            keyframe_interval,
            migration_retry,
            events: Vec::new(),
        })
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    pub fn state(&self) -> ShardState {
        self.state
    }

    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn kit(&self) -> &GameKit {
        &self.kit
    }

    pub fn aoi(&self) -> &AoiGrid {
        &self.aoi
    }

    pub fn metrics(&self) -> &ShardMetrics {
        &self.metrics
    }

    pub fn timing(&self) -> &TickTimer {
        &self.timer
    }

    pub fn client(&self, client: ClientId) -> Option<&ClientContext> {
        self.clients.get(&client)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn install_plugin(&mut self, plugin: &mut dyn ShardPlugin) -> Result<(), ShardError> {
        let mut ctx = ShardContext {
            zone: &self.zone,
            world: &mut self.world,
            scheduler: &mut self.scheduler,
            kit: &self.kit,
            handlers: &mut self.handlers,
            clients: &mut self.clients,
            metrics: &mut self.metrics,
            timer: &self.timer,
        };
        plugin.init(&mut ctx)?;
        tracing::info!(plugin = plugin.name(), zone = %self.zone.id, "plugin installed");
        Ok(())
    }

    pub fn start(&mut self) {
        if self.state == ShardState::Starting {
            self.state = ShardState::Running;
            tracing::info!(zone = %self.zone.id, "shard running");
        }
    }

    /// Events produced since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<ShardEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn handle_command(&mut self, cmd: ShardCommand) -> Result<(), ShardError> {
        match cmd {
            ShardCommand::Attach { client, rings, spawn } => {
                let position = spawn.unwrap_or_else(|| self.zone_centre());
                let state = HandoffState {
                    position,
                    ..HandoffState::default()
                };
                self.attach(client, rings, &state)
            }
            ShardCommand::AttachWithState { client, state, rings } => self.attach(client, rings, &state),
            ShardCommand::Detach { client } => {
                self.detach(client);
                Ok(())
            }
            ShardCommand::Shutdown => {
                if matches!(self.state, ShardState::Starting | ShardState::Running) {
                    self.state = ShardState::Stopping;
                }
                Ok(())
            }
        }
    }

    fn zone_centre(&self) -> Vec3 {
        Vec3::new((self.zone.bounds.min.x + self.zone.bounds.max.x) * 0.5, 0.0, 0.0)
    }

    fn attach(&mut self, client: ClientId, rings: ClientRings, state: &HandoffState) -> Result<(), ShardError> {
        if self.clients.contains_key(&client) {
            tracing::warn!(%client, zone = %self.zone.id, "client already attached, ignoring");
            return Ok(());
        }
        let entity = match self.kit.spawn_player(&mut self.world, state) {
            Ok(e) => e,
            Err(err) => {
                self.events.push(ShardEvent::Detached {
                    zone: self.zone.id,
                    client,
                    rings,
                });
                return Err(err.into());
            }
        };
        self.aoi.upsert(entity, state.position);

        let mut ctx = ClientContext::new(client, rings, entity);
        let info = Body::ServerInfo(ServerInfo {
            world_id: self.zone.id.0,
        });
        if let Err(err) = ctx.send(info, 0) {
            tracing::warn!(%client, %err, "server info not delivered");
        }
        self.clients.insert(client, ctx);
        self.metrics.clients_attached += 1;
        tracing::info!(%client, %entity, zone = %self.zone.id, pos = ?state.position, "client attached");
        Ok(())
    }

    fn detach(&mut self, client: ClientId) -> bool {
        let Some(ctx) = self.clients.remove(&client) else {
            tracing::debug!(%client, zone = %self.zone.id, "detach for unknown client");
            return false;
        };
        self.world.destroy_entity_deferred(ctx.entity);
        self.metrics.clients_detached += 1;
        tracing::info!(%client, entity = %ctx.entity, zone = %self.zone.id, "client detached");
        self.events.push(ShardEvent::Detached {
            zone: self.zone.id,
            client,
            rings: ctx.into_rings(),
        });
        true
    }

    /// Detach every client and move to `Stopped`.
    pub fn stop(&mut self) {
        if self.state == ShardState::Stopped {
            return;
        }
        self.state = ShardState::Stopping;
        let clients: Vec<ClientId> = self.clients.keys().copied().collect();
        for client in clients {
            self.detach(client);
        }
        self.world.flush_destroyed();
        self.aoi.clear();
        self.state = ShardState::Stopped;
        self.events.push(ShardEvent::Stopped { zone: self.zone.id });
        tracing::info!(zone = %self.zone.id, ticks = self.tick, "shard stopped");
    }

    /// Advance one fixed step.
    pub fn tick(&mut self) -> Result<(), ShardError> {
        if self.state != ShardState::Running {
            return Err(ShardError::NotRunning(self.state));
        }
        let started = Instant::now();
        self.tick += 1;
        let _span = tracing::debug_span!("shard_tick", zone = %self.zone.id, tick = self.tick).entered();

        self.drain_inputs();
        for stage in [Stage::Input, Stage::Simulation, Stage::Post] {
            self.run_stage(stage);
        }
        self.refresh_aoi()?;
        self.check_bounds()?;
        // Changed flags must survive until the next snapshot reads them.
        if self.tick % self.snapshot_interval == 0 {
            self.send_snapshots()?;
            self.run_stage(Stage::Snapshot);
        }
        self.run_stage(Stage::Networking);
        self.flush_outbox();

        self.metrics.ticks += 1;
        self.timer.record(started.elapsed());
        Ok(())
    }

    fn run_stage(&mut self, stage: Stage) {
        let report = self.scheduler.tick(&mut self.world, stage, self.dt);
        self.metrics.system_failures += report.failed as u64;
    }

    fn drain_inputs(&mut self) {
        let Self {
            clients,
            world,
            kit,
            handlers,
            metrics,
            config,
            zone,
            ..
        } = self;
        let tick_rate = config.simulation_hz.round() as u16;

        for ctx in clients.values_mut() {
            for _ in 0..config.max_inputs_per_tick {
                let Some(msg) = ctx.rings.input.dequeue() else {
                    break;
                };
                if msg.msg_type != MSG_CLIENT_ENVELOPE {
                    metrics.unexpected_messages += 1;
                    continue;
                }
                let env = match Envelope::decode(&msg.payload) {
                    Ok(env) => env,
                    Err(err) => {
                        metrics.decode_errors += 1;
                        tracing::debug!(client = %ctx.client, %err, "dropping undecodable input");
                        continue;
                    }
                };

                let reply = match env.body {
                    Body::ClientInput(input) => {
                        let sample = InputSample {
                            seq: input.seq,
                            move_dir: input.move_dir,
                            look: input.view_dir,
                            buttons: input.buttons,
                            analog1: input.analog1,
                            analog2: input.analog2,
                        };
                        match kit.apply_input(world, ctx.entity, &sample) {
                            Ok(true) => {
                                ctx.last_input_seq = ctx.last_input_seq.max(input.seq);
                                metrics.inputs_applied += 1;
                            }
                            Ok(false) => {}
                            Err(err) => tracing::warn!(client = %ctx.client, %err, "input not applied"),
                        }
                        None
                    }
                    Body::Command(cmd) => {
                        match handlers.get_mut(&cmd.command_type) {
                            Some(handler) => {
                                metrics.commands_dispatched += 1;
                                let origin = CommandOrigin {
                                    client: ctx.client,
                                    entity: ctx.entity,
                                };
                                if let Err(err) = handler(&mut *world, origin, &cmd.payload) {
                                    metrics.command_failures += 1;
                                    tracing::warn!(
                                        client = %ctx.client,
                                        command_type = cmd.command_type,
                                        %err,
                                        "command handler failed"
                                    );
                                }
                            }
                            None => {
                                metrics.commands_unhandled += 1;
                                tracing::debug!(command_type = cmd.command_type, "no handler for command");
                            }
                        }
                        None
                    }
                    Body::Ping(ping) => Some(Body::Pong(Pong {
                        server_time_ms: now_ms(),
                        echo_client_time_ms: ping.client_time_ms,
                    })),
                    Body::ClientHello(hello) if hello.protocol_major == PROTOCOL_MAJOR => {
                        Some(Body::ServerHello(ServerHello {
                            server_version: env!("CARGO_PKG_VERSION").to_owned(),
                            protocol_major: PROTOCOL_MAJOR,
                            protocol_minor: PROTOCOL_MINOR,
                            world_id: zone.id.0,
                            tick_rate,
                            time_ms: now_ms(),
                        }))
                    }
                    Body::ClientHello(hello) => Some(Body::Error(ErrorMessage {
                        code: ERROR_PROTOCOL_MISMATCH,
                        message: format!(
                            "protocol {}.{} not supported, server speaks {PROTOCOL_MAJOR}.{PROTOCOL_MINOR}",
                            hello.protocol_major, hello.protocol_minor
                        ),
                    })),
                    other => {
                        metrics.unexpected_messages += 1;
                        tracing::debug!(client = %ctx.client, body = %other.body_type(), "unexpected body from client");
                        None
                    }
                };

                if let Some(body) = reply {
                    if let Err(err) = ctx.send(body, 0) {
                        tracing::debug!(client = %ctx.client, %err, "reply not delivered");
                    }
                }
            }
        }
    }

    fn flush_outbox(&mut self) {
        let queued = ClientOutbox::of(&mut self.world).take();
        for (client, bytes) in queued {
            let Some(ctx) = self.clients.get_mut(&client) else {
                self.metrics.outbox_dropped += 1;
                tracing::debug!(%client, zone = %self.zone.id, "outbox message for client not on this shard");
                continue;
            };
            match ctx.rings.output.enqueue(MSG_SERVER_ENVELOPE, 0, &bytes) {
                Ok(()) => self.metrics.outbox_sent += 1,
                Err(err) => {
                    self.metrics.outbox_dropped += 1;
                    tracing::debug!(%client, %err, "outbox message dropped");
                }
            }
        }
    }

    fn refresh_aoi(&mut self) -> Result<(), ShardError> {
        let c = self.kit.components;
        for e in self.world.iter_component(c.transform) {
            if let Some(pos) = self.world.get::<f32, 3>(e, c.pos)? {
                self.aoi.upsert(e, Vec3::from_array(pos));
            }
        }
        let world = &self.world;
        let pruned = self
            .aoi
            .retain(|e| world.is_alive(e) && world.has_component(e, c.transform));
        if pruned > 0 {
            tracing::debug!(pruned, "dead entities left the AOI grid");
        }
        Ok(())
    }

    fn check_bounds(&mut self) -> Result<(), ShardError> {
        let Self {
            clients,
            world,
            kit,
            zone,
            zones,
            metrics,
            events,
            tick,
            migration_retry,
            ..
        } = self;

        for ctx in clients.values_mut() {
            if ctx.migration_awaiting(*tick, *migration_retry) {
                continue;
            }
            let Some(pos) = kit.position(world, ctx.entity)? else {
                continue;
            };
            if zone.bounds.contains(pos) {
                ctx.migration_requested_at = None;
                continue;
            }
            let Some(target) = zones.neighbor_for_exit(zone, pos) else {
                continue;
            };
            let Some(state) = kit.capture_handoff(world, ctx.entity)? else {
                continue;
            };
            if ctx.migration_requested_at.replace(*tick).is_some() {
                metrics.migration_retries += 1;
                tracing::warn!(client = %ctx.client, from = %zone.id, to = %target.id, "migration unanswered, asking again");
            } else {
                tracing::info!(client = %ctx.client, from = %zone.id, to = %target.id, ?pos, "migration requested");
            }
            metrics.migrations_requested += 1;
            events.push(ShardEvent::MigrationRequested(MigrationRequest {
                client: ctx.client,
                from: zone.id,
                to: target.id,
                state,
            }));
        }
        Ok(())
    }

    fn send_snapshots(&mut self) -> Result<(), ShardError> {
        let owners: HashMap<EntityId, u32> = self.clients.values().map(|c| (c.entity, c.owner_tag)).collect();
        let limits = SnapshotLimits {
            radius: self.config.aoi_radius,
            max_entities: self.config.max_entities_per_snapshot,
            max_bytes: self.config.max_bytes_per_snapshot,
        };
        let Self {
            clients,
            world,
            kit,
            aoi,
            metrics,
            tick,
            keyframe_interval,
            ..
        } = self;
        let tick = *tick;

        for ctx in clients.values_mut() {
            let Some(center) = kit.position(world, ctx.entity)? else {
                continue;
            };
            let keyframe = ctx.keyframe_due(tick, *keyframe_interval);
            let observer = Observer {
                own: ctx.entity,
                center,
                prev: &ctx.aoi_prev,
                keyframe,
            };
            let plan = snapshot::plan(world, kit, aoi, &owners, &observer, &limits)?;
            metrics.snapshot_entities_trimmed += plan.trimmed as u64;

            let mut visible = plan.visible;
            let body = Body::ServerSnapshot(ServerSnapshot {
                full: keyframe,
                server_tick: tick as u32,
                last_input_seq_acked: ctx.last_input_seq,
                entities: plan.entities,
                removed: plan.removed,
            });
            let mut env = Envelope::new(ctx.next_sequence(), body);
            let (bytes, cut) = snapshot::encode_within(&mut env, limits.max_bytes)?;
            metrics.snapshot_entities_trimmed += cut.len() as u64;
            for e in &cut {
                visible.remove(e);
            }

            match ctx.rings.output.enqueue(MSG_SERVER_ENVELOPE, FLAG_DROPPABLE, &bytes) {
                Ok(()) => {
                    ctx.aoi_prev = visible;
                    if keyframe {
                        ctx.last_full_tick = Some(tick);
                        ctx.force_keyframe = false;
                    }
                    metrics.snapshots_sent += 1;
                    metrics.snapshot_bytes += bytes.len() as u64;
                }
                Err(err) => {
                    metrics.snapshots_dropped += 1;
                    ctx.force_keyframe = true;
                    tracing::debug!(client = %ctx.client, %err, "snapshot dropped");
                }
            }
        }
        Ok(())
    }

    fn forward_events(&mut self, events: &Sender<ShardEvent>) {
        for event in self.drain_events() {
            if events.send(event).is_err() {
                tracing::warn!(zone = %self.zone.id, "event channel closed, dropping shard events");
                break;
            }
        }
    }

    /// Drive the shard at `simulation_hz` until it is shut down or the
    /// command channel closes. Commands are applied between ticks.
    pub fn run(mut self, commands: Receiver<ShardCommand>, events: Sender<ShardEvent>) -> Result<ShardMetrics, ShardError> {
        let _span = tracing::info_span!("shard", zone = %self.zone.id).entered();
        let ticker = crossbeam_channel::tick(tick_period(self.config.simulation_hz)?);
        self.start();

        while self.state == ShardState::Running {
            if ticker.recv().is_err() {
                break;
            }
            loop {
                match commands.try_recv() {
                    Ok(cmd) => {
                        if let Err(err) = self.handle_command(cmd) {
                            tracing::warn!(%err, "command failed");
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.state = ShardState::Stopping;
                        break;
                    }
                }
            }
            if self.state == ShardState::Running {
                if let Err(err) = self.tick() {
                    tracing::error!(%err, "tick failed");
                }
            }
            self.forward_events(&events);
        }

        self.stop();
        self.forward_events(&events);
        Ok(self.metrics)
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("zone", &self.zone.id)
            .field("state", &self.state)
            .field("tick", &self.tick)
            .field("clients", &self.clients.len())
            .field("entities", &self.world.entity_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_ecs::EcsError;
    use meridian_net::{
        ClientHello, ClientInput, Command, Ping, RingReader, RingWriter, WireEntityId, channel, mask, send_envelope,
    };

    struct Client {
        id: ClientId,
        input: RingWriter,
        output: RingReader,
        seq: u32,
    }

    impl Client {
        fn new(ring_bytes: usize) -> (Self, ClientRings) {
            let (in_w, in_r) = channel(64 * 1024).unwrap();
            let (out_w, out_r) = channel(ring_bytes).unwrap();
            let client = Self {
                id: ClientId::new(),
                input: in_w,
                output: out_r,
                seq: 0,
            };
            (client, ClientRings { input: in_r, output: out_w })
        }

        fn send(&mut self, body: Body) {
            self.seq += 1;
            let env = Envelope::new(self.seq, body);
            send_envelope(&mut self.input, MSG_CLIENT_ENVELOPE, 0, &env).unwrap();
        }

        fn move_x(&mut self, seq: u32) {
            self.send(Body::ClientInput(ClientInput {
                seq,
                move_dir: Vec3::X,
                view_dir: Vec3::X,
                buttons: 0,
                analog1: 0.0,
                analog2: 0.0,
            }));
        }

        fn received(&mut self) -> Vec<Envelope> {
            self.output
                .by_ref()
                .map(|m| Envelope::decode(&m.payload).unwrap())
                .collect()
        }

        fn snapshots(&mut self) -> Vec<ServerSnapshot> {
            self.received()
                .into_iter()
                .filter_map(|env| match env.body {
                    Body::ServerSnapshot(s) => Some(s),
                    _ => None,
                })
                .collect()
        }
    }

    fn every_tick() -> ShardConfig {
        ShardConfig {
            simulation_hz: 30.0,
            snapshot_hz: 30.0,
            ..ShardConfig::default()
        }
    }

    fn shard(config: ShardConfig) -> Shard {
        let mut zones = ZoneManager::new("test");
        zones.init_linear_x(2, 512.0).unwrap();
        let mut shard = Shard::new(ZoneId(0), zones, config).unwrap();
        shard.start();
        shard
    }

    fn attach(shard: &mut Shard, x: f32) -> Client {
        let (client, rings) = Client::new(64 * 1024);
        shard
            .handle_command(ShardCommand::Attach {
                client: client.id,
                rings,
                spawn: Some(Vec3::new(x, 0.0, 0.0)),
            })
            .unwrap();
        client
    }

    #[test]
    fn tick_requires_running() {
        let mut zones = ZoneManager::new("test");
        zones.init_linear_x(1, 512.0).unwrap();
        let mut shard = Shard::new(ZoneId(0), zones, ShardConfig::default()).unwrap();
        assert!(matches!(
            shard.tick(),
            Err(ShardError::NotRunning(ShardState::Starting))
        ));
    }

    #[test]
    fn unknown_zone_rejected() {
        let mut zones = ZoneManager::new("test");
        zones.init_linear_x(1, 512.0).unwrap();
        assert!(matches!(
            Shard::new(ZoneId(4), zones, ShardConfig::default()),
            Err(ShardError::UnknownZone(ZoneId(4)))
        ));
    }

    #[test]
    fn attach_sends_info_then_full_snapshot() {
        let mut shard = shard(every_tick());
        let mut client = attach(&mut shard, 10.0);
        shard.tick().unwrap();

        let msgs = client.received();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].body, Body::ServerInfo(ServerInfo { world_id: 0 }));
        let Body::ServerSnapshot(snap) = &msgs[1].body else {
            panic!("expected snapshot, got {:?}", msgs[1].body_type());
        };
        assert!(snap.full);
        assert_eq!(snap.server_tick, 1);
        assert_eq!(snap.entities.len(), 1);
        let own = &snap.entities[0];
        assert_eq!(
            own.mask,
            mask::TRANSFORM | mask::VELOCITY | mask::HEALTH | mask::OWNER
        );
        assert_eq!(own.owner, Some(client.id.owner_tag()));
        assert_eq!(own.pos, Some(Vec3::new(10.0, 0.0, 0.0)));
    }

    #[test]
    fn attach_without_spawn_uses_zone_centre() {
        let mut shard = shard(every_tick());
        let (client, rings) = Client::new(64 * 1024);
        shard
            .handle_command(ShardCommand::Attach {
                client: client.id,
                rings,
                spawn: None,
            })
            .unwrap();
        let entity = shard.client(client.id).unwrap().entity;
        assert_eq!(
            shard.kit().position(shard.world(), entity).unwrap(),
            Some(Vec3::new(256.0, 0.0, 0.0))
        );
    }

    #[test]
    fn second_attach_is_ignored() {
        let mut shard = shard(every_tick());
        let client = attach(&mut shard, 10.0);
        let (_other, rings) = Client::new(4096);
        shard
            .handle_command(ShardCommand::Attach {
                client: client.id,
                rings,
                spawn: None,
            })
            .unwrap();
        assert_eq!(shard.client_count(), 1);
        assert_eq!(shard.world().entity_count(), 1);
    }

    #[test]
    fn input_moves_player_and_is_acked() {
        let mut shard = shard(every_tick());
        let mut client = attach(&mut shard, 10.0);
        client.move_x(7);
        shard.tick().unwrap();

        let entity = shard.client(client.id).unwrap().entity;
        let pos = shard.kit().position(shard.world(), entity).unwrap().unwrap();
        assert!((pos.x - (10.0 + 5.0 / 30.0)).abs() < 1e-4);
        assert_eq!(shard.metrics().inputs_applied, 1);

        let snap = client.snapshots().pop().unwrap();
        assert_eq!(snap.last_input_seq_acked, 7);
    }

    #[test]
    fn later_snapshots_are_deltas() {
        let mut shard = shard(every_tick());
        let mut watcher = attach(&mut shard, 10.0);
        let mut mover = attach(&mut shard, 20.0);
        mover.move_x(1);

        shard.tick().unwrap();
        let first = watcher.snapshots().pop().unwrap();
        assert!(first.full);
        assert_eq!(first.entities.len(), 2);

        shard.tick().unwrap();
        let second = watcher.snapshots().pop().unwrap();
        assert!(!second.full);
        let mover_entity = shard.client(mover.id).unwrap().entity;
        let watcher_entity = shard.client(watcher.id).unwrap().entity;
        assert_eq!(second.entities.len(), 2);
        assert_eq!(EntityId::try_from(second.entities[0].id).unwrap(), watcher_entity);
        let delta = &second.entities[1];
        assert_eq!(EntityId::try_from(delta.id).unwrap(), mover_entity);
        assert_eq!(delta.mask, mask::TRANSFORM);
        assert!(delta.vel.is_none());

        mover.received();
    }

    #[test]
    fn unchanged_neighbours_are_omitted() {
        let mut shard = shard(every_tick());
        let mut watcher = attach(&mut shard, 10.0);
        let _idle = attach(&mut shard, 20.0);
        shard.tick().unwrap();
        shard.tick().unwrap();
        let snaps = watcher.snapshots();
        assert_eq!(snaps[0].entities.len(), 2);
        assert_eq!(snaps[1].entities.len(), 1);
        assert!(snaps[1].removed.is_empty());
    }

    #[test]
    fn out_of_range_entities_are_removed() {
        let mut shard = shard(every_tick());
        let mut watcher = attach(&mut shard, 10.0);
        let other = attach(&mut shard, 20.0);
        shard.tick().unwrap();
        let other_entity = shard.client(other.id).unwrap().entity;
        let pos = shard.kit().components.pos;
        shard.world_mut().set(other_entity, pos, [200.0f32, 0.0, 0.0]).unwrap();
        shard.tick().unwrap();

        let snap = watcher.snapshots().pop().unwrap();
        assert_eq!(snap.removed, vec![WireEntityId::from(other_entity)]);
        assert_eq!(snap.entities.len(), 1);
    }

    #[test]
    fn snapshot_cadence_follows_rates() {
        let mut shard = shard(ShardConfig::default());
        let mut client = attach(&mut shard, 10.0);
        for _ in 0..6 {
            shard.tick().unwrap();
        }
        // 30 Hz simulation, 20 Hz snapshots: every second tick.
        let ticks: Vec<u32> = client.snapshots().iter().map(|s| s.server_tick).collect();
        assert_eq!(ticks, vec![2, 4, 6]);
    }

    #[test]
    fn dropped_snapshot_forces_keyframe() {
        let mut shard = shard(every_tick());
        let (mut client, rings) = Client::new(1024);
        shard
            .handle_command(ShardCommand::Attach {
                client: client.id,
                rings,
                spawn: Some(Vec3::new(10.0, 0.0, 0.0)),
            })
            .unwrap();

        for _ in 0..30 {
            shard.tick().unwrap();
            if shard.metrics().snapshots_dropped > 0 {
                break;
            }
        }
        assert!(shard.metrics().snapshots_dropped > 0);
        assert!(shard.client(client.id).unwrap().force_keyframe);

        client.received();
        shard.tick().unwrap();
        let snap = client.snapshots().pop().unwrap();
        assert!(snap.full);
        assert!(!shard.client(client.id).unwrap().force_keyframe);
    }

    #[test]
    fn snapshot_entity_limit_keeps_nearest() {
        let mut shard = shard(ShardConfig {
            max_entities_per_snapshot: 2,
            ..every_tick()
        });
        let mut client = attach(&mut shard, 100.0);
        let kit = *shard.kit();
        let far = kit
            .spawn_player(
                shard.world_mut(),
                &HandoffState {
                    position: Vec3::new(130.0, 0.0, 0.0),
                    ..HandoffState::default()
                },
            )
            .unwrap();
        let near = kit
            .spawn_player(
                shard.world_mut(),
                &HandoffState {
                    position: Vec3::new(101.0, 0.0, 0.0),
                    ..HandoffState::default()
                },
            )
            .unwrap();
        shard.tick().unwrap();

        let snap = client.snapshots().pop().unwrap();
        let ids: Vec<EntityId> = snap.entities.iter().map(|s| EntityId::try_from(s.id).unwrap()).collect();
        let own = shard.client(client.id).unwrap().entity;
        assert_eq!(ids, vec![own, near]);
        assert!(!ids.contains(&far));
        assert_eq!(shard.metrics().snapshot_entities_trimmed, 1);
    }

    #[test]
    fn crossing_boundary_requests_migration_once() {
        let mut shard = shard(every_tick());
        let mut client = attach(&mut shard, 511.9);
        client.move_x(1);
        for _ in 0..5 {
            shard.tick().unwrap();
        }

        let events = shard.drain_events();
        assert_eq!(events.len(), 1);
        let ShardEvent::MigrationRequested(req) = &events[0] else {
            panic!("expected migration request, got {:?}", events[0]);
        };
        assert_eq!(req.client, client.id);
        assert_eq!(req.from, ZoneId(0));
        assert_eq!(req.to, ZoneId(1));
        assert!(req.state.position.x >= 512.0);
        assert_eq!(req.state.health, Some(100));
        assert!(shard.client(client.id).unwrap().migration_requested_at.is_some());
        assert_eq!(shard.metrics().migrations_requested, 1);
    }

    #[test]
    fn unanswered_migration_is_requested_again() {
        let mut shard = shard(ShardConfig {
            migration_retry_sec: 0.2,
            ..every_tick()
        });
        let mut client = attach(&mut shard, 511.9);
        client.move_x(1);
        shard.tick().unwrap();
        shard.tick().unwrap();
        let first = shard.drain_events();
        assert!(matches!(first.as_slice(), [ShardEvent::MigrationRequested(_)]));

        // Six ticks at 30 Hz before the request is considered unanswered.
        for _ in 0..4 {
            shard.tick().unwrap();
        }
        assert!(shard.drain_events().is_empty());

        shard.tick().unwrap();
        let again = shard.drain_events();
        let [ShardEvent::MigrationRequested(req)] = again.as_slice() else {
            panic!("expected a repeated request, got {again:?}");
        };
        assert_eq!(req.to, ZoneId(1));
        assert!(req.state.position.x > 512.0);
        assert_eq!(shard.metrics().migrations_requested, 2);
        assert_eq!(shard.metrics().migration_retries, 1);
    }

    #[test]
    fn no_migration_past_partition_edge() {
        let mut shard = shard(every_tick());
        let mut client = attach(&mut shard, 0.05);
        client.send(Body::ClientInput(ClientInput {
            seq: 1,
            move_dir: Vec3::NEG_X,
            view_dir: Vec3::X,
            buttons: 0,
            analog1: 0.0,
            analog2: 0.0,
        }));
        for _ in 0..3 {
            shard.tick().unwrap();
        }
        assert!(shard.drain_events().is_empty());
    }

    #[test]
    fn detach_hands_back_rings() {
        let mut shard = shard(every_tick());
        let client = attach(&mut shard, 10.0);
        shard.tick().unwrap();
        shard.handle_command(ShardCommand::Detach { client: client.id }).unwrap();

        let events = shard.drain_events();
        assert!(matches!(
            events.as_slice(),
            [ShardEvent::Detached { client: c, zone: ZoneId(0), .. }] if *c == client.id
        ));
        assert_eq!(shard.world().entity_count(), 1);
        shard.tick().unwrap();
        assert_eq!(shard.world().entity_count(), 0);
        assert!(shard.aoi().is_empty());
        assert_eq!(shard.client_count(), 0);
    }

    #[test]
    fn attach_with_state_restores_handoff() {
        let mut shard = shard(every_tick());
        let (mut client, rings) = Client::new(64 * 1024);
        let state = HandoffState {
            position: Vec3::new(100.0, 1.0, 2.0),
            velocity: Vec3::new(5.0, 0.0, 0.0),
            health: Some(40),
            ..HandoffState::default()
        };
        shard
            .handle_command(ShardCommand::AttachWithState {
                client: client.id,
                state,
                rings,
            })
            .unwrap();
        let entity = shard.client(client.id).unwrap().entity;
        assert_eq!(shard.kit().capture_handoff(shard.world(), entity).unwrap(), Some(state));

        shard.tick().unwrap();
        let msgs = client.received();
        assert_eq!(msgs[0].body, Body::ServerInfo(ServerInfo { world_id: 0 }));
        assert_eq!(msgs[1].body_type(), meridian_net::BodyType::ServerSnapshot);
    }

    #[test]
    fn ping_and_hello_are_answered() {
        let mut shard = shard(ShardConfig {
            snapshot_hz: 1.0,
            ..ShardConfig::default()
        });
        let mut client = attach(&mut shard, 10.0);
        client.received();
        client.send(Body::Ping(Ping { client_time_ms: 1234 }));
        client.send(Body::ClientHello(ClientHello {
            client_version: "test".into(),
            protocol_major: PROTOCOL_MAJOR,
            protocol_minor: 0,
        }));
        client.send(Body::ClientHello(ClientHello {
            client_version: "old".into(),
            protocol_major: PROTOCOL_MAJOR + 1,
            protocol_minor: 0,
        }));
        shard.tick().unwrap();

        let replies: Vec<Body> = client.received().into_iter().map(|e| e.body).collect();
        assert_eq!(replies.len(), 3);
        assert!(matches!(&replies[0], Body::Pong(p) if p.echo_client_time_ms == 1234));
        assert!(matches!(&replies[1], Body::ServerHello(h) if h.world_id == 0 && h.tick_rate == 30));
        assert!(matches!(&replies[2], Body::Error(e) if e.code == ERROR_PROTOCOL_MISMATCH));
    }

    #[test]
    fn garbage_input_is_counted() {
        let mut shard = shard(every_tick());
        let mut client = attach(&mut shard, 10.0);
        client.input.enqueue(MSG_CLIENT_ENVELOPE, 0, &[0xff, 0x00, 0x13]).unwrap();
        client.input.enqueue(99, 0, b"??").unwrap();
        shard.tick().unwrap();
        assert_eq!(shard.metrics().decode_errors, 1);
        assert_eq!(shard.metrics().unexpected_messages, 1);
    }

    #[derive(Debug, Default)]
    struct Hits(Vec<(ClientId, Vec<u8>)>);

    struct EchoPlugin;

    impl ShardPlugin for EchoPlugin {
        fn name(&self) -> &str {
            "echo"
        }

        fn init(&mut self, ctx: &mut ShardContext<'_>) -> Result<(), ShardError> {
            *ctx.counter("echo_installed") += 1;
            ctx.world_mut().resources_mut().insert(Hits::default());
            ctx.register_message(7, |world: &mut World, origin: CommandOrigin, payload: &[u8]| {
                world
                    .resources_mut()
                    .get_or_insert_with(Hits::default)
                    .0
                    .push((origin.client, payload.to_vec()));
                Ok::<(), EcsError>(())
            });
            ctx.add_system(meridian_ecs::SystemDescriptor::new(
                "EchoNetworking",
                Stage::Networking,
                |world: &mut World, _dt: f32| -> Result<(), EcsError> {
                    *world.resources_mut().get_or_insert_with(|| 0u64) += 1;
                    Ok(())
                },
            ));
            Ok(())
        }
    }

    #[test]
    fn plugin_handles_commands() {
        let mut shard = shard(every_tick());
        shard.install_plugin(&mut EchoPlugin).unwrap();
        let mut client = attach(&mut shard, 10.0);
        client.send(Body::Command(Command {
            command_type: 7,
            payload: vec![1, 2, 3],
        }));
        client.send(Body::Command(Command {
            command_type: 8,
            payload: Vec::new(),
        }));
        shard.tick().unwrap();

        let hits = shard.world().resources().get::<Hits>().unwrap();
        assert_eq!(hits.0, vec![(client.id, vec![1, 2, 3])]);
        assert_eq!(shard.metrics().commands_dispatched, 1);
        assert_eq!(shard.metrics().commands_unhandled, 1);
        assert_eq!(shard.metrics().custom().get("echo_installed"), Some(&1));
        assert_eq!(shard.world().resources().get::<u64>(), Some(&1));
    }

    #[test]
    fn send_to_client_from_plugin_context() {
        struct Greeter(ClientId);
        impl ShardPlugin for Greeter {
            fn name(&self) -> &str {
                "greeter"
            }
            fn init(&mut self, ctx: &mut ShardContext<'_>) -> Result<(), ShardError> {
                let bytes = Envelope::new(0, Body::ServerInfo(ServerInfo { world_id: 42 })).encode()?;
                let sent = ctx
                    .send_to_client(self.0, &bytes)
                    .map_err(|e| ShardError::Plugin {
                        plugin: "greeter".into(),
                        reason: e.to_string(),
                    })?;
                assert!(sent);
                assert!(!ctx.send_to_client(ClientId::new(), &bytes).unwrap());
                Ok(())
            }
        }

        let mut shard = shard(every_tick());
        let mut client = attach(&mut shard, 10.0);
        client.received();
        shard.install_plugin(&mut Greeter(client.id)).unwrap();
        let msgs = client.received();
        assert_eq!(msgs[0].body, Body::ServerInfo(ServerInfo { world_id: 42 }));
    }

    #[test]
    fn handler_replies_through_outbox() {
        struct Answer;
        impl ShardPlugin for Answer {
            fn name(&self) -> &str {
                "answer"
            }
            fn init(&mut self, ctx: &mut ShardContext<'_>) -> Result<(), ShardError> {
                ctx.register_message(9, |world: &mut World, origin: CommandOrigin, payload: &[u8]| {
                    let reply = Envelope::new(
                        0,
                        Body::Command(Command {
                            command_type: 9,
                            payload: payload.iter().rev().copied().collect(),
                        }),
                    );
                    let bytes = reply.encode().map_err(|_| EcsError::ComponentNotFound("reply".into()))?;
                    let outbox = ClientOutbox::of(world);
                    outbox.send(origin.client, bytes.clone());
                    outbox.send(ClientId::new(), bytes);
                    Ok(())
                });
                Ok(())
            }
        }

        let mut shard = shard(every_tick());
        shard.install_plugin(&mut Answer).unwrap();
        let mut client = attach(&mut shard, 10.0);
        let _other = attach(&mut shard, 20.0);
        shard.tick().unwrap();
        client.received();

        client.send(Body::Command(Command {
            command_type: 9,
            payload: vec![1, 2, 3],
        }));
        shard.tick().unwrap();

        let replies: Vec<Command> = client
            .received()
            .into_iter()
            .filter_map(|env| match env.body {
                Body::Command(cmd) => Some(cmd),
                _ => None,
            })
            .collect();
        assert_eq!(
            replies,
            vec![Command {
                command_type: 9,
                payload: vec![3, 2, 1],
            }]
        );
        assert_eq!(shard.metrics().outbox_sent, 1);
        assert_eq!(shard.metrics().outbox_dropped, 1);
        assert!(shard.world().resources().get::<ClientOutbox>().unwrap().is_empty());
    }

    #[test]
    fn run_loop_attaches_and_shuts_down() {
        let mut zones = ZoneManager::new("test");
        zones.init_linear_x(1, 512.0).unwrap();
        let shard = Shard::new(
            ZoneId(0),
            zones,
            ShardConfig {
                simulation_hz: 100.0,
                snapshot_hz: 100.0,
                ..ShardConfig::default()
            },
        )
        .unwrap();
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (evt_tx, evt_rx) = crossbeam_channel::unbounded();
        let handle = std::thread::spawn(move || shard.run(cmd_rx, evt_tx));

        let (mut client, rings) = Client::new(64 * 1024);
        cmd_tx
            .send(ShardCommand::Attach {
                client: client.id,
                rings,
                spawn: None,
            })
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));
        cmd_tx.send(ShardCommand::Shutdown).unwrap();

        let metrics = handle.join().unwrap().unwrap();
        assert!(metrics.ticks > 0);
        assert_eq!(metrics.clients_attached, 1);

        let events: Vec<ShardEvent> = evt_rx.try_iter().collect();
        assert!(matches!(events.last(), Some(ShardEvent::Stopped { zone: ZoneId(0) })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ShardEvent::Detached { client: c, .. } if *c == client.id)));
        assert!(!client.snapshots().is_empty());
    }
}
