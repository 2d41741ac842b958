//! In-process host: one thread per shard, a router on the calling thread and
//! simulated gateway clients.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use crossbeam_channel::{Receiver, Sender, unbounded};
use glam::Vec3;
use meridian_common::{ClientId, ZoneId};
use meridian_coord::{CoordinatorStats, LogNotifier, MigrationCoordinator};
use meridian_net::{Body, ClientInput, Envelope, MSG_CLIENT_ENVELOPE, RingError, SendError, send_envelope};
use meridian_shard::{ClientRings, GatewayRings, Shard, ShardCommand, ShardError, ShardEvent, ShardMetrics};
use meridian_stream::{ZoneManager, tick_period};

use crate::config::RuntimeConfig;

struct ShardThread {
    zone: ZoneId,
    commands: Sender<ShardCommand>,
    thread: JoinHandle<Result<ShardMetrics, ShardError>>,
}

pub struct Runtime {
    zones: ZoneManager,
    coord: MigrationCoordinator<Sender<ShardCommand>, LogNotifier>,
    events: Receiver<ShardEvent>,
    shards: Vec<ShardThread>,
    ring_capacity: usize,
}

impl Runtime {
    pub fn start(config: &RuntimeConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let mut zones = ZoneManager::new(config.node_id.clone());
        zones.init_linear_x(config.zone_count, config.zone_width)?;

        let (event_tx, events) = unbounded();
        let mut coord = MigrationCoordinator::new(LogNotifier);
        let mut shards = Vec::new();
        for zone in zones.zones() {
            let shard = Shard::new(zone.id, zones.clone(), config.shard.clone())?;
            let (commands, command_rx) = unbounded();
            let event_tx = event_tx.clone();
            let thread = std::thread::Builder::new()
                .name(format!("shard-{}", zone.id.0))
                .spawn(move || shard.run(command_rx, event_tx))
                .with_context(|| format!("spawning shard thread for {}", zone.id))?;
            coord.add_shard(zone.id, commands.clone());
            shards.push(ShardThread {
                zone: zone.id,
                commands,
                thread,
            });
        }
        tracing::info!(shards = shards.len(), node = %config.node_id, "runtime started");

        Ok(Self {
            zones,
            coord,
            events,
            shards,
            ring_capacity: config.ring_capacity,
        })
    }

    pub fn coordinator(&self) -> &MigrationCoordinator<Sender<ShardCommand>, LogNotifier> {
        &self.coord
    }

    /// Open a session for a new client spawned at `spawn`.
    pub fn connect(&mut self, spawn: Vec3) -> anyhow::Result<SimClient> {
        let zone = self
            .zones
            .zone_by_position(spawn)
            .map(|z| z.id)
            .ok_or_else(|| anyhow!("spawn point {spawn} is outside every zone"))?;
        let (gateway, rings) = ClientRings::pair(self.ring_capacity)?;
        let id = ClientId::new();
        self.coord.open_client(id, "sim-gateway", zone, rings, Some(spawn))?;
        Ok(SimClient::new(id, gateway))
    }

    pub fn disconnect(&mut self, client: ClientId) -> anyhow::Result<()> {
        self.coord.close_client(client)?;
        Ok(())
    }

    /// Apply pending shard events to the routing table.
    pub fn pump(&mut self) -> usize {
        self.coord.pump(&self.events)
    }

    /// Stop every shard and wait for its thread.
    pub fn shutdown(mut self) -> anyhow::Result<RuntimeReport> {
        for shard in &self.shards {
            if shard.commands.send(ShardCommand::Shutdown).is_err() {
                tracing::warn!(zone = %shard.zone, "shard already gone");
            }
        }
        let mut shards = Vec::new();
        for shard in std::mem::take(&mut self.shards) {
            let metrics = shard
                .thread
                .join()
                .map_err(|_| anyhow!("shard thread for {} panicked", shard.zone))??;
            shards.push((shard.zone, metrics));
        }
        self.pump();
        tracing::info!("runtime stopped");
        Ok(RuntimeReport {
            coordinator: self.coord.stats(),
            shards,
        })
    }
}

#[derive(Debug)]
pub struct RuntimeReport {
    pub coordinator: CoordinatorStats,
    pub shards: Vec<(ZoneId, ShardMetrics)>,
}

/// Gateway stand-in for one client: writes inputs, reads what comes back.
#[derive(Debug)]
pub struct SimClient {
    pub id: ClientId,
    rings: GatewayRings,
    seq: u32,
    pub zone: Option<u32>,
    pub snapshots: u64,
    pub last_tick: u64,
    pub visible: usize,
    pub inputs_dropped: u64,
}

impl SimClient {
    fn new(id: ClientId, rings: GatewayRings) -> Self {
        Self {
            id,
            rings,
            seq: 0,
            zone: None,
            snapshots: 0,
            last_tick: 0,
            visible: 0,
            inputs_dropped: 0,
        }
    }

    pub fn send_input(&mut self, move_dir: Vec3) -> Result<(), SendError> {
        self.seq += 1;
        let env = Envelope::new(
            self.seq,
            Body::ClientInput(ClientInput {
                seq: self.seq,
                move_dir,
                view_dir: move_dir,
                buttons: 0,
                analog1: 0.0,
                analog2: 0.0,
            }),
        );
        match send_envelope(&mut self.rings.input, MSG_CLIENT_ENVELOPE, 0, &env) {
            Ok(_) => Ok(()),
            Err(SendError::Ring(RingError::Full)) => {
                self.inputs_dropped += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Read everything the shard has written. Returns the number of envelopes.
    pub fn poll(&mut self) -> usize {
        let mut n = 0;
        while let Some(msg) = self.rings.output.dequeue() {
            n += 1;
            match Envelope::decode(&msg.payload).map(|env| env.body) {
                Ok(Body::ServerInfo(info)) => {
                    tracing::debug!(client = %self.id, world = info.world_id, "server info");
                    self.zone = Some(info.world_id);
                }
                Ok(Body::ServerSnapshot(snap)) => {
                    self.snapshots += 1;
                    self.last_tick = u64::from(snap.server_tick);
                    if snap.full {
                        self.visible = snap.entities.len();
                    }
                }
                Ok(other) => tracing::debug!(client = %self.id, body = %other.body_type(), "ignored"),
                Err(err) => tracing::warn!(client = %self.id, %err, "undecodable server message"),
            }
        }
        n
    }
}

#[derive(Debug)]
pub struct DemoReport {
    pub clients: Vec<SimClient>,
    pub runtime: RuntimeReport,
}

/// Spawn `clients` players near the east edge of zone 0, walk them east for
/// `duration`, then disconnect and shut down.
pub fn run_demo(config: &RuntimeConfig, clients: usize, duration: Duration) -> anyhow::Result<DemoReport> {
    let mut runtime = Runtime::start(config)?;
    let mut sims = Vec::with_capacity(clients);
    for i in 0..clients {
        let x = (config.zone_width - 2.0 - i as f32 * 1.5).max(0.0);
        sims.push(runtime.connect(Vec3::new(x, 0.0, i as f32 * 3.0))?);
    }

    let ticker = crossbeam_channel::tick(tick_period(config.shard.simulation_hz)?);
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        ticker.recv()?;
        for sim in &mut sims {
            sim.send_input(Vec3::X)?;
            sim.poll();
        }
        runtime.pump();
    }

    for sim in &sims {
        if let Err(err) = runtime.disconnect(sim.id) {
            tracing::warn!(client = %sim.id, %err, "disconnect failed");
        }
    }
    let report = runtime.shutdown()?;
    for sim in &mut sims {
        sim.poll();
    }
    Ok(DemoReport {
        clients: sims,
        runtime: report,
    })
}
