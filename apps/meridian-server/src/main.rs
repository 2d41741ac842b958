mod config;
mod runtime;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::RuntimeConfig;

#[derive(Parser)]
#[command(name = "meridian-server", about = "Sharded real-time simulation host")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON runtime config; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Print the effective config as JSON
    Config,
    /// Show the zone partition
    Zones,
    /// Run shards with simulated clients walking across zone edges
    Run {
        /// Number of simulated clients
        #[arg(long, default_value = "4")]
        clients: usize,
        /// Seconds to run
        #[arg(short, long, default_value = "5")]
        seconds: u64,
        /// Override the zone count
        #[arg(long)]
        zones: Option<u32>,
        /// Override the snapshot rate
        #[arg(long)]
        snapshot_hz: Option<f32>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut config = RuntimeConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("meridian-server v{}", env!("CARGO_PKG_VERSION"));
            println!("ecs: {}", meridian_ecs::crate_info());
            println!("kernel: {}", meridian_kernel::crate_info());
            println!("stream: {}", meridian_stream::crate_info());
            println!("net: {}", meridian_net::crate_info());
            println!("shard: {}", meridian_shard::crate_info());
            println!("coord: {}", meridian_coord::crate_info());
            println!(
                "protocol: {}.{}",
                meridian_net::PROTOCOL_MAJOR,
                meridian_net::PROTOCOL_MINOR
            );
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Zones => {
            let mut zones = meridian_stream::ZoneManager::new(config.node_id.clone());
            zones.init_linear_x(config.zone_count, config.zone_width)?;
            println!("node {}: {} zones", zones.node_id(), zones.zones().len());
            for zone in zones.zones() {
                println!(
                    "  {} shard={} x=[{}, {}) version={}",
                    zone.id, zone.shard_index, zone.bounds.min.x, zone.bounds.max.x, zone.version
                );
            }
        }
        Commands::Run {
            clients,
            seconds,
            zones,
            snapshot_hz,
        } => {
            if let Some(n) = zones {
                config.zone_count = n;
            }
            if let Some(hz) = snapshot_hz {
                config.shard.snapshot_hz = hz;
            }
            config.validate()?;

            println!(
                "Running {} zones x {} wide, {clients} clients for {seconds}s",
                config.zone_count, config.zone_width
            );
            let report = runtime::run_demo(&config, clients, Duration::from_secs(seconds))?;

            for (zone, m) in &report.runtime.shards {
                println!(
                    "{zone}: ticks={} inputs={} snapshots={} dropped={} bytes={} migrations={}",
                    m.ticks, m.inputs_applied, m.snapshots_sent, m.snapshots_dropped, m.snapshot_bytes, m.migrations_requested
                );
            }
            let c = report.runtime.coordinator;
            println!(
                "coordinator: opened={} closed={} migrations started={} completed={} rejected={}",
                c.clients_opened, c.clients_closed, c.migrations_started, c.migrations_completed, c.migrations_rejected
            );
            for sim in &report.clients {
                println!(
                    "client {}: zone={} snapshots={} last_tick={} visible={} inputs_dropped={}",
                    sim.id,
                    sim.zone.map_or("-".to_owned(), |z| z.to_string()),
                    sim.snapshots,
                    sim.last_tick,
                    sim.visible,
                    sim.inputs_dropped
                );
            }
        }
    }

    Ok(())
}
