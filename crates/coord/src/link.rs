use meridian_common::{ClientId, ZoneId};
use meridian_shard::ShardCommand;

/// The receiving end went away; the command is handed back.
#[derive(Debug)]
pub struct LinkClosed(pub ShardCommand);

/// Command path to one shard.
pub trait ShardLink {
    fn send(&self, cmd: ShardCommand) -> Result<(), LinkClosed>;
}

impl ShardLink for crossbeam_channel::Sender<ShardCommand> {
    fn send(&self, cmd: ShardCommand) -> Result<(), LinkClosed> {
        crossbeam_channel::Sender::send(self, cmd).map_err(|e| LinkClosed(e.into_inner()))
    }
}

/// Client-facing collaborator told about completed zone changes.
pub trait ClientNotifier {
    fn zone_changed(&mut self, client: ClientId, from: ZoneId, to: ZoneId);
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl ClientNotifier for LogNotifier {
    fn zone_changed(&mut self, client: ClientId, from: ZoneId, to: ZoneId) {
        tracing::info!(%client, %from, %to, "client changed zone");
    }
}
