use meridian_common::ZoneId;
use meridian_ecs::EcsError;
use meridian_net::CodecError;
use meridian_stream::StreamError;

use crate::config::ConfigError;
use crate::shard::ShardState;

#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("invalid shard config: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ecs(#[from] EcsError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("zone {0} is not part of the partition")]
    UnknownZone(ZoneId),
    #[error("shard is {0:?}, not running")]
    NotRunning(ShardState),
    #[error("plugin {plugin}: {reason}")]
    Plugin { plugin: String, reason: String },
}
