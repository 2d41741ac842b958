//! Transport between gateways and shards.
//!
//! [`ring`] moves framed bytes through a fixed-size SPSC ring without locks;
//! [`protocol`] defines the envelope those frames carry.
//!
//! # Invariants
//! - A ring has one producer and one consumer, enforced by handle ownership.
//! - Enqueue and dequeue never block; a full ring is reported, not waited on.
//! - A decoded snapshot entity always has exactly the fields its mask names.

pub mod protocol;
pub mod ring;

pub use protocol::{
    Body, BodyType, ClientHello, ClientInput, CodecError, Command, EntitySnapshot, Envelope, ErrorMessage,
    MSG_CLIENT_ENVELOPE, MSG_SERVER_ENVELOPE, PROTOCOL_MAJOR, PROTOCOL_MINOR, Ping, Pong, ServerHello,
    ServerInfo, ServerSnapshot, WireEntityId, mask, now_ms,
};
pub use ring::{FLAG_DROPPABLE, RingError, RingMessage, RingReader, RingStats, RingWriter, channel};

/// Encode `env` and enqueue it as one frame.
pub fn send_envelope(writer: &mut RingWriter, msg_type: u16, flags: u16, env: &Envelope) -> Result<usize, SendError> {
    let bytes = env.encode()?;
    writer.enqueue(msg_type, flags, &bytes)?;
    tracing::trace!(body = %env.body_type(), len = bytes.len(), "envelope enqueued");
    Ok(bytes.len())
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Ring(#[from] RingError),
}

pub fn crate_info() -> &'static str {
    "meridian-net v0.1.0"
}
