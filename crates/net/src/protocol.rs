//! Wire envelope shared by clients, gateways and shards.
//!
//! Every message is an [`Envelope`] carrying a sequence number, a millisecond
//! timestamp and one [`Body`]. Envelopes are CBOR-encoded; the body is tagged
//! `{ "type": <BodyType>, "data": <fields> }`.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use glam::{Quat, Vec3};
use meridian_common::EntityId;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_MAJOR: u16 = 1;
pub const PROTOCOL_MINOR: u16 = 0;

/// Ring frame type: client envelope, gateway → shard.
pub const MSG_CLIENT_ENVELOPE: u16 = 1;
/// Ring frame type: server envelope, shard → gateway.
pub const MSG_SERVER_ENVELOPE: u16 = 2;

/// `EntitySnapshot::mask` bits.
pub mod mask {
    pub const TRANSFORM: u32 = 1 << 0;
    pub const VELOCITY: u32 = 1 << 1;
    pub const HEALTH: u32 = 1 << 2;
    pub const OWNER: u32 = 1 << 3;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("CBOR serialization error: {0}")]
    Encode(String),
    #[error("CBOR deserialization error: {0}")]
    Decode(String),
    #[error("entity {id_low}: mask {mask:#06b} disagrees with present fields")]
    MaskMismatch { id_low: u32, mask: u32 },
    #[error("entity id {id_low} generation {gen_high} out of range")]
    InvalidEntityId { id_low: u32, gen_high: u32 },
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sequence: u32,
    pub timestamp_ms: u64,
    pub body: Body,
}

impl Envelope {
    /// Envelope stamped with the current time.
    pub fn new(sequence: u32, body: Body) -> Self {
        Self {
            sequence,
            timestamp_ms: now_ms(),
            body,
        }
    }

    pub fn body_type(&self) -> BodyType {
        self.body.body_type()
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode and check every snapshot entity's mask against its fields and
    /// every entity id against the id range.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let env: Envelope = ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        if let Body::ServerSnapshot(snap) = &env.body {
            for e in &snap.entities {
                e.validate()?;
            }
            for &w in &snap.removed {
                EntityId::try_from(w)?;
            }
        }
        Ok(env)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Body {
    Ping(Ping),
    Pong(Pong),
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    ClientInput(ClientInput),
    Command(Command),
    ServerSnapshot(ServerSnapshot),
    ServerInfo(ServerInfo),
    Error(ErrorMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyType {
    Ping,
    Pong,
    ClientHello,
    ServerHello,
    ClientInput,
    Command,
    ServerSnapshot,
    ServerInfo,
    Error,
}

impl Body {
    pub fn body_type(&self) -> BodyType {
        match self {
            Body::Ping(_) => BodyType::Ping,
            Body::Pong(_) => BodyType::Pong,
            Body::ClientHello(_) => BodyType::ClientHello,
            Body::ServerHello(_) => BodyType::ServerHello,
            Body::ClientInput(_) => BodyType::ClientInput,
            Body::Command(_) => BodyType::Command,
            Body::ServerSnapshot(_) => BodyType::ServerSnapshot,
            Body::ServerInfo(_) => BodyType::ServerInfo,
            Body::Error(_) => BodyType::Error,
        }
    }
}

impl fmt::Display for BodyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub client_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub server_time_ms: u64,
    pub echo_client_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHello {
    pub client_version: String,
    pub protocol_major: u16,
    pub protocol_minor: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHello {
    pub server_version: String,
    pub protocol_major: u16,
    pub protocol_minor: u16,
    pub world_id: u32,
    pub tick_rate: u16,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientInput {
    pub seq: u32,
    #[serde(rename = "move")]
    pub move_dir: Vec3,
    pub view_dir: Vec3,
    pub buttons: u32,
    pub analog1: f32,
    pub analog2: f32,
}

/// Application-defined message, dispatched by `command_type` to handlers
/// registered on the shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub command_type: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub world_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: u32,
    pub message: String,
}

/// Entity reference as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WireEntityId {
    pub id_low: u32,
    pub gen_high: u32,
}

impl From<EntityId> for WireEntityId {
    fn from(e: EntityId) -> Self {
        Self {
            id_low: e.id,
            gen_high: e.generation as u32,
        }
    }
}

impl TryFrom<WireEntityId> for EntityId {
    type Error = CodecError;

    /// Generations above 255 and slots above `EntityId::MAX_INDEX` never
    /// come from a world and are rejected.
    fn try_from(w: WireEntityId) -> Result<Self, CodecError> {
        let invalid = CodecError::InvalidEntityId {
            id_low: w.id_low,
            gen_high: w.gen_high,
        };
        if w.id_low > EntityId::MAX_INDEX {
            return Err(invalid);
        }
        let generation = u8::try_from(w.gen_high).map_err(|_| invalid)?;
        Ok(EntityId::new(w.id_low, generation))
    }
}

/// Per-entity state in a snapshot. A field is present iff its mask bit is set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: WireEntityId,
    pub mask: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rot: Option<Quat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vel: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hp: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<u32>,
}

impl EntitySnapshot {
    pub fn new(id: impl Into<WireEntityId>) -> Self {
        Self {
            id: id.into(),
            mask: 0,
            pos: None,
            rot: None,
            vel: None,
            hp: None,
            owner: None,
        }
    }

    pub fn with_transform(mut self, pos: Vec3, rot: Quat) -> Self {
        self.pos = Some(pos);
        self.rot = Some(rot);
        self.mask |= mask::TRANSFORM;
        self
    }

    pub fn with_velocity(mut self, vel: Vec3) -> Self {
        self.vel = Some(vel);
        self.mask |= mask::VELOCITY;
        self
    }

    pub fn with_health(mut self, hp: u32) -> Self {
        self.hp = Some(hp);
        self.mask |= mask::HEALTH;
        self
    }

    pub fn with_owner(mut self, owner: u32) -> Self {
        self.owner = Some(owner);
        self.mask |= mask::OWNER;
        self
    }

    pub fn validate(&self) -> Result<(), CodecError> {
        EntityId::try_from(self.id)?;
        let has = |bit: u32| self.mask & bit != 0;
        let ok = has(mask::TRANSFORM) == self.pos.is_some()
            && has(mask::TRANSFORM) == self.rot.is_some()
            && has(mask::VELOCITY) == self.vel.is_some()
            && has(mask::HEALTH) == self.hp.is_some()
            && has(mask::OWNER) == self.owner.is_some();
        if ok {
            Ok(())
        } else {
            Err(CodecError::MaskMismatch {
                id_low: self.id.id_low,
                mask: self.mask,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub full: bool,
    pub server_tick: u32,
    pub last_input_seq_acked: u32,
    pub entities: Vec<EntitySnapshot>,
    pub removed: Vec<WireEntityId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(body: Body) {
        let env = Envelope {
            sequence: 42,
            timestamp_ms: 1_700_000_000_123,
            body,
        };
        let bytes = env.encode().unwrap();
        let back = Envelope::decode(&bytes).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn ping_pong_roundtrip() {
        roundtrip(Body::Ping(Ping {
            client_time_ms: 123_456,
        }));
        roundtrip(Body::Pong(Pong {
            server_time_ms: 99,
            echo_client_time_ms: 123_456,
        }));
    }

    #[test]
    fn client_input_roundtrip() {
        roundtrip(Body::ClientInput(ClientInput {
            seq: 7,
            move_dir: Vec3::new(1.0, 0.0, -0.5),
            view_dir: Vec3::Z,
            buttons: 0b101,
            analog1: 0.25,
            analog2: -1.0,
        }));
    }

    #[test]
    fn snapshot_roundtrip() {
        let own = EntitySnapshot::new(EntityId::new(3, 1))
            .with_transform(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY)
            .with_velocity(Vec3::new(5.0, 0.0, 0.0))
            .with_health(80)
            .with_owner(0xDEAD_BEEF);
        let delta = EntitySnapshot::new(EntityId::new(9, 0)).with_health(12);
        roundtrip(Body::ServerSnapshot(ServerSnapshot {
            full: false,
            server_tick: 1000,
            last_input_seq_acked: 55,
            entities: vec![own, delta],
            removed: vec![WireEntityId::from(EntityId::new(4, 2))],
        }));
    }

    #[test]
    fn remaining_bodies_roundtrip() {
        roundtrip(Body::ClientHello(ClientHello {
            client_version: "0.1.0".into(),
            protocol_major: PROTOCOL_MAJOR,
            protocol_minor: PROTOCOL_MINOR,
        }));
        roundtrip(Body::ServerHello(ServerHello {
            server_version: "0.1.0".into(),
            protocol_major: PROTOCOL_MAJOR,
            protocol_minor: PROTOCOL_MINOR,
            world_id: 2,
            tick_rate: 30,
            time_ms: 5,
        }));
        roundtrip(Body::Command(Command {
            command_type: 17,
            payload: vec![1, 2, 3],
        }));
        roundtrip(Body::ServerInfo(ServerInfo { world_id: 1 }));
        roundtrip(Body::Error(ErrorMessage {
            code: 400,
            message: "bad".into(),
        }));
    }

    #[test]
    fn mask_mismatch_rejected() {
        let mut bad = EntitySnapshot::new(EntityId::new(1, 0)).with_health(5);
        bad.mask |= mask::VELOCITY;
        let env = Envelope::new(
            1,
            Body::ServerSnapshot(ServerSnapshot {
                full: true,
                server_tick: 0,
                last_input_seq_acked: 0,
                entities: vec![bad],
                removed: vec![],
            }),
        );
        let bytes = env.encode().unwrap();
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(CodecError::MaskMismatch { id_low: 1, .. })
        ));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            Envelope::decode(&[0xff, 0x00, 0x13]),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn wire_id_carries_generation() {
        let e = EntityId::new(77, 200);
        let w = WireEntityId::from(e);
        assert_eq!(w.gen_high, 200);
        assert_eq!(EntityId::try_from(w).unwrap(), e);
    }

    #[test]
    fn out_of_range_wire_ids_rejected() {
        let wide_gen = WireEntityId { id_low: 3, gen_high: 256 };
        assert_eq!(
            EntityId::try_from(wide_gen),
            Err(CodecError::InvalidEntityId { id_low: 3, gen_high: 256 })
        );
        let wide_slot = WireEntityId {
            id_low: EntityId::MAX_INDEX + 1,
            gen_high: 0,
        };
        assert!(EntityId::try_from(wide_slot).is_err());

        let env = Envelope::new(
            1,
            Body::ServerSnapshot(ServerSnapshot {
                full: false,
                server_tick: 9,
                last_input_seq_acked: 0,
                entities: vec![],
                removed: vec![wide_gen],
            }),
        );
        let bytes = env.encode().unwrap();
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(CodecError::InvalidEntityId { gen_high: 256, .. })
        ));
    }
}
