use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generational reference to an entity slot.
///
/// `id` is a recycled slot index; `generation` advances (mod 256) each time the
/// slot is destroyed. A reference whose generation no longer matches the slot
/// is stale. After 256 reuses of one slot a stale reference aliases a live one;
/// holders that keep ids across long periods must re-validate by other means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    pub id: u32,
    pub generation: u8,
}

impl EntityId {
    /// Largest slot index representable in a packed id.
    pub const MAX_INDEX: u32 = 0x00FF_FFFE;

    pub const fn new(id: u32, generation: u8) -> Self {
        Self { id, generation }
    }

    pub fn index(self) -> usize {
        self.id as usize
    }

    /// Pack into a single key: slot in the low 24 bits, generation in the high 8.
    pub fn pack(self) -> u32 {
        ((self.generation as u32) << 24) | (self.id & 0x00FF_FFFF)
    }

    pub fn unpack(packed: u32) -> Self {
        Self {
            id: packed & 0x00FF_FFFF,
            generation: (packed >> 24) as u8,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.id, self.generation)
    }
}

/// Identifier of a connected client, stable across shard migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Compact 32-bit tag derived from the id, used as the wire `owner` value.
    pub fn owner_tag(&self) -> u32 {
        let b = self.0.as_bytes();
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a spatial zone. Zones are numbered densely from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(pub u32);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone-{}", self.0)
    }
}

/// Spatial transform: position, rotation, scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

/// Minimal entity state carried from one shard to another during migration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandoffState {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub health: Option<u32>,
}

impl Default for HandoffState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            health: None,
        }
    }
}
