//! Per-observer snapshot assembly: relevance, ordering, full-vs-delta and
//! the byte budget.

use std::collections::{BTreeSet, HashMap};

use glam::{Quat, Vec3};
use meridian_common::EntityId;
use meridian_ecs::{EcsError, World};
use meridian_kernel::GameKit;
use meridian_net::{Body, CodecError, EntitySnapshot, Envelope, WireEntityId};
use meridian_stream::{AoiGrid, within_radius};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotLimits {
    pub radius: f32,
    pub max_entities: usize,
    pub max_bytes: usize,
}

/// The client a snapshot is being built for.
#[derive(Debug, Clone, Copy)]
pub struct Observer<'a> {
    pub own: EntityId,
    pub center: Vec3,
    /// Entities sent in the last delivered snapshot.
    pub prev: &'a BTreeSet<EntityId>,
    pub keyframe: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPlan {
    pub entities: Vec<EntitySnapshot>,
    pub removed: Vec<WireEntityId>,
    /// Everything the observer is considered to know about once this lands,
    /// including unchanged entities left out of `entities`.
    pub visible: BTreeSet<EntityId>,
    /// Relevant entities cut by the entity limit.
    pub trimmed: usize,
}

/// Select what `observer` can see and encode each entity as full or delta.
///
/// Relevant entities are those in nearby AOI cells within the exact radius.
/// The observer's own entity comes first, then the rest by distance.
pub fn plan(
    world: &World,
    kit: &GameKit,
    aoi: &AoiGrid,
    owners: &HashMap<EntityId, u32>,
    observer: &Observer<'_>,
    limits: &SnapshotLimits,
) -> Result<SnapshotPlan, EcsError> {
    let mut candidates = Vec::new();
    for e in aoi.query_cells(observer.center, limits.radius) {
        if !world.is_alive(e) {
            continue;
        }
        let Some(pos) = kit.position(world, e)? else {
            continue;
        };
        if e != observer.own && !within_radius(observer.center, pos, limits.radius) {
            continue;
        }
        candidates.push((e, observer.center.distance_squared(pos)));
    }
    candidates.sort_by(|a, b| {
        (a.0 != observer.own)
            .cmp(&(b.0 != observer.own))
            .then(a.1.total_cmp(&b.1))
            .then(a.0.cmp(&b.0))
    });
    let trimmed = candidates.len().saturating_sub(limits.max_entities);
    candidates.truncate(limits.max_entities);

    let mut entities = Vec::with_capacity(candidates.len());
    for &(e, _) in &candidates {
        let full = observer.keyframe || e == observer.own || !observer.prev.contains(&e);
        if let Some(snap) = entity_snapshot(world, kit, e, full, owners.get(&e).copied())? {
            entities.push(snap);
        }
    }

    let visible: BTreeSet<EntityId> = candidates.iter().map(|&(e, _)| e).collect();
    let removed = observer
        .prev
        .difference(&visible)
        .map(|&e| WireEntityId::from(e))
        .collect();

    Ok(SnapshotPlan {
        entities,
        removed,
        visible,
        trimmed,
    })
}

/// One entity's snapshot. A delta carries only the components whose changed
/// flag is set and is `None` when nothing changed.
pub fn entity_snapshot(
    world: &World,
    kit: &GameKit,
    e: EntityId,
    full: bool,
    owner: Option<u32>,
) -> Result<Option<EntitySnapshot>, EcsError> {
    let c = &kit.components;
    let mut snap = EntitySnapshot::new(e);

    if full || world.is_changed(e, c.transform) {
        if let Some(pos) = world.get::<f32, 3>(e, c.pos)? {
            let rot = world
                .get::<f32, 4>(e, c.rot)?
                .map_or(Quat::IDENTITY, Quat::from_array);
            snap = snap.with_transform(Vec3::from_array(pos), rot);
        }
    }
    if full || world.is_changed(e, c.velocity) {
        if let Some(vel) = world.get::<f32, 3>(e, c.vel)? {
            snap = snap.with_velocity(Vec3::from_array(vel));
        }
    }
    if full || world.is_changed(e, c.health) {
        if let Some([hp]) = world.get::<u32, 1>(e, c.hp)? {
            snap = snap.with_health(hp);
        }
    }
    if full {
        if let Some(tag) = owner {
            snap = snap.with_owner(tag);
        }
    }

    Ok((full || snap.mask != 0).then_some(snap))
}

/// Encode `env`, cutting trailing snapshot entities until the bytes fit in
/// `max_bytes`. Returns the bytes and the ids that were cut. An envelope
/// that is over budget with no entities left is returned as is.
pub fn encode_within(env: &mut Envelope, max_bytes: usize) -> Result<(Vec<u8>, Vec<EntityId>), CodecError> {
    let mut cut = Vec::new();
    loop {
        let bytes = env.encode()?;
        let Body::ServerSnapshot(snap) = &mut env.body else {
            return Ok((bytes, cut));
        };
        if bytes.len() <= max_bytes || snap.entities.is_empty() {
            return Ok((bytes, cut));
        }
        let per_entity = (bytes.len() / snap.entities.len()).max(1);
        let over = bytes.len() - max_bytes;
        let n = over.div_ceil(per_entity).clamp(1, snap.entities.len());
        let keep = snap.entities.len() - n;
        cut.extend(snap.entities.drain(keep..).filter_map(|s| EntityId::try_from(s.id).ok()));
    }
}
