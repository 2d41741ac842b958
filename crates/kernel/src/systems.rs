use glam::Vec3;
use meridian_common::EntityId;
use meridian_ecs::{EcsError, QuerySpec, System, World};

use crate::components::GameComponents;

/// Damage request consumed by [`DamageApply`] during the simulation stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageEvent {
    pub entity: EntityId,
    pub amount: f32,
}

/// Turns InputState.move into a velocity of length MoveSpeed.speed.
pub struct ApplyInput {
    c: GameComponents,
}

impl ApplyInput {
    pub const PRIORITY: i32 = 50;

    pub fn new(c: GameComponents) -> Self {
        Self { c }
    }
}

impl System for ApplyInput {
    fn run(&mut self, world: &mut World, _dt: f32) -> Result<(), EcsError> {
        let c = &self.c;
        let spec = QuerySpec::new().with(c.input).with(c.move_speed).with(c.velocity);
        let targets: Vec<EntityId> = world.query(&spec).collect();
        for e in targets {
            let Some(mv) = world.get::<f32, 3>(e, c.input_move)? else {
                continue;
            };
            let speed = world.get::<f32, 1>(e, c.speed)?.map_or(0.0, |[s]| s);
            let vel = (Vec3::from_array(mv).normalize_or_zero() * speed).to_array();
            // Unchanged velocity must not mark the row changed.
            if world.get::<f32, 3>(e, c.vel)? != Some(vel) {
                world.set(e, c.vel, vel)?;
            }
        }
        Ok(())
    }
}

/// Integrates position from velocity.
pub struct Movement3D {
    c: GameComponents,
}

impl Movement3D {
    pub const PRIORITY: i32 = 100;

    pub fn new(c: GameComponents) -> Self {
        Self { c }
    }
}

impl System for Movement3D {
    fn run(&mut self, world: &mut World, dt: f32) -> Result<(), EcsError> {
        let c = &self.c;
        let spec = QuerySpec::new().with(c.transform).with(c.velocity);
        let targets: Vec<EntityId> = world.query(&spec).collect();
        for e in targets {
            let (Some(pos), Some(vel)) = (world.get::<f32, 3>(e, c.pos)?, world.get::<f32, 3>(e, c.vel)?) else {
                continue;
            };
            let vel = Vec3::from_array(vel);
            if vel == Vec3::ZERO {
                continue;
            }
            let next = Vec3::from_array(pos) + vel * dt;
            world.set(e, c.pos, next.to_array())?;
        }
        Ok(())
    }
}

/// Drains [`DamageEvent`]s, clamps hp into `[0, max_hp]` and tags the dead.
pub struct DamageApply {
    c: GameComponents,
}

impl DamageApply {
    pub const PRIORITY: i32 = 40;

    pub fn new(c: GameComponents) -> Self {
        Self { c }
    }
}

impl System for DamageApply {
    fn run(&mut self, world: &mut World, _dt: f32) -> Result<(), EcsError> {
        let c = &self.c;
        let events = world.events_mut().drain::<DamageEvent>();
        for ev in events {
            let Some([hp]) = world.get::<u32, 1>(ev.entity, c.hp)? else {
                continue;
            };
            let max_hp = world.get::<u32, 1>(ev.entity, c.max_hp)?.map_or(0, |[m]| m);
            let mut next = (hp as f64 - ev.amount.max(0.0) as f64).max(0.0);
            if max_hp > 0 {
                next = next.min(max_hp as f64);
            }
            let next = next as u32;
            world.set(ev.entity, c.hp, [next])?;
            if next == 0 && !world.has_component(ev.entity, c.destroyed) {
                tracing::debug!(entity = %ev.entity, "health depleted");
                world.add_component(ev.entity, c.destroyed)?;
            }
        }
        Ok(())
    }
}

/// Defers destruction of everything tagged Destroyed.
pub struct CleanupDestroyed {
    c: GameComponents,
}

impl CleanupDestroyed {
    pub const PRIORITY: i32 = 1000;

    pub fn new(c: GameComponents) -> Self {
        Self { c }
    }
}

impl System for CleanupDestroyed {
    fn run(&mut self, world: &mut World, _dt: f32) -> Result<(), EcsError> {
        let spec = QuerySpec::new().with(self.c.destroyed);
        let doomed: Vec<EntityId> = world.query(&spec).collect();
        for e in doomed {
            world.destroy_entity_deferred(e);
        }
        Ok(())
    }
}
