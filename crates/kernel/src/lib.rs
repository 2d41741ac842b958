//! Game kit: the standard gameplay components and systems a shard runs.
//!
//! Installs Transform3D, Velocity3D, InputState, MoveSpeed, Health and the
//! Renderable/PlayerControlled/Destroyed tags into a world, and schedules
//! ApplyInput → Movement3D in the simulation stage (with DamageApply ahead of
//! both) plus CleanupDestroyed in the post stage.
//!
//! # Invariants
//! - Velocity is derived from input each tick; position only from velocity.
//! - Health never leaves `[0, max_hp]`; reaching 0 tags the entity Destroyed.
//! - Destroyed entities are only removed through the deferred path.

pub mod components;
pub mod systems;

pub use components::GameComponents;
pub use systems::{ApplyInput, CleanupDestroyed, DamageApply, DamageEvent, Movement3D};

use glam::{Quat, Vec3};
use meridian_common::{EntityId, HandoffState};
use meridian_ecs::{EcsError, Scheduler, Stage, SystemDescriptor, World};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameKitOptions {
    /// MoveSpeed given to newly spawned players.
    pub default_speed: f32,
    /// Health given to players spawned without a handoff value.
    pub default_health: u32,
    pub enable_damage: bool,
}

impl Default for GameKitOptions {
    fn default() -> Self {
        Self {
            default_speed: 5.0,
            default_health: 100,
            enable_damage: true,
        }
    }
}

/// One client input sample, as applied to InputState.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputSample {
    pub seq: u32,
    pub move_dir: Vec3,
    pub look: Vec3,
    pub buttons: u32,
    pub analog1: f32,
    pub analog2: f32,
}

/// Installed game kit: component handles plus the options it was built with.
#[derive(Debug, Clone, Copy)]
pub struct GameKit {
    pub components: GameComponents,
    pub options: GameKitOptions,
}

impl GameKit {
    /// Register the components in `world` and the systems in `scheduler`.
    pub fn install(world: &mut World, scheduler: &mut Scheduler, options: GameKitOptions) -> Result<Self, EcsError> {
        let c = GameComponents::register(world)?;

        scheduler.add(
            SystemDescriptor::new("ApplyInput", Stage::Simulation, ApplyInput::new(c))
                .priority(ApplyInput::PRIORITY)
                .reads(&[c.input, c.move_speed])
                .writes(&[c.velocity]),
        );
        scheduler.add(
            SystemDescriptor::new("Movement3D", Stage::Simulation, Movement3D::new(c))
                .priority(Movement3D::PRIORITY)
                .reads(&[c.transform, c.velocity])
                .writes(&[c.transform]),
        );
        if options.enable_damage {
            scheduler.add(
                SystemDescriptor::new("DamageApply", Stage::Simulation, DamageApply::new(c))
                    .priority(DamageApply::PRIORITY)
                    .reads(&[c.health])
                    .writes(&[c.health, c.destroyed]),
            );
        }
        scheduler.add(
            SystemDescriptor::new("CleanupDestroyed", Stage::Post, CleanupDestroyed::new(c))
                .priority(CleanupDestroyed::PRIORITY)
                .reads(&[c.destroyed]),
        );

        tracing::info!(damage = options.enable_damage, "game kit installed");
        Ok(Self { components: c, options })
    }

    /// Create a player-controlled entity from a handoff state.
    pub fn spawn_player(&self, world: &mut World, state: &HandoffState) -> Result<EntityId, EcsError> {
        let c = &self.components;
        let e = world.create_entity()?;
        world.add_component(e, c.transform)?;
        world.set(e, c.pos, state.position.to_array())?;
        world.set(e, c.rot, state.rotation.to_array())?;
        world.set(e, c.scale, [1.0f32; 3])?;
        world.add_component(e, c.velocity)?;
        world.set(e, c.vel, state.velocity.to_array())?;
        world.add_component(e, c.input)?;
        world.add_component(e, c.move_speed)?;
        world.set(e, c.speed, [self.options.default_speed])?;
        let hp = state.health.unwrap_or(self.options.default_health);
        world.add_component(e, c.health)?;
        world.set(e, c.hp, [hp])?;
        world.set(e, c.max_hp, [hp.max(self.options.default_health)])?;
        world.add_component(e, c.player_controlled)?;
        world.add_component(e, c.renderable)?;
        tracing::debug!(entity = %e, pos = ?state.position, "player spawned");
        Ok(e)
    }

    /// Copy an entity's input sample into its InputState. Returns false when
    /// the entity is gone or has no InputState.
    pub fn apply_input(&self, world: &mut World, e: EntityId, input: &InputSample) -> Result<bool, EcsError> {
        let c = &self.components;
        if !world.set(e, c.input_move, input.move_dir.to_array())? {
            return Ok(false);
        }
        world.set(e, c.input_look, input.look.to_array())?;
        world.set(e, c.input_buttons, [input.buttons])?;
        world.set(e, c.input_analog1, [input.analog1])?;
        world.set(e, c.input_analog2, [input.analog2])?;
        world.set(e, c.input_seq, [input.seq])?;
        Ok(true)
    }

    pub fn position(&self, world: &World, e: EntityId) -> Result<Option<Vec3>, EcsError> {
        Ok(world.get::<f32, 3>(e, self.components.pos)?.map(Vec3::from_array))
    }

    /// Snapshot of what a neighbouring shard needs to recreate `e`.
    pub fn capture_handoff(&self, world: &World, e: EntityId) -> Result<Option<HandoffState>, EcsError> {
        let c = &self.components;
        let Some(pos) = world.get::<f32, 3>(e, c.pos)? else {
            return Ok(None);
        };
        let rotation = world
            .get::<f32, 4>(e, c.rot)?
            .map_or(Quat::IDENTITY, Quat::from_array);
        let velocity = world
            .get::<f32, 3>(e, c.vel)?
            .map_or(Vec3::ZERO, Vec3::from_array);
        let health = world.get::<u32, 1>(e, c.hp)?.map(|[hp]| hp);
        Ok(Some(HandoffState {
            position: Vec3::from_array(pos),
            rotation,
            velocity,
            health,
        }))
    }
}

pub fn crate_info() -> &'static str {
    "meridian-kernel v0.1.0"
}
