use meridian_ecs::{ComponentDef, ComponentId, EcsError, FieldHandle, FieldSpec, FieldType, World};

/// Ids and field handles for the standard gameplay components.
///
/// Registered once per world; all fields are resolved up front so systems
/// never look fields up by name.
#[derive(Debug, Clone, Copy)]
pub struct GameComponents {
    pub transform: ComponentId,
    pub velocity: ComponentId,
    pub input: ComponentId,
    pub move_speed: ComponentId,
    pub health: ComponentId,
    pub renderable: ComponentId,
    pub player_controlled: ComponentId,
    pub destroyed: ComponentId,

    pub pos: FieldHandle,
    pub rot: FieldHandle,
    pub scale: FieldHandle,
    pub vel: FieldHandle,
    pub input_move: FieldHandle,
    pub input_look: FieldHandle,
    pub input_buttons: FieldHandle,
    pub input_analog1: FieldHandle,
    pub input_analog2: FieldHandle,
    pub input_seq: FieldHandle,
    pub speed: FieldHandle,
    pub hp: FieldHandle,
    pub max_hp: FieldHandle,
}

impl GameComponents {
    pub fn register(world: &mut World) -> Result<Self, EcsError> {
        let transform = world.register_component(ComponentDef::structured(
            "Transform3D",
            vec![
                FieldSpec::new("pos", FieldType::F32, 3),
                FieldSpec::new("rot", FieldType::F32, 4),
                FieldSpec::new("scale", FieldType::F32, 3),
            ],
        ))?;
        let velocity = world.register_component(ComponentDef::structured(
            "Velocity3D",
            vec![FieldSpec::new("vel", FieldType::F32, 3)],
        ))?;
        // move/look in -1..1, buttons as a bitmask, seq is the last applied input.
        let input = world.register_component(ComponentDef::structured(
            "InputState",
            vec![
                FieldSpec::new("move", FieldType::F32, 3),
                FieldSpec::new("look", FieldType::F32, 3),
                FieldSpec::scalar("buttons", FieldType::U32),
                FieldSpec::scalar("analog1", FieldType::F32),
                FieldSpec::scalar("analog2", FieldType::F32),
                FieldSpec::scalar("seq", FieldType::U32),
            ],
        ))?;
        let move_speed = world.register_component(ComponentDef::structured(
            "MoveSpeed",
            vec![FieldSpec::scalar("speed", FieldType::F32)],
        ))?;
        let health = world.register_component(ComponentDef::structured(
            "Health",
            vec![
                FieldSpec::scalar("hp", FieldType::U32),
                FieldSpec::scalar("max_hp", FieldType::U32),
            ],
        ))?;
        let renderable = world.register_component(ComponentDef::tag("Renderable"))?;
        let player_controlled = world.register_component(ComponentDef::tag("PlayerControlled"))?;
        let destroyed = world.register_component(ComponentDef::tag("Destroyed"))?;

        Ok(Self {
            transform,
            velocity,
            input,
            move_speed,
            health,
            renderable,
            player_controlled,
            destroyed,
            pos: world.field(transform, "pos")?,
            rot: world.field(transform, "rot")?,
            scale: world.field(transform, "scale")?,
            vel: world.field(velocity, "vel")?,
            input_move: world.field(input, "move")?,
            input_look: world.field(input, "look")?,
            input_buttons: world.field(input, "buttons")?,
            input_analog1: world.field(input, "analog1")?,
            input_analog2: world.field(input, "analog2")?,
            input_seq: world.field(input, "seq")?,
            speed: world.field(move_speed, "speed")?,
            hp: world.field(health, "hp")?,
            max_hp: world.field(health, "max_hp")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_all_components() {
        let mut world = World::default();
        let c = GameComponents::register(&mut world).unwrap();
        assert_eq!(world.components().len(), 8);
        assert_eq!(world.component_id("Health"), Some(c.health));
        assert_eq!(c.rot.count, 4);
        assert_eq!(c.hp.ty, FieldType::U32);
    }

    #[test]
    fn second_registration_fails() {
        let mut world = World::default();
        GameComponents::register(&mut world).unwrap();
        assert!(matches!(
            GameComponents::register(&mut world),
            Err(EcsError::ComponentAlreadyDefined(_))
        ));
    }
}
