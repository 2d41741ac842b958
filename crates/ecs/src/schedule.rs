//! Staged system scheduling.
//!
//! Systems are kept sorted by priority (ascending, stable for ties) and run
//! one after another for the stage being ticked. Declared read/write sets are
//! informational: overlapping writes within a stage are recorded as
//! [`WriteConflict`]s and logged, never rejected.

use std::fmt;

use crate::component::ComponentId;
use crate::error::EcsError;
use crate::world::World;

/// Tick phase. A shard ticks the stages in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Input,
    Simulation,
    /// Flushes deferred destroys after its systems.
    Post,
    /// Clears changed flags after its systems.
    Snapshot,
    Networking,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Input,
        Stage::Simulation,
        Stage::Post,
        Stage::Snapshot,
        Stage::Networking,
    ];
}

pub trait System: Send {
    fn run(&mut self, world: &mut World, dt: f32) -> Result<(), EcsError>;
}

impl<F> System for F
where
    F: FnMut(&mut World, f32) -> Result<(), EcsError> + Send,
{
    fn run(&mut self, world: &mut World, dt: f32) -> Result<(), EcsError> {
        self(world, dt)
    }
}

/// A system plus its scheduling metadata.
pub struct SystemDescriptor {
    pub name: String,
    pub stage: Stage,
    pub priority: i32,
    pub reads: Vec<ComponentId>,
    pub writes: Vec<ComponentId>,
    system: Box<dyn System>,
}

impl SystemDescriptor {
    pub fn new(name: impl Into<String>, stage: Stage, system: impl System + 'static) -> Self {
        Self {
            name: name.into(),
            stage,
            priority: 0,
            reads: Vec::new(),
            writes: Vec::new(),
            system: Box::new(system),
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn reads(mut self, components: &[ComponentId]) -> Self {
        self.reads.extend_from_slice(components);
        self
    }

    pub fn writes(mut self, components: &[ComponentId]) -> Self {
        self.writes.extend_from_slice(components);
        self
    }
}

impl fmt::Debug for SystemDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemDescriptor")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("priority", &self.priority)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

/// Two systems in one stage that declare writes to the same components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteConflict {
    pub stage: Stage,
    pub first: String,
    pub second: String,
    pub components: Vec<ComponentId>,
}

/// Outcome of one stage tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub ran: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    systems: Vec<SystemDescriptor>,
    conflicts: Vec<WriteConflict>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, desc: SystemDescriptor) {
        for other in self.systems.iter().filter(|s| s.stage == desc.stage) {
            let shared: Vec<ComponentId> = desc
                .writes
                .iter()
                .filter(|c| other.writes.contains(c))
                .copied()
                .collect();
            if !shared.is_empty() {
                tracing::warn!(
                    stage = ?desc.stage,
                    first = %other.name,
                    second = %desc.name,
                    components = ?shared,
                    "systems write the same components"
                );
                self.conflicts.push(WriteConflict {
                    stage: desc.stage,
                    first: other.name.clone(),
                    second: desc.name.clone(),
                    components: shared,
                });
            }
        }
        let at = self
            .systems
            .partition_point(|s| s.priority <= desc.priority);
        tracing::debug!(name = %desc.name, stage = ?desc.stage, priority = desc.priority, "system added");
        self.systems.insert(at, desc);
    }

    pub fn conflicts(&self) -> &[WriteConflict] {
        &self.conflicts
    }

    /// System names for a stage, in execution order.
    pub fn order(&self, stage: Stage) -> Vec<&str> {
        self.systems
            .iter()
            .filter(|s| s.stage == stage)
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Run every system of `stage`, then the stage's built-in step.
    ///
    /// A failing system is logged and skipped; later systems still run.
    pub fn tick(&mut self, world: &mut World, stage: Stage, dt: f32) -> StageReport {
        let _span = tracing::trace_span!("stage", ?stage).entered();
        let mut report = StageReport::default();
        for desc in self.systems.iter_mut().filter(|s| s.stage == stage) {
            report.ran += 1;
            if let Err(e) = desc.system.run(world, dt) {
                report.failed += 1;
                tracing::error!(system = %desc.name, error = %e, "system failed");
            }
        }
        match stage {
            Stage::Post => {
                world.flush_destroyed();
            }
            Stage::Snapshot => world.clear_changed(),
            _ => {}
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentDef;

    #[derive(Default)]
    struct Trace(Vec<&'static str>);

    fn recorder(label: &'static str) -> impl System + 'static {
        move |world: &mut World, _dt: f32| -> Result<(), EcsError> {
            world.resources_mut().get_or_insert_with(Trace::default).0.push(label);
            Ok(())
        }
    }

    #[test]
    fn priority_order_is_stable() {
        let mut world = World::default();
        let mut sched = Scheduler::new();
        sched.add(SystemDescriptor::new("late", Stage::Simulation, recorder("late")).priority(100));
        sched.add(SystemDescriptor::new("a", Stage::Simulation, recorder("a")).priority(50));
        sched.add(SystemDescriptor::new("b", Stage::Simulation, recorder("b")).priority(50));
        sched.add(SystemDescriptor::new("input", Stage::Input, recorder("input")).priority(0));

        let report = sched.tick(&mut world, Stage::Simulation, 0.1);
        assert_eq!(report, StageReport { ran: 3, failed: 0 });
        assert_eq!(world.resources().get::<Trace>().unwrap().0, vec!["a", "b", "late"]);
        assert_eq!(sched.order(Stage::Simulation), vec!["a", "b", "late"]);
    }

    #[test]
    fn write_conflicts_are_advisory() {
        let mut world = World::default();
        let pos = world.register_component(ComponentDef::tag("Pos")).unwrap();
        let vel = world.register_component(ComponentDef::tag("Vel")).unwrap();
        let mut sched = Scheduler::new();
        sched.add(SystemDescriptor::new("one", Stage::Simulation, recorder("one")).writes(&[pos]));
        sched.add(SystemDescriptor::new("two", Stage::Simulation, recorder("two")).writes(&[pos, vel]));
        sched.add(SystemDescriptor::new("three", Stage::Post, recorder("three")).writes(&[pos]));

        assert_eq!(sched.len(), 3);
        assert_eq!(
            sched.conflicts(),
            &[WriteConflict {
                stage: Stage::Simulation,
                first: "one".into(),
                second: "two".into(),
                components: vec![pos],
            }]
        );
    }

    #[test]
    fn failing_system_does_not_stop_stage() {
        let mut world = World::default();
        let mut sched = Scheduler::new();
        sched.add(SystemDescriptor::new(
            "broken",
            Stage::Simulation,
            |_: &mut World, _: f32| -> Result<(), EcsError> {
                Err(EcsError::System {
                    system: "broken".into(),
                    reason: "test".into(),
                })
            },
        ));
        sched.add(SystemDescriptor::new("ok", Stage::Simulation, recorder("ok")).priority(1));
        let report = sched.tick(&mut world, Stage::Simulation, 0.1);
        assert_eq!(report, StageReport { ran: 2, failed: 1 });
        assert_eq!(world.resources().get::<Trace>().unwrap().0, vec!["ok"]);
    }

    #[test]
    fn post_flushes_deferred_destroys() {
        let mut world = World::default();
        let mut sched = Scheduler::new();
        let e = world.create_entity().unwrap();
        world.destroy_entity_deferred(e);
        sched.tick(&mut world, Stage::Simulation, 0.1);
        assert!(world.is_alive(e));
        sched.tick(&mut world, Stage::Post, 0.1);
        assert!(!world.is_alive(e));
    }
}
