use meridian_common::EntityId;

use crate::error::EcsError;

/// Slot allocator issuing generational entity ids.
///
/// Destroyed slots go on a free list and are reused most-recent-first, each
/// reuse carrying the incremented generation.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    generations: Vec<u8>,
    alive: Vec<bool>,
    free: Vec<u32>,
    live: usize,
    max: usize,
}

impl EntityRegistry {
    pub fn new(max_entities: usize) -> Self {
        Self {
            generations: Vec::new(),
            alive: Vec::new(),
            free: Vec::new(),
            live: 0,
            max: max_entities.min(EntityId::MAX_INDEX as usize + 1),
        }
    }

    pub fn create(&mut self) -> Result<EntityId, EcsError> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                if self.alive.len() >= self.max {
                    return Err(EcsError::CapacityExceeded {
                        what: "entities",
                        limit: self.max,
                    });
                }
                self.generations.push(0);
                self.alive.push(false);
                (self.alive.len() - 1) as u32
            }
        };
        self.alive[slot as usize] = true;
        self.live += 1;
        Ok(EntityId::new(slot, self.generations[slot as usize]))
    }

    /// Returns false for stale or already-dead references.
    pub fn destroy(&mut self, entity: EntityId) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = entity.index();
        self.alive[slot] = false;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free.push(entity.id);
        self.live -= 1;
        true
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        let slot = entity.index();
        slot < self.alive.len() && self.alive[slot] && self.generations[slot] == entity.generation
    }

    pub fn is_slot_alive(&self, slot: usize) -> bool {
        self.alive.get(slot).copied().unwrap_or(false)
    }

    /// Current id for a live slot.
    pub fn entity_at(&self, slot: usize) -> Option<EntityId> {
        if self.is_slot_alive(slot) {
            Some(EntityId::new(slot as u32, self.generations[slot]))
        } else {
            None
        }
    }

    pub fn generation_of(&self, slot: usize) -> Option<u8> {
        self.generations.get(slot).copied()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots ever allocated (live or free).
    pub fn slot_count(&self) -> usize {
        self.alive.len()
    }

    pub fn capacity(&self) -> usize {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_destroy() {
        let mut reg = EntityRegistry::new(8);
        let a = reg.create().unwrap();
        assert!(reg.is_alive(a));
        assert!(reg.destroy(a));
        assert!(!reg.is_alive(a));
        assert!(!reg.destroy(a));
        assert!(reg.is_empty());
    }

    #[test]
    fn reuse_bumps_generation() {
        let mut reg = EntityRegistry::new(8);
        let a = reg.create().unwrap();
        reg.destroy(a);
        let b = reg.create().unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.generation, a.generation + 1);
        assert!(!reg.is_alive(a));
        assert!(reg.is_alive(b));
    }

    #[test]
    fn generation_wraps_after_256_reuses() {
        let mut reg = EntityRegistry::new(1);
        let first = reg.create().unwrap();
        let mut e = first;
        for _ in 0..256 {
            reg.destroy(e);
            e = reg.create().unwrap();
        }
        assert_eq!(e.generation, first.generation);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut reg = EntityRegistry::new(2);
        reg.create().unwrap();
        reg.create().unwrap();
        assert!(matches!(
            reg.create(),
            Err(EcsError::CapacityExceeded { limit: 2, .. })
        ));
    }

    #[test]
    fn entity_at_reports_current_generation() {
        let mut reg = EntityRegistry::new(4);
        let a = reg.create().unwrap();
        reg.destroy(a);
        assert_eq!(reg.entity_at(0), None);
        let b = reg.create().unwrap();
        assert_eq!(reg.entity_at(0), Some(b));
    }
}
