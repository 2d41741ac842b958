use std::any::{Any, TypeId};
use std::collections::HashMap;

/// World-global singletons keyed by type.
#[derive(Default)]
pub struct Resources {
    values: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the previous value.
    pub fn insert<R: Send + 'static>(&mut self, value: R) -> Option<R> {
        self.values
            .insert(TypeId::of::<R>(), Box::new(value))
            .and_then(|old| old.downcast::<R>().ok())
            .map(|b| *b)
    }

    pub fn get<R: Send + 'static>(&self) -> Option<&R> {
        self.values.get(&TypeId::of::<R>())?.downcast_ref()
    }

    pub fn get_mut<R: Send + 'static>(&mut self) -> Option<&mut R> {
        self.values.get_mut(&TypeId::of::<R>())?.downcast_mut()
    }

    pub fn get_or_insert_with<R: Send + 'static>(&mut self, f: impl FnOnce() -> R) -> &mut R {
        let slot = self
            .values
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Box::new(f()));
        match slot.downcast_mut::<R>() {
            Some(r) => r,
            None => unreachable!("resource keyed by its own TypeId"),
        }
    }

    pub fn remove<R: Send + 'static>(&mut self) -> Option<R> {
        self.values
            .remove(&TypeId::of::<R>())
            .and_then(|b| b.downcast::<R>().ok())
            .map(|b| *b)
    }

    pub fn contains<R: Send + 'static>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<R>())
    }
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources")
            .field("len", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Default)]
    struct Gravity(f32);

    #[test]
    fn insert_get_replace_remove() {
        let mut res = Resources::new();
        assert!(res.insert(Gravity(9.8)).is_none());
        assert_eq!(res.get::<Gravity>(), Some(&Gravity(9.8)));
        assert_eq!(res.insert(Gravity(1.6)), Some(Gravity(9.8)));
        res.get_mut::<Gravity>().unwrap().0 = 3.7;
        assert_eq!(res.remove::<Gravity>(), Some(Gravity(3.7)));
        assert!(!res.contains::<Gravity>());
    }

    #[test]
    fn get_or_insert_initializes_once() {
        let mut res = Resources::new();
        res.get_or_insert_with(|| Gravity(1.0)).0 += 1.0;
        res.get_or_insert_with(|| Gravity(100.0)).0 += 1.0;
        assert_eq!(res.get::<Gravity>(), Some(&Gravity(3.0)));
    }
}
