use std::ops::Range;
use std::slice;

use meridian_common::EntityId;

use crate::component::ComponentId;
use crate::entity::EntityRegistry;
use crate::signature::{Signature, SignatureTable};
use crate::storage::ComponentStore;

/// Include/exclude component lists for a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySpec {
    pub with: Vec<ComponentId>,
    pub without: Vec<ComponentId>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, c: ComponentId) -> Self {
        self.with.push(c);
        self
    }

    pub fn without(mut self, c: ComponentId) -> Self {
        self.without.push(c);
        self
    }
}

enum Source<'w> {
    Dense(slice::Iter<'w, EntityId>),
    Slots(Range<usize>),
    Empty,
}

/// Lazy iterator over entities matching a [`QuerySpec`].
///
/// Holds a shared borrow of the world, so no structural change can happen
/// while it is live. Collect first when the loop body needs `&mut World`.
pub struct QueryIter<'w> {
    source: Source<'w>,
    entities: &'w EntityRegistry,
    signatures: &'w SignatureTable,
    include: Signature,
    exclude: Signature,
}

impl<'w> QueryIter<'w> {
    pub(crate) fn new(
        spec: &QuerySpec,
        entities: &'w EntityRegistry,
        signatures: &'w SignatureTable,
        stores: &'w [ComponentStore],
    ) -> Self {
        let words = signatures.words_per_entity();
        let source = if spec.with.is_empty() {
            Source::Slots(0..entities.slot_count())
        } else {
            match pivot(&spec.with, stores) {
                Some(store) => Source::Dense(store.entities().iter()),
                None => Source::Empty,
            }
        };
        Self {
            source,
            entities,
            signatures,
            include: Signature::from_components(words, &spec.with),
            exclude: Signature::from_components(words, &spec.without),
        }
    }

    fn accept(&self, e: EntityId) -> bool {
        self.entities.is_alive(e) && self.signatures.matches(e.index(), &self.include, &self.exclude)
    }
}

/// Rarest included component; ties resolve to the first listed.
fn pivot<'w>(with: &[ComponentId], stores: &'w [ComponentStore]) -> Option<&'w ComponentStore> {
    let mut best: Option<&ComponentStore> = None;
    for c in with {
        let store = stores.get(c.index())?;
        if best.is_none_or(|b| store.len() < b.len()) {
            best = Some(store);
        }
    }
    best
}

impl Iterator for QueryIter<'_> {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        loop {
            let candidate = match &mut self.source {
                Source::Dense(it) => *it.next()?,
                Source::Slots(range) => {
                    let slot = range.next()?;
                    match self.entities.entity_at(slot) {
                        Some(e) => e,
                        None => continue,
                    }
                }
                Source::Empty => return None,
            };
            if self.accept(candidate) {
                return Some(candidate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentDef;

    #[test]
    fn pivot_prefers_smallest_then_first() {
        let mut a = ComponentStore::new(ComponentId(0), &ComponentDef::tag("A"));
        let mut b = ComponentStore::new(ComponentId(1), &ComponentDef::tag("B"));
        let c = ComponentStore::new(ComponentId(2), &ComponentDef::tag("C"));
        a.insert(EntityId::new(0, 0));
        a.insert(EntityId::new(1, 0));
        b.insert(EntityId::new(0, 0));
        let stores = vec![a, b, c];

        let p = pivot(&[ComponentId(0), ComponentId(1)], &stores).unwrap();
        assert_eq!(p.id(), ComponentId(1));

        let p = pivot(&[ComponentId(0), ComponentId(2)], &stores).unwrap();
        assert_eq!(p.id(), ComponentId(2));

        assert!(pivot(&[ComponentId(9)], &stores).is_none());
    }

    #[test]
    fn tie_resolves_to_first_listed() {
        let a = ComponentStore::new(ComponentId(0), &ComponentDef::tag("A"));
        let b = ComponentStore::new(ComponentId(1), &ComponentDef::tag("B"));
        let stores = vec![a, b];
        let p = pivot(&[ComponentId(1), ComponentId(0)], &stores).unwrap();
        assert_eq!(p.id(), ComponentId(1));
    }
}
