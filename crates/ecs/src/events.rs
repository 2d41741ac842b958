use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Typed event queues keyed by event type.
///
/// Producers `emit`; the consuming system `drain`s once per tick. Events not
/// drained accumulate until someone does.
#[derive(Default)]
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit<E: Send + 'static>(&mut self, event: E) {
        self.queue_mut::<E>().push(event);
    }

    /// Take every pending event of type `E`, in emission order.
    pub fn drain<E: Send + 'static>(&mut self) -> Vec<E> {
        self.queues
            .get_mut(&TypeId::of::<E>())
            .and_then(|q| q.downcast_mut::<Vec<E>>())
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub fn pending<E: Send + 'static>(&self) -> usize {
        self.queues
            .get(&TypeId::of::<E>())
            .and_then(|q| q.downcast_ref::<Vec<E>>())
            .map_or(0, Vec::len)
    }

    fn queue_mut<E: Send + 'static>(&mut self) -> &mut Vec<E> {
        let slot = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()));
        match slot.downcast_mut::<Vec<E>>() {
            Some(q) => q,
            None => unreachable!("event queue keyed by its own TypeId"),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("queues", &self.queues.len())
            .finish()
    }
}
