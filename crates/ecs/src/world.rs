use std::collections::BTreeSet;

use meridian_common::EntityId;

use crate::component::{ComponentDef, ComponentId, ComponentKind, FieldHandle, Scalar};
use crate::entity::EntityRegistry;
use crate::error::EcsError;
use crate::events::EventBus;
use crate::query::{QueryIter, QuerySpec};
use crate::registry::{ComponentInfo, ComponentRegistry};
use crate::resources::Resources;
use crate::signature::SignatureTable;
use crate::storage::ComponentStore;

/// What `add_component` does when the entity already has the component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Leave existing data untouched and report `Ok(false)`.
    #[default]
    Ignore,
    /// Fail with [`EcsError::DuplicateComponent`].
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldOptions {
    pub max_entities: usize,
    pub max_components: usize,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for WorldOptions {
    fn default() -> Self {
        Self {
            max_entities: 100_000,
            max_components: 1024,
            duplicate_policy: DuplicatePolicy::Ignore,
        }
    }
}

/// Entity-component world.
///
/// Owns the entity registry, one store per registered component, the flat
/// signature table, the deferred-destroy queue, events and resources.
/// Signatures and stores are updated together on every add, remove and
/// destroy.
#[derive(Debug)]
pub struct World {
    options: WorldOptions,
    entities: EntityRegistry,
    registry: ComponentRegistry,
    stores: Vec<ComponentStore>,
    signatures: SignatureTable,
    pending_destroy: BTreeSet<EntityId>,
    events: EventBus,
    resources: Resources,
}

impl Default for World {
    fn default() -> Self {
        Self::new(WorldOptions::default())
    }
}

impl World {
    pub fn new(options: WorldOptions) -> Self {
        Self {
            options,
            entities: EntityRegistry::new(options.max_entities),
            registry: ComponentRegistry::new(options.max_components),
            stores: Vec::new(),
            signatures: SignatureTable::new(options.max_components),
            pending_destroy: BTreeSet::new(),
            events: EventBus::new(),
            resources: Resources::new(),
        }
    }

    pub fn options(&self) -> &WorldOptions {
        &self.options
    }

    // --- Components ---

    pub fn register_component(&mut self, def: ComponentDef) -> Result<ComponentId, EcsError> {
        let id = self.registry.register(def)?;
        let info = self.registry.try_get(id)?;
        self.stores.push(ComponentStore::new(id, &info.def));
        Ok(id)
    }

    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.registry.id_of(name)
    }

    pub fn component_info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.registry.get(id)
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Resolve a field handle. Do this once at setup; handles stay valid for
    /// the life of the world.
    pub fn field(&self, component: ComponentId, name: &str) -> Result<FieldHandle, EcsError> {
        let info = self.registry.try_get(component)?;
        let index = info
            .def
            .field_index(name)
            .ok_or_else(|| EcsError::FieldNotFound {
                component: info.name().to_owned(),
                field: name.to_owned(),
            })?;
        let spec = &info.def.fields[index];
        Ok(FieldHandle {
            component,
            field: index as u16,
            ty: spec.ty,
            count: spec.count,
        })
    }

    fn store(&self, c: ComponentId) -> Result<&ComponentStore, EcsError> {
        self.stores
            .get(c.index())
            .ok_or_else(|| EcsError::ComponentNotFound(format!("#{}", c.0)))
    }

    fn store_mut(&mut self, c: ComponentId) -> Result<&mut ComponentStore, EcsError> {
        self.stores
            .get_mut(c.index())
            .ok_or_else(|| EcsError::ComponentNotFound(format!("#{}", c.0)))
    }

    // --- Entities ---

    pub fn create_entity(&mut self) -> Result<EntityId, EcsError> {
        let e = self.entities.create()?;
        self.signatures.clear_all(e.index());
        Ok(e)
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    /// Queue `entity` for destruction at the end of the `post` stage.
    ///
    /// Returns true only when this call queued it; repeated calls and stale
    /// references are ignored.
    pub fn destroy_entity_deferred(&mut self, entity: EntityId) -> bool {
        if !self.entities.is_alive(entity) {
            return false;
        }
        self.pending_destroy.insert(entity)
    }

    pub fn is_pending_destroy(&self, entity: EntityId) -> bool {
        self.pending_destroy.contains(&entity)
    }

    /// Destroy every queued entity: strip its components, clear its
    /// signature and free the slot. Returns how many were destroyed.
    pub fn flush_destroyed(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending_destroy);
        let mut destroyed = 0;
        for e in pending {
            if !self.entities.is_alive(e) {
                continue;
            }
            for store in &mut self.stores {
                if self.signatures.has(e.index(), store.id()) {
                    store.remove(e);
                }
            }
            self.signatures.clear_all(e.index());
            self.entities.destroy(e);
            destroyed += 1;
            tracing::trace!(entity = %e, "entity destroyed");
        }
        destroyed
    }

    // --- Membership ---

    /// Attach a zero-filled component. `Ok(false)` for stale entities and,
    /// under [`DuplicatePolicy::Ignore`], for components already present.
    pub fn add_component(&mut self, entity: EntityId, c: ComponentId) -> Result<bool, EcsError> {
        self.add_component_with(entity, c, &[])
    }

    /// Attach a component with initial values given by field name.
    /// Unlisted fields are zero-filled.
    pub fn add_component_with(
        &mut self,
        entity: EntityId,
        c: ComponentId,
        values: &[(&str, &[f64])],
    ) -> Result<bool, EcsError> {
        let info = self.registry.try_get(c)?;
        let mut resolved = Vec::with_capacity(values.len());
        for (name, vals) in values {
            let index = info
                .def
                .field_index(name)
                .ok_or_else(|| EcsError::FieldNotFound {
                    component: info.name().to_owned(),
                    field: (*name).to_owned(),
                })?;
            resolved.push((index, *vals));
        }
        if !self.entities.is_alive(entity) {
            return Ok(false);
        }
        if self.store(c)?.contains(entity) {
            return match self.options.duplicate_policy {
                DuplicatePolicy::Ignore => Ok(false),
                DuplicatePolicy::Reject => Err(EcsError::DuplicateComponent(c)),
            };
        }
        let store = self.store_mut(c)?;
        let row = store.insert(entity);
        for (index, vals) in resolved {
            let count = store.field_count(index);
            if let Some(col) = store.column_mut(index) {
                col.set_row_f64(row, count, vals);
            }
        }
        self.signatures.set(entity.index(), c);
        Ok(true)
    }

    /// Detach a component; false when stale or not present.
    pub fn remove_component(&mut self, entity: EntityId, c: ComponentId) -> Result<bool, EcsError> {
        if !self.entities.is_alive(entity) {
            return Ok(false);
        }
        let removed = self.store_mut(c)?.remove(entity);
        if removed {
            self.signatures.clear(entity.index(), c);
        }
        Ok(removed)
    }

    pub fn has_component(&self, entity: EntityId, c: ComponentId) -> bool {
        self.entities.is_alive(entity) && self.signatures.has(entity.index(), c)
    }

    /// Number of entities holding `c`.
    pub fn component_count(&self, c: ComponentId) -> usize {
        self.stores.get(c.index()).map_or(0, ComponentStore::len)
    }

    /// Entities holding `c`, in dense order.
    pub fn iter_component(&self, c: ComponentId) -> impl Iterator<Item = EntityId> + '_ {
        self.stores
            .get(c.index())
            .map(|s| s.entities())
            .unwrap_or(&[])
            .iter()
            .copied()
    }

    // --- Field access ---

    fn check_type<T: Scalar>(&self, handle: FieldHandle) -> Result<(), EcsError> {
        if handle.ty == T::TYPE {
            return Ok(());
        }
        Err(EcsError::FieldTypeMismatch {
            field: self.field_name(handle),
            actual: handle.ty,
            requested: T::TYPE,
        })
    }

    fn field_name(&self, handle: FieldHandle) -> String {
        self.registry
            .get(handle.component)
            .and_then(|i| i.def.fields.get(handle.field_index()))
            .map(|f| f.name.clone())
            .unwrap_or_default()
    }

    /// Borrow one entity's field row. `Ok(None)` when the entity is stale or
    /// lacks the component.
    pub fn read<T: Scalar>(&self, entity: EntityId, handle: FieldHandle) -> Result<Option<&[T]>, EcsError> {
        self.check_type::<T>(handle)?;
        if !self.entities.is_alive(entity) {
            return Ok(None);
        }
        let store = self.store(handle.component)?;
        let Some(row) = store.row_of(entity) else {
            return Ok(None);
        };
        let slice = store
            .column(handle.field_index())
            .and_then(T::slice)
            .ok_or_else(|| EcsError::FieldNotFound {
                component: format!("#{}", handle.component.0),
                field: format!("#{}", handle.field),
            })?;
        Ok(Some(&slice[row * handle.count..(row + 1) * handle.count]))
    }

    /// Overwrite one entity's field row and mark it changed. `Ok(false)` when
    /// the entity is stale or lacks the component.
    pub fn write<T: Scalar>(&mut self, entity: EntityId, handle: FieldHandle, values: &[T]) -> Result<bool, EcsError> {
        self.check_type::<T>(handle)?;
        if values.len() != handle.count {
            return Err(EcsError::FieldArity {
                field: self.field_name(handle),
                expected: handle.count,
                got: values.len(),
            });
        }
        if !self.entities.is_alive(entity) {
            return Ok(false);
        }
        let store = self.store_mut(handle.component)?;
        let Some(row) = store.row_of(entity) else {
            return Ok(false);
        };
        let slice = store
            .column_mut(handle.field_index())
            .and_then(T::slice_mut)
            .ok_or_else(|| EcsError::FieldNotFound {
                component: format!("#{}", handle.component.0),
                field: format!("#{}", handle.field),
            })?;
        slice[row * handle.count..(row + 1) * handle.count].copy_from_slice(values);
        store.mark_changed(row);
        Ok(true)
    }

    /// Fixed-size copy of a field row.
    pub fn get<T: Scalar, const N: usize>(&self, entity: EntityId, handle: FieldHandle) -> Result<Option<[T; N]>, EcsError> {
        if N != handle.count {
            return Err(EcsError::FieldArity {
                field: self.field_name(handle),
                expected: handle.count,
                got: N,
            });
        }
        Ok(self.read::<T>(entity, handle)?.map(|s| {
            let mut out = [T::default(); N];
            out.copy_from_slice(s);
            out
        }))
    }

    pub fn set<T: Scalar, const N: usize>(&mut self, entity: EntityId, handle: FieldHandle, values: [T; N]) -> Result<bool, EcsError> {
        self.write(entity, handle, &values)
    }

    /// Name-keyed read for debugging and initialisation. Values widen to f64.
    pub fn read_values(&self, entity: EntityId, c: ComponentId, field: &str) -> Result<Option<Vec<f64>>, EcsError> {
        let handle = self.field(c, field)?;
        if !self.entities.is_alive(entity) {
            return Ok(None);
        }
        let store = self.store(c)?;
        Ok(store.row_of(entity).and_then(|row| {
            store
                .column(handle.field_index())
                .map(|col| col.row_f64(row, handle.count))
        }))
    }

    /// Name-keyed write for debugging and initialisation. Writes up to the
    /// field's element count and marks the row changed.
    pub fn write_values(&mut self, entity: EntityId, c: ComponentId, field: &str, values: &[f64]) -> Result<bool, EcsError> {
        let handle = self.field(c, field)?;
        if !self.entities.is_alive(entity) {
            return Ok(false);
        }
        let store = self.store_mut(c)?;
        let Some(row) = store.row_of(entity) else {
            return Ok(false);
        };
        if let Some(col) = store.column_mut(handle.field_index()) {
            col.set_row_f64(row, handle.count, values);
        }
        store.mark_changed(row);
        Ok(true)
    }

    pub fn is_changed(&self, entity: EntityId, c: ComponentId) -> bool {
        self.entities.is_alive(entity)
            && self
                .stores
                .get(c.index())
                .is_some_and(|s| s.kind() == ComponentKind::Structured && s.is_changed(entity))
    }

    pub fn clear_changed(&mut self) {
        self.stores.iter_mut().for_each(ComponentStore::clear_changed);
    }

    // --- Queries ---

    pub fn query(&self, spec: &QuerySpec) -> QueryIter<'_> {
        QueryIter::new(spec, &self.entities, &self.signatures, &self.stores)
    }

    // --- Events & resources ---

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }
}
