use std::collections::HashMap;

use crate::component::{ComponentDef, ComponentId, ComponentKind, FieldSpec};
use crate::error::EcsError;

/// Registered component metadata.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub def: ComponentDef,
}

impl ComponentInfo {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn kind(&self) -> ComponentKind {
        self.def.kind
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.def.fields
    }
}

/// Append-only name → id table for component definitions.
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_name: HashMap<String, ComponentId>,
    max: usize,
}

impl ComponentRegistry {
    pub fn new(max_components: usize) -> Self {
        Self {
            infos: Vec::new(),
            by_name: HashMap::new(),
            max: max_components,
        }
    }

    /// Register `def`. Field element counts below 1 are raised to 1.
    pub fn register(&mut self, mut def: ComponentDef) -> Result<ComponentId, EcsError> {
        if self.by_name.contains_key(&def.name) {
            return Err(EcsError::ComponentAlreadyDefined(def.name));
        }
        if self.infos.len() >= self.max {
            return Err(EcsError::CapacityExceeded {
                what: "components",
                limit: self.max,
            });
        }
        for field in &mut def.fields {
            field.count = field.count.max(1);
        }
        let id = ComponentId(self.infos.len() as u32);
        tracing::debug!(name = %def.name, id = id.0, kind = ?def.kind, "component registered");
        self.by_name.insert(def.name.clone(), id);
        self.infos.push(ComponentInfo { id, def });
        Ok(id)
    }

    pub fn id_of(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    pub fn try_get(&self, id: ComponentId) -> Result<&ComponentInfo, EcsError> {
        self.get(id)
            .ok_or_else(|| EcsError::ComponentNotFound(format!("#{}", id.0)))
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}
