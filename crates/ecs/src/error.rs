use crate::component::{ComponentId, FieldType};

/// Errors from world, registry and store operations.
///
/// Stale entity references are not errors; operations on them report
/// `false` or `None` instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    #[error("capacity exceeded: {what} limit is {limit}")]
    CapacityExceeded { what: &'static str, limit: usize },
    #[error("entity already has component {0:?}")]
    DuplicateComponent(ComponentId),
    #[error("component not found: {0}")]
    ComponentNotFound(String),
    #[error("component already defined: {0}")]
    ComponentAlreadyDefined(String),
    #[error("field `{field}` not found on component `{component}`")]
    FieldNotFound { component: String, field: String },
    #[error("field `{field}` holds {actual:?}, accessed as {requested:?}")]
    FieldTypeMismatch {
        field: String,
        actual: FieldType,
        requested: FieldType,
    },
    #[error("field `{field}` has {expected} elements, got {got}")]
    FieldArity {
        field: String,
        expected: usize,
        got: usize,
    },
    #[error("system `{system}` failed: {reason}")]
    System { system: String, reason: String },
}
