/// Errors from spatial structure construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("cell size must be positive and finite, got {0}")]
    InvalidCellSize(f32),
    #[error("zone count must be at least 1")]
    NoZones,
    #[error("zone width must be positive and finite, got {0}")]
    InvalidZoneWidth(f32),
    #[error("tick rate must be positive, got {0}")]
    InvalidRate(f32),
}
