use thiserror::Error;

/// A configuration value that the tracker cannot work with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("{field} must be at least 1")]
    Zero { field: &'static str },
    #[error("{field} must be odd, got {value}")]
    Even { field: &'static str, value: usize },
    #[error("{field} must lie in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("min_point_distance ({min}) must be smaller than max_point_distance ({max})")]
    DepthRange { min: f64, max: f64 },
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("mask is {mask:?} pixels but the camera images are {camera:?}")]
    MaskSize { mask: (u32, u32), camera: (u32, u32) },
}
