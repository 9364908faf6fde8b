//! Error types for PixClass

use thiserror::Error;

/// Main error type for PixClass operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error(
        "Region x={x}, y={y}, {width}x{height} (z={z}, t={t}) lies outside image of size {image_width}x{image_height}"
    )]
    RegionOutOfBounds {
        x: i64,
        y: i64,
        width: usize,
        height: usize,
        z: usize,
        t: usize,
        image_width: usize,
        image_height: usize,
    },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Insufficient training data: {reason}")]
    InsufficientTrainingData { reason: String },

    #[error("{model} does not support {capability}")]
    UnsupportedCapability {
        model: String,
        capability: &'static str,
    },

    #[error("Requested {requested} pixels exceeds the addressable limit of {limit}")]
    ResourceLimit { requested: u128, limit: u128 },

    #[error("Feature count mismatch: expected {expected}, got {actual}")]
    FeatureCountMismatch { expected: usize, actual: usize },

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

/// Coarse error category, used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad region, resolution, parameter or empty input. Retry with corrected input.
    Input,
    /// Training samples are insufficient or degenerate.
    Training,
    /// The model variant lacks a requested capability.
    Capability,
    /// The request exceeds addressable limits.
    ResourceLimit,
    /// I/O, serialization or internal failure.
    Internal,
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidDimensions { .. }
            | Error::IndexOutOfBounds { .. }
            | Error::SizeMismatch { .. }
            | Error::RegionOutOfBounds { .. }
            | Error::InvalidParameter { .. }
            | Error::FeatureCountMismatch { .. }
            | Error::UnsupportedDataType(_) => ErrorKind::Input,
            Error::InsufficientTrainingData { .. } => ErrorKind::Training,
            Error::UnsupportedCapability { .. } => ErrorKind::Capability,
            Error::ResourceLimit { .. } => ErrorKind::ResourceLimit,
            Error::Io(_) | Error::Serialization(_) | Error::Algorithm(_) | Error::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Shorthand for an [`Error::InvalidParameter`].
    pub fn invalid_parameter(
        name: &'static str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`Error::InsufficientTrainingData`].
    pub fn insufficient(reason: impl Into<String>) -> Self {
        Error::InsufficientTrainingData {
            reason: reason.into(),
        }
    }
}

/// Result type alias for PixClass operations
pub type Result<T> = std::result::Result<T, Error>;
