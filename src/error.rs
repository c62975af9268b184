use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CanvasError>;

#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("Invalid canvas dimensions {width}x{height}: width and height must be positive")]
    InvalidDimension { width: f64, height: f64 },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cannot delete the last layer")]
    LastLayer,

    #[error("Cannot merge a layer with itself")]
    SelfMerge,

    #[error("Layer is locked: {0}")]
    LayerLocked(String),

    #[error("No path specified and the document has never been opened or saved")]
    NoPathSpecified,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl CanvasError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// Short machine-friendly name of the error kind, used by the tool boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidDimension { .. } | Self::InvalidArgument(_) => "invalid_argument",
            Self::LastLayer | Self::SelfMerge | Self::LayerLocked(_) => "invariant_violation",
            Self::NoPathSpecified | Self::Io(_) => "io_error",
            Self::Json(_) | Self::Parse(_) | Self::Config(_) => "parse_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_human_readable() {
        let err = CanvasError::not_found("Layer", "layer-9");
        assert_eq!(err.to_string(), "Layer not found: layer-9");
        assert_eq!(err.kind(), "not_found");
        assert_eq!(CanvasError::LastLayer.kind(), "invariant_violation");
    }

    #[test]
    fn io_errors_convert() {
        let err: CanvasError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), "io_error");
        assert!(err.to_string().contains("gone"));
    }
}
