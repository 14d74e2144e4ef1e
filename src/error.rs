//! Error types for stageloop
//!
//! Centralized error handling using thiserror. Only catalog problems and
//! infrastructure faults surface as errors; domain-level failures (bad stage output,
//! exhausted retries) are reported through `LoopRun` instead.

use thiserror::Error;

/// All error types that can occur in stageloop
#[derive(Debug, Error)]
pub enum StageLoopError {
    /// Stage name is not declared in the criteria catalog
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// Criteria catalog document is malformed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Audit sink rejected a summary
    #[error("Sink error: {0}")]
    Sink(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for stageloop operations
pub type Result<T> = std::result::Result<T, StageLoopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_stage_error() {
        let err = StageLoopError::UnknownStage("scrape".to_string());
        assert_eq!(err.to_string(), "Unknown stage: scrape");
    }

    #[test]
    fn test_catalog_error() {
        let err = StageLoopError::Catalog("gate 'x' has an invalid regex".to_string());
        assert_eq!(err.to_string(), "Catalog error: gate 'x' has an invalid regex");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StageLoopError = io_err.into();
        assert!(matches!(err, StageLoopError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: StageLoopError = json_err.into();
        assert!(matches!(err, StageLoopError::Json(_)));
    }

    #[test]
    fn test_catalog_yaml_error_maps_to_catalog() {
        let err = crate::catalog::CriteriaCatalog::parse("stages: [").unwrap_err();
        assert!(matches!(err, StageLoopError::Catalog(_)));
    }
}
