//! Central error handling for polyforge
//!
//! Provides a unified PolyError enum shared by the operation graph, the
//! scheduler and the HistoPyramid engine.

/// Centralized error type for graph evaluation and engine operations
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PolyError {
    #[error("Structural failure: {0}")]
    StructuralFailure(String),

    #[error("Merge contract violation: fused op returned {actual}, expected {expected}")]
    MergeContractViolation { expected: u32, actual: u32 },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Buffer contract violation: {0}")]
    BufferContractViolation(String),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Device error: {0}")]
    Device(String),

    #[error("Readback error: {0}")]
    Readback(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl PolyError {
    /// Convenience constructors for common error types
    pub fn structural<T: ToString>(msg: T) -> Self {
        PolyError::StructuralFailure(msg.to_string())
    }

    pub fn unavailable<T: ToString>(msg: T) -> Self {
        PolyError::BackendUnavailable(msg.to_string())
    }

    pub fn buffer<T: ToString>(msg: T) -> Self {
        PolyError::BufferContractViolation(msg.to_string())
    }

    pub fn device<T: ToString>(msg: T) -> Self {
        PolyError::Device(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        PolyError::Readback(msg.to_string())
    }

    /// Whether the failure is a programming error in graph construction
    /// rather than a device or data problem.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            PolyError::StructuralFailure(_)
                | PolyError::MergeContractViolation { .. }
                | PolyError::TypeMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for PolyError {
    fn from(err: serde_json::Error) -> Self {
        PolyError::Config(err.to_string())
    }
}

/// Result type alias for polyforge operations
pub type PolyResult<T> = Result<T, PolyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        assert!(PolyError::structural("Circular reference").is_structural());
        assert!(PolyError::MergeContractViolation {
            expected: 3,
            actual: 2
        }
        .is_structural());
        assert!(!PolyError::unavailable("no adapter").is_structural());
    }

    #[test]
    fn test_display_prefixes() {
        let err = PolyError::buffer("hole count 2 does not match 3 points");
        assert_eq!(
            err.to_string(),
            "Buffer contract violation: hole count 2 does not match 3 points"
        );
    }
}
