use thiserror::Error;

/// Core error types for parsing and shaping FHIR responses
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Response is not a FHIR resource: {0}")]
    NotAResource(String),

    #[error("Invalid Bundle: {message}")]
    InvalidBundle { message: String },

    #[error("Response shape changed: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}

impl CoreError {
    /// Create a new NotAResource error
    pub fn not_a_resource(message: impl Into<String>) -> Self {
        Self::NotAResource(message.into())
    }

    /// Create a new InvalidBundle error
    pub fn invalid_bundle(message: impl Into<String>) -> Self {
        Self::InvalidBundle {
            message: message.into(),
        }
    }

    /// Create a new ShapeMismatch error
    pub fn shape_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::JsonError(_) => ErrorCategory::Serialization,
            Self::NotAResource(_) | Self::InvalidBundle { .. } => ErrorCategory::Validation,
            Self::ShapeMismatch { .. } => ErrorCategory::Consistency,
        }
    }
}

/// Error categories for log classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Serialization,
    Consistency,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Serialization => write!(f, "serialization"),
            Self::Consistency => write!(f, "consistency"),
        }
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
