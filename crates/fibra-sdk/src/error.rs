//! Error types for the Fibra SDK boundary

/// Result type for SDK conversions
pub type SdkResult<T> = Result<T, SdkError>;

/// Device-module boundary error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum SdkError {
    /// Type mismatch during value conversion
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// Invalid argument passed across the boundary
    #[error("Argument error: {0}")]
    ArgumentError(String),

    /// Device-module level error
    #[error("{0}")]
    DeviceError(String),
}

impl From<String> for SdkError {
    fn from(s: String) -> Self {
        SdkError::DeviceError(s)
    }
}

impl From<&str> for SdkError {
    fn from(s: &str) -> Self {
        SdkError::DeviceError(s.to_string())
    }
}
