use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("unsupported sensor type: {0}")]
    UnsupportedType(u8),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("value out of range for `{field}`")]
    OutOfRange { field: String },

    #[error("json serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CEL compilation error: {0}")]
    CelCompilationError(String),

    #[error("CEL execution error: {0}")]
    CelExecutionError(String),

    #[error("invalid output from CEL expression: {0}")]
    InvalidOutput(String),

    /// The script reported errors through its `errors` field.
    #[error("script errors: {}", .0.join(", "))]
    ScriptErrors(Vec<String>),

    #[error("script timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, PayloadError>;
