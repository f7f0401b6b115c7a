use serde::Serialize;
use thiserror::Error;

/// A single field-level validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub path: String,
    pub expected: String,
    pub received: String,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: expected {}, got {} ({})",
            self.path, self.expected, self.received, self.message
        )
    }
}

#[derive(Error, Debug)]
pub enum KfgError {
    #[error("Store is not loaded; call mount() first")]
    NotLoaded,

    #[error("Validation failed:\n  - {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n  - "))]
    Validation(Vec<FieldError>),

    #[error("Driver '{driver}' does not implement {operation}")]
    Capability { driver: String, operation: String },

    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl KfgError {
    /// Shorthand for a single-field validation error.
    pub fn validation(path: &str, expected: &str, received: &str, message: &str) -> Self {
        KfgError::Validation(vec![FieldError {
            path: path.to_string(),
            expected: expected.to_string(),
            received: received.to_string(),
            message: message.to_string(),
        }])
    }
}

pub type Result<T> = std::result::Result<T, KfgError>;
