//! Error types for the migration library.

use thiserror::Error;

use crate::core::schema::RelationKind;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (bad mapping definition, malformed mapping file,
    /// transformer failure, invalid options).
    #[error("Configuration error: {0}")]
    Config(String),

    /// No mapping registered for a model encountered during traversal.
    #[error("No mapping registered for model '{model}'")]
    MissingMapping { model: String },

    /// A relation kind the executor is not configured to handle.
    #[error("Unsupported relation {kind} on {model}.{field}")]
    UnsupportedRelation {
        model: String,
        field: String,
        kind: RelationKind,
    },

    /// Recursion ceiling exceeded (or a cycle forced the branch past it).
    #[error("Recursion ceiling {ceiling} exceeded at depth {depth} while traversing '{model}': {detail}")]
    TooDeep {
        model: String,
        depth: usize,
        ceiling: usize,
        detail: String,
    },

    /// Authentication or network failure against an instance.
    #[error("Connection error: {0}")]
    Connection(String),

    /// IO error (mapping/tracking file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl MigrateError {
    /// Create a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        MigrateError::Config(message.into())
    }

    /// Create a Connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        MigrateError::Connection(message.into())
    }

    /// Create a MissingMapping error.
    pub fn missing_mapping(model: impl Into<String>) -> Self {
        MigrateError::MissingMapping {
            model: model.into(),
        }
    }

    /// Whether the error must abort the whole migration call.
    ///
    /// Connection loss and recursion-ceiling violations are conditions the
    /// engine cannot work around; everything else downgrades to a
    /// per-record or per-field failure entry in the outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrateError::Connection(_) | MigrateError::TooDeep { .. }
        )
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
