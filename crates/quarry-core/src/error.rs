//! Error types for quarry-core

use thiserror::Error;

/// Result type alias for quarry-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quarry-core
#[derive(Error, Debug)]
pub enum Error {
    /// Project manifest could not be found
    #[error("project manifest not found: {path}")]
    ManifestNotFound {
        /// Path that was searched
        path: String,
    },

    /// Invalid project manifest value
    #[error("invalid project manifest: {message}")]
    ManifestInvalid {
        /// Description of what's invalid
        message: String,
    },

    /// Failed to parse YAML
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Unknown resource kind identifier
    #[error("invalid resource kind {kind:?}")]
    InvalidKind {
        /// The identifier that failed to parse
        kind: String,
    },

    /// Template parsing or rendering error
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Boolean expression error
    #[error("invalid expression {expression:?}: {message}")]
    InvalidExpression {
        /// The expression text
        expression: String,
        /// Description of the error
        message: String,
    },

    /// Field selector error
    #[error("invalid field selector: {message}")]
    InvalidSelector {
        /// Description of the error
        message: String,
    },

    /// Security policy error
    #[error("invalid security policy: {message}")]
    InvalidSecurity {
        /// Description of the error
        message: String,
    },

    /// Invalid value for a typed scalar (duration, time grain, cron, time zone)
    #[error("invalid {what} {value:?}: {message}")]
    InvalidValue {
        /// What was being parsed
        what: &'static str,
        /// The rejected input
        value: String,
        /// Description of the error
        message: String,
    },

    /// File not found in a file store
    #[error("file not found: {path}")]
    NotFound {
        /// Path that was requested
        path: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for an [`Error::InvalidValue`]
    pub fn invalid_value(what: &'static str, value: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidValue {
            what,
            value: value.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error means a file does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
