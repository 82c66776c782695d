//! Error types for quarry-compiler

use quarry_core::{ResourceKind, ResourceName};
use thiserror::Error;

/// Result type for compiler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while compiling a project
///
/// Fatal errors abort a pass. Every other error is scoped to the file being
/// parsed and is recorded as a [`ParseError`](crate::registry::ParseError).
#[derive(Error, Debug)]
pub enum Error {
    /// Project manifest is missing
    #[error("project manifest not found at {path}")]
    ManifestNotFound {
        /// Path that was searched
        path: String,
    },

    /// Project manifest could not be decoded
    #[error("invalid project manifest: {0}")]
    Manifest(#[source] quarry_core::Error),

    /// File store failure while listing or reading files
    #[error("file store error: {0}")]
    Store(#[source] quarry_core::Error),

    /// Invalid file content
    #[error("{message}")]
    Invalid {
        /// Error description
        message: String,
    },

    /// Another resource already uses the name
    #[error("name collision: {name} conflicts with an existing {existing} named {:?}", .name.name)]
    DuplicateResource {
        /// Name that was being inserted
        name: ResourceName,
        /// Kind of the resource already registered
        existing: ResourceKind,
    },

    /// Failed to decode YAML
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Query text could not be analyzed
    #[error("failed to parse SQL: {message}")]
    Sql {
        /// Error from the query analyzer
        message: String,
    },

    /// Error from a core building block (templates, selectors, security, durations)
    #[error(transparent)]
    Core(#[from] quarry_core::Error),
}

impl Error {
    /// Shorthand for an [`Error::Invalid`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::Invalid {
            message: message.into(),
        }
    }

    /// Whether the error aborts the whole pass
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ManifestNotFound { .. } | Error::Manifest(_) | Error::Store(_)
        )
    }

    /// Whether the error is a name collision
    pub fn is_name_collision(&self) -> bool {
        matches!(self, Error::DuplicateResource { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_tiers() {
        assert!(Error::ManifestNotFound { path: "/quarry.yaml".into() }.is_fatal());
        assert!(Error::Store(quarry_core::Error::NotFound { path: "/a.sql".into() }).is_fatal());
        assert!(!Error::invalid("bad").is_fatal());
        assert!(!Error::Sql { message: "oops".into() }.is_fatal());
    }

    #[test]
    fn test_duplicate_message() {
        let err = Error::DuplicateResource {
            name: ResourceName::new(ResourceKind::Model, "orders"),
            existing: ResourceKind::Source,
        };
        assert!(err.is_name_collision());
        assert_eq!(
            err.to_string(),
            "name collision: Model/orders conflicts with an existing Source named \"orders\""
        );
    }
}
