use std::fmt;

use thiserror::Error;

/// Which side of a relationship failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Source,
    Target,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Source => f.write_str("source"),
            Endpoint::Target => f.write_str("target"),
        }
    }
}

/// Top-level error type for the knowledge-graph builder.
///
/// The first four variants form the domain taxonomy: malformed records,
/// dangling edge endpoints, collaborators that are not configured, and
/// collaborators that were called and failed. The remaining variants wrap
/// ambient failures (config files, I/O, JSON) so that `?` works across crates.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KagError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Referential integrity error: {endpoint} node {missing_id} not found for relationship {relationship_id}")]
    ReferentialIntegrity {
        relationship_id: String,
        endpoint: Endpoint,
        missing_id: String,
    },

    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Collaborator failure: {0}")]
    CollaboratorFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for KagError {
    fn from(err: toml::de::Error) -> Self {
        KagError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for KagError {
    fn from(err: toml::ser::Error) -> Self {
        KagError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for KagError {
    fn from(err: serde_json::Error) -> Self {
        KagError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for knowledge-graph operations.
pub type Result<T> = std::result::Result<T, KagError>;
