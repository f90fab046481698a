//! Crate-level error taxonomy.

use crate::artifact::ArtifactError;
use crate::breaker::CircuitOpenError;
use crate::container::ContainerError;

/// Errors produced by the context manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context not found: {0}")]
    ContextNotFound(String),
}

/// Errors surfaced by mender-core operations.
#[derive(Debug, thiserror::Error)]
pub enum MenderError {
    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    #[error("context error: {0}")]
    Context(#[from] ContextError),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for mender-core operations.
pub type Result<T> = std::result::Result<T, MenderError>;
