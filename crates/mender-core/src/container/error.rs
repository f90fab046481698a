//! Errors produced by the dependency container.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    /// Nothing is registered under `name`. `chain` is the resolution path
    /// that requested it.
    #[error("dependency not registered: {name} (requested via [{}])", .chain.join(" -> "))]
    NotRegistered { name: String, chain: Vec<String> },

    /// A name was requested while already being resolved on the same chain.
    #[error("circular dependency: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("dependency {name} is not a {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("factory for {name} failed: {source}")]
    Factory {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("initializer for {name} failed: {source}")]
    Initializer {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ContainerError {
    /// Wiring mistakes that no retry can fix.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::NotRegistered { .. } | Self::CircularDependency { .. }
        )
    }
}
