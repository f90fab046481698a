//! Error types for the default collaborators.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KitError {
    #[error("invalid pattern for cause {cause_type}: {source}")]
    InvalidPattern {
        cause_type: String,
        #[source]
        source: regex::Error,
    },

    #[error("no handler registered for action type {0}")]
    NoHandler(String),

    #[error("invalid template {name}: {reason}")]
    InvalidTemplate { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, KitError>;
