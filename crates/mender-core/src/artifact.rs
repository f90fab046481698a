//! Persisting finished recovery flows for audit.
//!
//! Layout: `<dir>/<flow_id>/flow.json` with a SHA-256 hex digest of the JSON
//! bytes in `<dir>/<flow_id>/flow.digest`.

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::domain::RecoveryFlow;

const ARTIFACT_FILE: &str = "flow.json";
const DIGEST_FILE: &str = "flow.digest";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("invalid flow id {0:?}: must be a single path component")]
    InvalidFlowId(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn flow_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// `<dir>/<flow_id>`, provided the id cannot escape `dir`.
fn flow_dir(dir: &Path, flow_id: &str) -> Result<PathBuf, ArtifactError> {
    let mut components = Path::new(flow_id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == flow_id => Ok(dir.join(flow_id)),
        _ => Err(ArtifactError::InvalidFlowId(flow_id.to_string())),
    }
}

/// Writes `flow` and its digest, returning the artifact path.
pub fn write_flow_artifact(flow: &RecoveryFlow, dir: &Path) -> Result<PathBuf, ArtifactError> {
    let flow_dir = flow_dir(dir, flow.id.as_str())?;
    std::fs::create_dir_all(&flow_dir)?;

    let artifact_path = flow_dir.join(ARTIFACT_FILE);
    let json = serde_json::to_vec_pretty(flow)?;
    std::fs::write(&artifact_path, &json)?;
    std::fs::write(flow_dir.join(DIGEST_FILE), flow_digest(&json).as_bytes())?;

    Ok(artifact_path)
}

/// Reads `<dir>/<flow_id>/flow.json`, refusing it if the digest differs.
pub fn read_flow_artifact(flow_id: &str, dir: &Path) -> Result<RecoveryFlow, ArtifactError> {
    let flow_dir = flow_dir(dir, flow_id)?;
    let json = std::fs::read(flow_dir.join(ARTIFACT_FILE))?;
    let expected = std::fs::read_to_string(flow_dir.join(DIGEST_FILE))?;
    let actual = flow_digest(&json);
    if expected.trim() != actual {
        return Err(ArtifactError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}
