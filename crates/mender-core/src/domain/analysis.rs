//! Incoming errors and the analyzer's diagnosis of them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A runtime error handed to the orchestrator for recovery.
///
/// Known fields are typed; anything else the host attaches is preserved in
/// `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(rename = "type", alias = "error_type")]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ErrorReport {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            code: None,
            component: None,
            details: Map::new(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// One probable root cause with the analyzer's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    #[serde(rename = "type", alias = "cause_type")]
    pub cause_type: String,
    pub description: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

impl RootCause {
    pub fn new(cause_type: impl Into<String>, description: impl Into<String>, confidence: f64) -> Self {
        Self {
            cause_type: cause_type.into(),
            description: description.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Output of the analyzer collaborator. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analysis_id: String,
    pub error_type: String,
    /// Ordered most-probable first.
    pub root_causes: Vec<RootCause>,
    pub confidence: f64,
    #[serde(default)]
    pub recovery_hints: Vec<String>,
}

impl AnalysisResult {
    pub fn new(analysis_id: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            error_type: error_type.into(),
            root_causes: Vec::new(),
            confidence: 0.0,
            recovery_hints: Vec::new(),
        }
    }

    pub fn with_cause(mut self, cause: RootCause) -> Self {
        self.confidence = self.confidence.max(cause.confidence);
        self.root_causes.push(cause);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.recovery_hints.push(hint.into());
        self
    }

    /// The most probable cause, if any was identified.
    pub fn primary_cause(&self) -> Option<&RootCause> {
        self.root_causes.first()
    }

    /// Distinct root-cause types in analyzer order.
    pub fn root_cause_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::with_capacity(self.root_causes.len());
        for cause in &self.root_causes {
            if !types.contains(&cause.cause_type) {
                types.push(cause.cause_type.clone());
            }
        }
        types
    }

    /// Confidence attached to `cause_type`, or `None` when not diagnosed.
    pub fn confidence_for(&self, cause_type: &str) -> Option<f64> {
        self.root_causes
            .iter()
            .find(|c| c.cause_type == cause_type)
            .map(|c| c.confidence)
    }
}
