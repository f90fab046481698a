use std::fmt;

use serde::{Deserialize, Serialize};

use super::cancel::FlowCancellation;
use crate::domain::{ErrorReport, ExecutionResult, FlowId, RecoveryFlow, Strategy};

/// Why a flow that did not hit an unrecoverable error still failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// No candidate passed validation.
    ValidationFailed,
    /// Every candidate passed validation and failed in execution.
    ExecutionFailed,
    /// Candidates failed in a mix of validation and execution.
    NoStrategySucceeded,
    Aborted,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::NoStrategySucceeded => "NO_STRATEGY_SUCCEEDED",
            Self::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryRequest {
    pub error: ErrorReport,
    /// Existing context to thread through the flow; created if unknown.
    pub context_id: Option<String>,
    pub cancellation: Option<FlowCancellation>,
}

impl RecoveryRequest {
    pub fn new(error: ErrorReport) -> Self {
        Self {
            error,
            context_id: None,
            cancellation: None,
        }
    }

    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn with_cancellation(mut self, cancellation: FlowCancellation) -> Self {
        self.cancellation = Some(cancellation);
        self
    }
}

impl From<ErrorReport> for RecoveryRequest {
    fn from(error: ErrorReport) -> Self {
        Self::new(error)
    }
}

/// Structured outcome of `recover_from_error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub flow_id: FlowId,
    /// The strategy that succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    /// The winning execution, or the last failed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Set when the flow ended on an unrecoverable error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub flow: RecoveryFlow,
}
