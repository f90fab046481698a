//! The record of one error's trip through the recovery pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::analysis::{AnalysisResult, ErrorReport};

/// Unique identifier of a recovery flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub String);

impl FlowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline position of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    Started,
    Analyzing,
    Generating,
    Validating,
    Executing,
    Learning,
    Completed,
    Failed,
    Aborted,
}

impl FlowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    /// Whether the pipeline may move from `self` to `next`.
    ///
    /// Validation and execution alternate while candidates remain, and a
    /// failed validation may move straight on to learning.
    pub fn can_transition_to(self, next: FlowStatus) -> bool {
        use FlowStatus::*;
        if self.is_terminal() {
            return false;
        }
        match next {
            Failed | Aborted => true,
            Analyzing => self == Started,
            Generating => self == Analyzing,
            Validating => matches!(self, Generating | Executing | Validating),
            Executing => self == Validating,
            Learning => matches!(self, Generating | Validating | Executing),
            Completed => self == Learning,
            Started => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Analyzing => "ANALYZING",
            Self::Generating => "GENERATING",
            Self::Validating => "VALIDATING",
            Self::Executing => "EXECUTING",
            Self::Learning => "LEARNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Analyze,
    Generate,
    Validate,
    Execute,
    Learn,
}

/// How a single candidate strategy fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    ValidationFailed,
    ExecutionFailed,
    Succeeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    pub name: StepName,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AttemptOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
}

impl FlowStep {
    pub fn new(name: StepName, start_time: DateTime<Utc>, result: Value) -> Self {
        Self {
            name,
            start_time,
            end_time: Utc::now(),
            result,
            successful: None,
            outcome: None,
            strategy_id: None,
        }
    }

    pub fn with_success(mut self, successful: bool) -> Self {
        self.successful = Some(successful);
        self
    }

    pub fn with_outcome(mut self, outcome: AttemptOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn for_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy_id: String,
    pub strategy_name: String,
    pub outcome: AttemptOutcome,
}

/// Audit record of one recovery, owned by the orchestrator while in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryFlow {
    pub id: FlowId,
    pub error: ErrorReport,
    pub context_id: String,
    pub status: FlowStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<FlowStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    #[serde(default)]
    pub strategies_attempted: Vec<StrategyAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
}

impl RecoveryFlow {
    pub fn new(error: ErrorReport, context_id: impl Into<String>) -> Self {
        Self {
            id: FlowId::new(),
            error,
            context_id: context_id.into(),
            status: FlowStatus::Started,
            start_time: Utc::now(),
            end_time: None,
            steps: Vec::new(),
            successful: None,
            strategies_attempted: Vec::new(),
            analysis: None,
        }
    }

    /// Moves to `next`, returning `false` and leaving the status untouched
    /// when the transition is not allowed.
    pub fn advance(&mut self, next: FlowStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    pub fn record_step(&mut self, step: FlowStep) {
        self.steps.push(step);
    }

    pub fn record_attempt(&mut self, strategy_id: &str, strategy_name: &str, outcome: AttemptOutcome) {
        self.strategies_attempted.push(StrategyAttempt {
            strategy_id: strategy_id.to_string(),
            strategy_name: strategy_name.to_string(),
            outcome,
        });
    }

    /// Stamps the verdict and end time and moves to a terminal status.
    pub fn finish(&mut self, successful: bool, status: FlowStatus) {
        if !self.advance(status) {
            self.status = status;
        }
        self.successful = Some(successful);
        self.end_time = Some(Utc::now());
    }

    pub fn steps_named(&self, name: StepName) -> impl Iterator<Item = &FlowStep> {
        self.steps.iter().filter(move |s| s.name == name)
    }

    pub fn attempts_with(&self, outcome: AttemptOutcome) -> usize {
        self.strategies_attempted
            .iter()
            .filter(|a| a.outcome == outcome)
            .count()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}
