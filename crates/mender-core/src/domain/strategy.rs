//! Recovery strategies, their actions, and the results of executing them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::analysis::AnalysisResult;

/// Tag carried by the strategy synthesized when no candidate was generated.
pub const FALLBACK_TAG: &str = "fallback";

/// Whether an action will run or was skipped during adaptation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Pending,
    Skipped,
}

/// A single remediation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAction {
    #[serde(rename = "type", alias = "action_type")]
    pub action_type: String,
    pub target: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Component that must be online for this action to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    #[serde(default)]
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl StrategyAction {
    pub fn new(action_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            target: target.into(),
            parameters: Map::new(),
            depends_on: None,
            status: ActionStatus::Pending,
            skip_reason: None,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn depending_on(mut self, component: impl Into<String>) -> Self {
        self.depends_on = Some(component.into());
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.status == ActionStatus::Skipped
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = ActionStatus::Skipped;
        self.skip_reason = Some(reason.into());
    }
}

/// Descriptive and scoring metadata declared by the generator.
///
/// The optional estimates feed the ranking factors; absent values are scored
/// as neutral.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_success: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effect_severity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
}

/// Per-factor scores in `[0, 1]`, higher is better.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingFactors {
    pub success_probability: f64,
    pub resource_cost: f64,
    pub side_effect_severity: f64,
    pub duration: f64,
    pub historical: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub score: f64,
    /// 1-based position in the ranked list.
    pub rank: usize,
    pub ranking_factors: RankingFactors,
}

/// A candidate recovery strategy.
///
/// Strategies are value objects: ranking and adaptation return new copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub actions: Vec<StrategyAction>,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: StrategyMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranking: Option<Ranking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Caller-defined fields not covered above.
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl Strategy {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            actions: Vec::new(),
            confidence: 0.5,
            metadata: StrategyMetadata::default(),
            ranking: None,
            explanation: None,
            extensions: Map::new(),
        }
    }

    pub fn with_action(mut self, action: StrategyAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.push(tag.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = source.into();
        self
    }

    pub fn with_metadata(mut self, metadata: StrategyMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata.tags.iter().any(|t| t == tag)
    }

    pub fn is_fallback(&self) -> bool {
        self.has_tag(FALLBACK_TAG)
    }

    /// Actions that were not skipped during adaptation.
    pub fn executable_actions(&self) -> impl Iterator<Item = &StrategyAction> {
        self.actions.iter().filter(|a| !a.is_skipped())
    }

    /// Low-confidence diagnose-and-notify strategy used when the generator
    /// produced nothing to attempt.
    pub fn fallback(analysis: &AnalysisResult, confidence: f64) -> Self {
        let target = analysis
            .primary_cause()
            .map(|c| c.cause_type.clone())
            .unwrap_or_else(|| analysis.error_type.clone());

        Strategy::new(format!("fallback-{}", analysis.analysis_id), "generic_diagnostic")
            .with_action(
                StrategyAction::new("diagnostic", target)
                    .with_parameter("errorType", analysis.error_type.clone()),
            )
            .with_action(
                StrategyAction::new("notify", "operator")
                    .with_parameter("severity", "warning")
                    .with_parameter("analysisId", analysis.analysis_id.clone()),
            )
            .with_confidence(confidence)
            .with_tag(FALLBACK_TAG)
            .with_source("orchestrator")
    }
}

/// Output of `StrategyGenerator::generate_strategies`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedStrategies {
    pub strategies: Vec<Strategy>,
}

impl From<Vec<Strategy>> for GeneratedStrategies {
    fn from(strategies: Vec<Strategy>) -> Self {
        Self { strategies }
    }
}

/// Verdict of the validation runner. A rejection is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyValidation {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StrategyValidation {
    pub fn accept() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Output of the resolution executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub successful: bool,
    #[serde(default)]
    pub results: Vec<Value>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn succeeded(results: Vec<Value>, duration_ms: u64) -> Self {
        Self {
            successful: true,
            results,
            duration_ms,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            successful: false,
            results: Vec::new(),
            duration_ms,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}
