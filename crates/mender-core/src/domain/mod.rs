//! Data model shared by the orchestrator and its collaborators.

pub mod analysis;
pub mod flow;
pub mod learning;
pub mod strategy;

pub use analysis::{AnalysisResult, ErrorReport, RootCause};
pub use flow::{
    AttemptOutcome, FlowId, FlowStatus, FlowStep, RecoveryFlow, StepName, StrategyAttempt,
};
pub use learning::Recommendation;
pub use strategy::{
    ActionStatus, ExecutionResult, GeneratedStrategies, Ranking, RankingFactors, Strategy,
    StrategyAction, StrategyMetadata, StrategyValidation, FALLBACK_TAG,
};

/// Coarse, process-wide system state: components, resources and flags.
pub type SystemState = serde_json::Map<String, serde_json::Value>;
