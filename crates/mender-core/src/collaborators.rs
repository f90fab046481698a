//! Contracts for the pluggable stages of a recovery.
//!
//! Each collaborator is resolved from the container under its canonical name
//! and called through a circuit breaker of the same name.

use std::sync::Arc;

use async_trait::async_trait;

use crate::adaptation;
use crate::container::{ContainerError, DependencyContainer};
use crate::context::Context;
use crate::domain::{
    AnalysisResult, ErrorReport, ExecutionResult, GeneratedStrategies, Recommendation,
    RecoveryFlow, Strategy, StrategyValidation, SystemState,
};

pub const ANALYZER: &str = "analyzer";
pub const STRATEGY_GENERATOR: &str = "strategyGenerator";
pub const VALIDATION_RUNNER: &str = "validationRunner";
pub const RESOLUTION_EXECUTOR: &str = "resolutionExecutor";
pub const LEARNING_SYSTEM: &str = "learningSystem";

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze_error(&self, error: &ErrorReport, context: &Context) -> anyhow::Result<AnalysisResult>;
}

#[async_trait]
pub trait StrategyGenerator: Send + Sync {
    async fn generate_strategies(
        &self,
        analysis_id: &str,
        analysis: &AnalysisResult,
    ) -> anyhow::Result<GeneratedStrategies>;

    /// Orders candidates best first. `None` leaves ranking to the
    /// orchestrator's configured [`StrategyRanker`](crate::ranking::StrategyRanker).
    async fn rank_strategies(
        &self,
        _strategies: &[Strategy],
        _analysis: &AnalysisResult,
        _system_state: &SystemState,
        _recommendations: &[Recommendation],
    ) -> anyhow::Result<Option<Vec<Strategy>>> {
        Ok(None)
    }

    async fn adapt_strategy(&self, strategy: Strategy, system_state: &SystemState) -> anyhow::Result<Strategy> {
        Ok(adaptation::adapt_strategy(strategy, system_state))
    }
}

#[async_trait]
pub trait ValidationRunner: Send + Sync {
    /// A rejection is an `Ok` with `is_valid == false`; `Err` means the
    /// validator itself failed.
    async fn validate_strategy(
        &self,
        strategy: &Strategy,
        analysis: &AnalysisResult,
        system_state: &SystemState,
    ) -> anyhow::Result<StrategyValidation>;
}

#[async_trait]
pub trait ResolutionExecutor: Send + Sync {
    async fn execute_strategy(&self, strategy: &Strategy, analysis: &AnalysisResult) -> anyhow::Result<ExecutionResult>;
}

#[async_trait]
pub trait LearningSystem: Send + Sync {
    async fn record_recovery_outcome(&self, flow: &RecoveryFlow) -> anyhow::Result<()>;

    /// Historical performance for the given root-cause types.
    async fn recommendations(&self, _root_cause_types: &[String]) -> anyhow::Result<Vec<Recommendation>> {
        Ok(Vec::new())
    }
}

/// The five collaborators a recovery needs.
#[derive(Clone)]
pub struct Collaborators {
    pub analyzer: Arc<dyn Analyzer>,
    pub generator: Arc<dyn StrategyGenerator>,
    pub validator: Arc<dyn ValidationRunner>,
    pub executor: Arc<dyn ResolutionExecutor>,
    pub learning: Arc<dyn LearningSystem>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Resolves every collaborator by its canonical name. Each must be
    /// registered as the matching `Arc<dyn Trait>`.
    pub async fn from_container(container: &DependencyContainer) -> Result<Self, ContainerError> {
        Ok(Self {
            analyzer: container.resolve::<Arc<dyn Analyzer>>(ANALYZER).await?,
            generator: container
                .resolve::<Arc<dyn StrategyGenerator>>(STRATEGY_GENERATOR)
                .await?,
            validator: container
                .resolve::<Arc<dyn ValidationRunner>>(VALIDATION_RUNNER)
                .await?,
            executor: container
                .resolve::<Arc<dyn ResolutionExecutor>>(RESOLUTION_EXECUTOR)
                .await?,
            learning: container
                .resolve::<Arc<dyn LearningSystem>>(LEARNING_SYSTEM)
                .await?,
        })
    }
}
