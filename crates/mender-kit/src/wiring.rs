//! Registers the default kit in a [`DependencyContainer`].

use std::sync::Arc;

use mender_core::collaborators::{
    ANALYZER, LEARNING_SYSTEM, RESOLUTION_EXECUTOR, STRATEGY_GENERATOR, VALIDATION_RUNNER,
};
use mender_core::orchestrator::{CONTEXT_MANAGER, EVENT_BUS};
use mender_core::{
    Analyzer, ContainerError, ContextManager, DependencyContainer, EventBus, LearningSystem,
    MenderConfig, RegistrationOptions, ResolutionExecutor, Resolver, StrategyGenerator,
    ValidationRunner,
};
use serde::{Deserialize, Serialize};

use crate::analyzer::PatternAnalyzer;
use crate::executor::HandlerExecutor;
use crate::generator::TemplateStrategyGenerator;
use crate::learning::InMemoryLearningSystem;
use crate::validator::{RuleValidationRunner, ValidationRules};

/// Concrete `Arc<InMemoryLearningSystem>` behind [`LEARNING_SYSTEM`].
pub const LEARNING_STORE: &str = "learningStore";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KitOptions {
    pub validation: ValidationRules,
    /// Fail strategies whose action types have no registered handler
    /// instead of logging them.
    pub strict_executor: bool,
}

/// Registers the shared bus and context manager plus every default
/// collaborator under its canonical name.
pub fn register_defaults(
    container: &DependencyContainer,
    config: &MenderConfig,
    options: &KitOptions,
) -> Result<(), ContainerError> {
    let bus_config = config.event_bus.clone();
    container.register(EVENT_BUS, RegistrationOptions::default(), move |_| {
        let bus_config = bus_config.clone();
        async move { Ok(Arc::new(EventBus::new(bus_config))) }
    })?;

    let contexts_config = config.contexts.clone();
    container.register(CONTEXT_MANAGER, RegistrationOptions::default(), move |r: Resolver| {
        let contexts_config = contexts_config.clone();
        async move {
            let bus: Arc<EventBus> = r.resolve(EVENT_BUS).await?;
            Ok(Arc::new(ContextManager::new(contexts_config, bus)))
        }
    })?;

    container.register(ANALYZER, RegistrationOptions::default(), |_| async {
        Ok(Arc::new(PatternAnalyzer::builtin()?) as Arc<dyn Analyzer>)
    })?;

    let weights = config.ranking;
    container.register(STRATEGY_GENERATOR, RegistrationOptions::default(), move |_| async move {
        Ok(Arc::new(TemplateStrategyGenerator::builtin(weights)?) as Arc<dyn StrategyGenerator>)
    })?;

    let rules = options.validation.clone();
    container.register(VALIDATION_RUNNER, RegistrationOptions::default(), move |_| {
        let rules = rules.clone();
        async move { Ok(Arc::new(RuleValidationRunner::new(rules)) as Arc<dyn ValidationRunner>) }
    })?;

    let strict = options.strict_executor;
    container.register(RESOLUTION_EXECUTOR, RegistrationOptions::default(), move |_| async move {
        let executor = if strict {
            HandlerExecutor::strict()
        } else {
            HandlerExecutor::new()
        };
        Ok(Arc::new(executor) as Arc<dyn ResolutionExecutor>)
    })?;

    container.register(LEARNING_STORE, RegistrationOptions::default(), |_| async {
        Ok(Arc::new(InMemoryLearningSystem::new()))
    })?;
    container.register(LEARNING_SYSTEM, RegistrationOptions::default(), |r: Resolver| async move {
        let store: Arc<InMemoryLearningSystem> = r.resolve(LEARNING_STORE).await?;
        Ok(store as Arc<dyn LearningSystem>)
    })?;

    Ok(())
}
