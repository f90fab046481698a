//! Action-handler based strategy execution.
//!
//! A [`HandlerExecutor`] dispatches each executable action of a strategy to
//! the [`ActionHandler`] registered for its action type, in order, stopping
//! at the first failing action. Skipped actions are reported, not run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use mender_core::{AnalysisResult, ExecutionResult, ResolutionExecutor, Strategy, StrategyAction};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::KitError;

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, action: &StrategyAction, analysis: &AnalysisResult) -> anyhow::Result<Value>;
}

/// Wraps a synchronous closure as an [`ActionHandler`].
pub struct FnHandler<F>(pub F);

impl<F> FnHandler<F>
where
    F: Fn(&StrategyAction) -> anyhow::Result<Value> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> ActionHandler for FnHandler<F>
where
    F: Fn(&StrategyAction) -> anyhow::Result<Value> + Send + Sync,
{
    async fn handle(&self, action: &StrategyAction, _analysis: &AnalysisResult) -> anyhow::Result<Value> {
        (self.0)(action)
    }
}

/// Logs the action and reports it as performed without side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl ActionHandler for LoggingHandler {
    async fn handle(&self, action: &StrategyAction, analysis: &AnalysisResult) -> anyhow::Result<Value> {
        info!(
            action = %action.action_type,
            target = %action.target,
            analysis_id = %analysis.analysis_id,
            "recovery action"
        );
        Ok(json!({
            "action": action.action_type,
            "target": action.target,
            "status": "logged",
        }))
    }
}

#[derive(Clone)]
pub struct HandlerExecutor {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    fallback: Option<Arc<dyn ActionHandler>>,
}

impl std::fmt::Debug for HandlerExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("HandlerExecutor")
            .field("handlers", &types)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl Default for HandlerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerExecutor {
    /// Unknown action types go to [`LoggingHandler`].
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Some(Arc::new(LoggingHandler)),
        }
    }

    /// Unknown action types fail the strategy.
    pub fn strict() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: None,
        }
    }

    pub fn with_handler(mut self, action_type: &str, handler: impl ActionHandler + 'static) -> Self {
        self.handlers.insert(action_type.to_string(), Arc::new(handler));
        self
    }

    fn handler_for(&self, action_type: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(action_type).or(self.fallback.as_ref())
    }
}

#[async_trait]
impl ResolutionExecutor for HandlerExecutor {
    async fn execute_strategy(&self, strategy: &Strategy, analysis: &AnalysisResult) -> anyhow::Result<ExecutionResult> {
        let start = Instant::now();
        let mut results = Vec::with_capacity(strategy.actions.len());

        for action in &strategy.actions {
            if action.is_skipped() {
                results.push(json!({
                    "action": action.action_type,
                    "target": action.target,
                    "status": "skipped",
                    "reason": action.skip_reason,
                }));
                continue;
            }

            let outcome = match self.handler_for(&action.action_type) {
                Some(handler) => handler.handle(action, analysis).await,
                None => Err(KitError::NoHandler(action.action_type.clone()).into()),
            };
            match outcome {
                Ok(value) => results.push(value),
                Err(e) => {
                    warn!(strategy = %strategy.id, action = %action.action_type, error = %e, "action failed");
                    let mut failed = ExecutionResult::failed(
                        format!("action {} on {} failed: {e}", action.action_type, action.target),
                        start.elapsed().as_millis() as u64,
                    );
                    failed.results = results;
                    return Ok(failed);
                }
            }
        }

        Ok(ExecutionResult::succeeded(
            results,
            start.elapsed().as_millis() as u64,
        ))
    }
}
