//! The recovery state machine.
//!
//! One call to [`Orchestrator::recover_from_error`] drives an error through
//! analysis, strategy generation, ranking, a validate/adapt/execute loop over
//! ranked candidates, and a single learning step. Every collaborator call is
//! guarded by the circuit breaker registered under the collaborator's name,
//! and a bus event is published after each stage.
//!
//! Only analysis failure ends a flow early. Every other collaborator failure
//! is recorded on the flow and handled by falling back or moving on to the
//! next candidate, so the caller always gets a [`RecoveryResult`].

mod cancel;
mod result;

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

pub use cancel::{cancellation, CancelHandle, FlowCancellation};
pub use result::{FailureReason, RecoveryRequest, RecoveryResult};

use crate::adaptation;
use crate::breaker::{CallError, CircuitBreakerRegistry, CircuitBreakerState};
use crate::collaborators::{
    Collaborators, ANALYZER, LEARNING_SYSTEM, RESOLUTION_EXECUTOR, STRATEGY_GENERATOR,
    VALIDATION_RUNNER,
};
use crate::config::{MenderConfig, OrchestratorConfig};
use crate::container::{ContainerError, DependencyContainer};
use crate::context::{merge_one_level, Context, ContextManager, GetContextOptions};
use crate::domain::{
    AttemptOutcome, ErrorReport, ExecutionResult, FlowStatus, FlowStep,
    RecoveryFlow, StepName, Strategy, StrategyValidation, SystemState,
};
use crate::event_bus::EventBus;
use crate::events;
use crate::metrics::METRICS;
use crate::obs::{self, FlowSpan};
use crate::ranking::StrategyRanker;

/// Container name under which a shared `Arc<EventBus>` may be registered.
pub const EVENT_BUS: &str = "eventBus";
/// Container name under which a shared `Arc<ContextManager>` may be registered.
pub const CONTEXT_MANAGER: &str = "contextManager";

struct Inner {
    collaborators: Collaborators,
    events: Arc<EventBus>,
    contexts: Arc<ContextManager>,
    breakers: CircuitBreakerRegistry,
    ranker: StrategyRanker,
    config: OrchestratorConfig,
}

/// Cheap to clone; clones share breakers, bus and contexts.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn elapsed_ms(since: DateTime<Utc>) -> u64 {
    u64::try_from((Utc::now() - since).num_milliseconds()).unwrap_or(0)
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        events: Arc<EventBus>,
        contexts: Arc<ContextManager>,
        config: &MenderConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                collaborators,
                events,
                contexts,
                breakers: CircuitBreakerRegistry::new(config.breakers.clone()),
                ranker: StrategyRanker::new(config.ranking),
                config: config.orchestrator.clone(),
            }),
        }
    }

    /// Resolves the five collaborators by their canonical names. A shared
    /// bus or context manager registered under [`EVENT_BUS`] /
    /// [`CONTEXT_MANAGER`] is reused; otherwise fresh ones are built from
    /// `config`.
    pub async fn from_container(
        container: &DependencyContainer,
        config: &MenderConfig,
    ) -> Result<Self, ContainerError> {
        let collaborators = Collaborators::from_container(container).await?;
        let events = if container.is_registered(EVENT_BUS) {
            container.resolve::<Arc<EventBus>>(EVENT_BUS).await?
        } else {
            Arc::new(EventBus::new(config.event_bus.clone()))
        };
        let contexts = if container.is_registered(CONTEXT_MANAGER) {
            container.resolve::<Arc<ContextManager>>(CONTEXT_MANAGER).await?
        } else {
            Arc::new(ContextManager::new(config.contexts.clone(), events.clone()))
        };
        Ok(Self::new(collaborators, events, contexts, config))
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn contexts(&self) -> &Arc<ContextManager> {
        &self.inner.contexts
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn breaker_states(&self) -> Vec<CircuitBreakerState> {
        self.inner.breakers.states()
    }

    pub fn reset_breakers(&self) {
        self.inner.breakers.reset_all();
    }

    /// Runs one recovery to completion. Never fails: every outcome, including
    /// analysis failure and cancellation, is reported in the result.
    pub async fn recover_from_error(&self, request: impl Into<RecoveryRequest>) -> RecoveryResult {
        let RecoveryRequest {
            error,
            context_id,
            cancellation,
        } = request.into();
        let cancellation = cancellation.unwrap_or_else(FlowCancellation::never);

        let context_id = self.prepare_context(&error, context_id);
        let flow = RecoveryFlow::new(error, context_id);
        let span = FlowSpan::new(flow.id.as_str(), &flow.error.error_type);
        span.instrument(self.run_flow(flow, cancellation)).await
    }

    fn prepare_context(&self, error: &ErrorReport, context_id: Option<String>) -> String {
        let mut seed = Map::new();
        seed.insert("error".to_string(), to_json(error));
        seed.insert("timestamp".to_string(), to_json(&Utc::now()));
        let source = self.inner.config.context_source.clone();

        match context_id {
            Some(id) => {
                let options = GetContextOptions {
                    create_if_missing: true,
                    default_data: seed,
                    source: Some(source),
                };
                match self.inner.contexts.get_context_with(&id, options) {
                    Ok(ctx) => ctx.id,
                    Err(e) => {
                        warn!(context_id = %id, error = %e, "context lookup failed");
                        id
                    }
                }
            }
            None => self.inner.contexts.create_context(seed, &source),
        }
    }

    /// Runs `call` through the breaker for `name`.
    async fn guarded<T, F, Fut>(&self, name: &str, call: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.inner
            .breakers
            .get(name)
            .execute(call)
            .await
            .map_err(CallError::into_anyhow)
    }

    fn publish(&self, event_name: &str, flow: &RecoveryFlow, fields: Value) {
        let mut payload = Map::new();
        payload.insert("flowId".to_string(), json!(flow.id));
        payload.insert("contextId".to_string(), json!(flow.context_id));
        payload.insert("timestamp".to_string(), to_json(&Utc::now()));
        if let Value::Object(extra) = fields {
            payload.extend(extra);
        }
        self.inner.events.publish(event_name, Value::Object(payload));
    }

    fn update_context(&self, flow: &RecoveryFlow, fields: Value) {
        let Value::Object(partial) = fields else {
            return;
        };
        if let Err(e) =
            self.inner
                .contexts
                .update_context(&flow.context_id, partial, &self.inner.config.context_source)
        {
            warn!(flow_id = %flow.id, error = %e, "context update skipped");
        }
    }

    fn load_context(&self, context_id: &str) -> Context {
        self.inner
            .contexts
            .get_context(context_id)
            .unwrap_or_else(|_| Context {
                id: context_id.to_string(),
                data: Map::new(),
                meta: None,
            })
    }

    /// Manager-wide system state overlaid with the context's own
    /// `systemState`, if it carries one.
    fn system_state(&self, context_id: &str) -> SystemState {
        let mut state = self.inner.contexts.system_state();
        if let Some(Value::Object(local)) = self.load_context(context_id).data.get("systemState") {
            merge_one_level(&mut state, local.clone());
        }
        state
    }

    fn transition(&self, flow: &mut RecoveryFlow, next: FlowStatus) {
        if !flow.advance(next) {
            warn!(flow_id = %flow.id, from = %flow.status, to = %next, "rejected flow transition");
        }
    }

    async fn run_flow(&self, mut flow: RecoveryFlow, cancel: FlowCancellation) -> RecoveryResult {
        let c = &self.inner.collaborators;
        METRICS.inc_flows_started();
        obs::emit_flow_started(flow.id.as_str(), &flow.error.error_type, &flow.context_id);
        self.publish(
            events::RECOVERY_STARTED,
            &flow,
            json!({ "error": flow.error }),
        );

        // Analyze
        if cancel.is_cancelled() {
            return self.abort(flow, StepName::Analyze, None);
        }
        self.transition(&mut flow, FlowStatus::Analyzing);
        let started = Utc::now();
        let context = self.load_context(&flow.context_id);
        let analysis = match self
            .guarded(ANALYZER, || c.analyzer.analyze_error(&flow.error, &context))
            .await
        {
            Ok(analysis) => analysis,
            Err(e) => {
                flow.record_step(
                    FlowStep::new(StepName::Analyze, started, json!({ "error": e.to_string() }))
                        .with_success(false),
                );
                return self.fail_analysis(flow, e);
            }
        };
        flow.record_step(
            FlowStep::new(StepName::Analyze, started, to_json(&analysis)).with_success(true),
        );
        flow.analysis = Some(analysis.clone());
        self.update_context(
            &flow,
            json!({
                "cause": analysis.primary_cause(),
                "analysisId": analysis.analysis_id,
            }),
        );
        self.publish(
            events::ANALYSIS_COMPLETED,
            &flow,
            json!({
                "analysisId": analysis.analysis_id,
                "rootCauses": analysis.root_cause_types(),
                "confidence": analysis.confidence,
            }),
        );

        // Generate
        if cancel.is_cancelled() {
            return self.abort(flow, StepName::Generate, None);
        }
        self.transition(&mut flow, FlowStatus::Generating);
        let started = Utc::now();
        let (mut strategies, generation_error) = match self
            .guarded(STRATEGY_GENERATOR, || {
                c.generator
                    .generate_strategies(&analysis.analysis_id, &analysis)
            })
            .await
        {
            Ok(generated) => (generated.strategies, None),
            Err(e) => {
                warn!(flow_id = %flow.id, error = %e, "strategy generation failed");
                (Vec::new(), Some(e.to_string()))
            }
        };
        let fallback = strategies.is_empty();
        if fallback {
            info!(flow_id = %flow.id, "no strategies generated, using fallback");
            strategies.push(Strategy::fallback(
                &analysis,
                self.inner.config.fallback_confidence,
            ));
        }
        flow.record_step(
            FlowStep::new(
                StepName::Generate,
                started,
                json!({
                    "count": strategies.len(),
                    "fallback": fallback,
                    "error": generation_error,
                }),
            )
            .with_success(generation_error.is_none()),
        );
        self.publish(
            events::STRATEGY_GENERATION_COMPLETED,
            &flow,
            json!({ "count": strategies.len(), "fallback": fallback }),
        );

        // Rank
        let system_state = self.system_state(&flow.context_id);
        let cause_types = analysis.root_cause_types();
        let recommendations = self
            .guarded(LEARNING_SYSTEM, || c.learning.recommendations(&cause_types))
            .await
            .unwrap_or_else(|e| {
                debug!(flow_id = %flow.id, error = %e, "no learning recommendations");
                Vec::new()
            });
        let generator_ranking = self
            .guarded(STRATEGY_GENERATOR, || {
                c.generator.rank_strategies(
                    &strategies,
                    &analysis,
                    &system_state,
                    &recommendations,
                )
            })
            .await;
        let ranked = match generator_ranking {
            Ok(Some(ranked)) if !ranked.is_empty() => ranked,
            Ok(None) => self
                .inner
                .ranker
                .rank(strategies, &analysis, &system_state, &recommendations),
            Ok(Some(_)) => {
                warn!(flow_id = %flow.id, "generator ranked no strategies, using core ranker");
                self.inner
                    .ranker
                    .rank(strategies, &analysis, &system_state, &recommendations)
            }
            Err(e) => {
                warn!(flow_id = %flow.id, error = %e, "ranking failed, using core ranker");
                self.inner
                    .ranker
                    .rank(strategies, &analysis, &system_state, &recommendations)
            }
        };
        let order: Vec<&str> = ranked.iter().map(|s| s.id.as_str()).collect();
        self.publish(
            events::STRATEGY_RANKING_COMPLETED,
            &flow,
            json!({ "order": order }),
        );

        // Validate, adapt, execute
        let mut winner: Option<Strategy> = None;
        let mut last_execution: Option<ExecutionResult> = None;
        let limit = self.inner.config.max_attempts.unwrap_or(usize::MAX);
        for candidate in ranked.into_iter().take(limit) {
            if cancel.is_cancelled() {
                return self.abort(flow, StepName::Validate, last_execution);
            }
            self.transition(&mut flow, FlowStatus::Validating);
            let started = Utc::now();
            let verdict = match self
                .guarded(VALIDATION_RUNNER, || {
                    c.validator
                        .validate_strategy(&candidate, &analysis, &system_state)
                })
                .await
            {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(flow_id = %flow.id, strategy = %candidate.id, error = %e, "validator failed");
                    StrategyValidation::reject(format!("validator error: {e}"))
                }
            };
            let mut step = FlowStep::new(StepName::Validate, started, to_json(&verdict))
                .with_success(verdict.is_valid)
                .for_strategy(&candidate.id);
            if !verdict.is_valid {
                step = step.with_outcome(AttemptOutcome::ValidationFailed);
            }
            flow.record_step(step);
            self.publish(
                events::VALIDATION_COMPLETED,
                &flow,
                json!({
                    "strategyId": candidate.id,
                    "isValid": verdict.is_valid,
                    "reason": verdict.reason,
                }),
            );
            if !verdict.is_valid {
                debug!(flow_id = %flow.id, strategy = %candidate.id, "strategy rejected");
                flow.record_attempt(&candidate.id, &candidate.name, AttemptOutcome::ValidationFailed);
                continue;
            }

            let adapted = match self
                .guarded(STRATEGY_GENERATOR, || {
                    c.generator.adapt_strategy(candidate.clone(), &system_state)
                })
                .await
            {
                Ok(adapted) => adapted,
                Err(e) => {
                    warn!(flow_id = %flow.id, strategy = %candidate.id, error = %e, "adaptation failed, using core adaptation");
                    adaptation::adapt_strategy(candidate.clone(), &system_state)
                }
            };

            if cancel.is_cancelled() {
                return self.abort(flow, StepName::Execute, last_execution);
            }
            self.transition(&mut flow, FlowStatus::Executing);
            self.update_context(
                &flow,
                json!({ "currentStrategy": { "id": adapted.id, "name": adapted.name } }),
            );
            let started = Utc::now();
            let execution = match self
                .guarded(RESOLUTION_EXECUTOR, || {
                    c.executor.execute_strategy(&adapted, &analysis)
                })
                .await
            {
                Ok(execution) => execution,
                Err(e) => ExecutionResult::failed(e.to_string(), elapsed_ms(started)),
            };
            let outcome = if execution.successful {
                AttemptOutcome::Succeeded
            } else {
                AttemptOutcome::ExecutionFailed
            };
            flow.record_step(
                FlowStep::new(StepName::Execute, started, to_json(&execution))
                    .with_success(execution.successful)
                    .with_outcome(outcome)
                    .for_strategy(&adapted.id),
            );
            flow.record_attempt(&adapted.id, &adapted.name, outcome);
            self.update_context(
                &flow,
                json!({
                    "lastExecution": {
                        "strategyId": adapted.id,
                        "successful": execution.successful,
                        "error": execution.error,
                    }
                }),
            );
            self.publish(
                events::EXECUTION_COMPLETED,
                &flow,
                json!({
                    "strategyId": adapted.id,
                    "successful": execution.successful,
                    "durationMs": execution.duration_ms,
                }),
            );

            let succeeded = execution.successful;
            last_execution = Some(execution);
            if succeeded {
                winner = Some(adapted);
                break;
            }
            warn!(flow_id = %flow.id, strategy = %adapted.id, "strategy execution failed");
        }

        // Learn
        if cancel.is_cancelled() {
            return self.abort(flow, StepName::Learn, last_execution);
        }
        let success = winner.is_some();
        self.transition(&mut flow, FlowStatus::Learning);
        flow.successful = Some(success);
        let started = Utc::now();
        let learned = self
            .guarded(LEARNING_SYSTEM, || c.learning.record_recovery_outcome(&flow))
            .await;
        let learn_error = learned.as_ref().err().map(|e| e.to_string());
        if let Some(e) = &learn_error {
            warn!(flow_id = %flow.id, error = %e, "learning failed");
        }
        flow.record_step(
            FlowStep::new(StepName::Learn, started, json!({ "error": learn_error }))
                .with_success(learned.is_ok()),
        );
        self.publish(
            events::LEARNING_COMPLETED,
            &flow,
            json!({ "successful": learned.is_ok() }),
        );

        let reason = (!success).then(|| failure_reason(&flow));
        let status = if success {
            FlowStatus::Completed
        } else {
            FlowStatus::Failed
        };
        flow.finish(success, status);
        self.complete(flow, winner, last_execution, reason)
    }

    fn complete(
        &self,
        flow: RecoveryFlow,
        strategy: Option<Strategy>,
        execution_result: Option<ExecutionResult>,
        reason: Option<FailureReason>,
    ) -> RecoveryResult {
        let success = strategy.is_some();
        if success {
            METRICS.inc_flows_recovered();
        } else {
            METRICS.inc_flows_failed();
        }
        self.update_context(
            &flow,
            json!({ "recoveryStatus": flow.status, "successful": success }),
        );
        obs::emit_flow_finished(
            flow.id.as_str(),
            flow.duration_ms().unwrap_or(0),
            flow.strategies_attempted.len(),
            success,
        );
        self.publish(
            events::RECOVERY_COMPLETED,
            &flow,
            json!({
                "success": success,
                "reason": reason,
                "strategyId": strategy.as_ref().map(|s| s.id.as_str()),
                "attempts": flow.strategies_attempted.len(),
                "durationMs": flow.duration_ms(),
            }),
        );
        RecoveryResult {
            success,
            flow_id: flow.id.clone(),
            strategy,
            execution_result,
            reason,
            error: None,
            flow,
        }
    }

    fn fail_analysis(&self, mut flow: RecoveryFlow, error: anyhow::Error) -> RecoveryResult {
        let message = error.to_string();
        warn!(flow_id = %flow.id, error = %message, "analysis failed");
        flow.finish(false, FlowStatus::Failed);
        METRICS.inc_flows_failed();
        self.update_context(
            &flow,
            json!({ "recoveryStatus": flow.status, "successful": false }),
        );
        obs::emit_flow_finished(flow.id.as_str(), flow.duration_ms().unwrap_or(0), 0, false);
        self.publish(
            events::RECOVERY_ERROR,
            &flow,
            json!({ "stage": StepName::Analyze, "error": message }),
        );
        RecoveryResult {
            success: false,
            flow_id: flow.id.clone(),
            strategy: None,
            execution_result: None,
            reason: None,
            error: Some(message),
            flow,
        }
    }

    fn abort(
        &self,
        mut flow: RecoveryFlow,
        stage: StepName,
        last_execution: Option<ExecutionResult>,
    ) -> RecoveryResult {
        let stage_name = to_json(&stage);
        obs::emit_flow_aborted(flow.id.as_str(), stage_name.as_str().unwrap_or_default());
        flow.finish(false, FlowStatus::Aborted);
        METRICS.inc_flows_aborted();
        self.update_context(
            &flow,
            json!({ "recoveryStatus": flow.status, "successful": false }),
        );
        self.publish(
            events::RECOVERY_ABORTED,
            &flow,
            json!({ "stage": stage_name }),
        );
        RecoveryResult {
            success: false,
            flow_id: flow.id.clone(),
            strategy: None,
            execution_result: last_execution,
            reason: Some(FailureReason::Aborted),
            error: None,
            flow,
        }
    }
}

/// No candidate executed: validation failed. Candidates executed and none
/// was rejected: execution failed. Otherwise the failures were mixed.
fn failure_reason(flow: &RecoveryFlow) -> FailureReason {
    let executed = flow.attempts_with(AttemptOutcome::ExecutionFailed)
        + flow.attempts_with(AttemptOutcome::Succeeded);
    let rejected = flow.attempts_with(AttemptOutcome::ValidationFailed);
    if executed == 0 {
        FailureReason::ValidationFailed
    } else if rejected == 0 {
        FailureReason::ExecutionFailed
    } else {
        FailureReason::NoStrategySucceeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorReport;

    fn flow_with(outcomes: &[AttemptOutcome]) -> RecoveryFlow {
        let mut flow = RecoveryFlow::new(ErrorReport::new("E", "m"), "ctx");
        for (i, outcome) in outcomes.iter().enumerate() {
            flow.record_attempt(&format!("s{i}"), "s", *outcome);
        }
        flow
    }

    #[test]
    fn reason_is_validation_failed_without_executions() {
        let flow = flow_with(&[AttemptOutcome::ValidationFailed, AttemptOutcome::ValidationFailed]);
        assert_eq!(failure_reason(&flow), FailureReason::ValidationFailed);
        assert_eq!(failure_reason(&flow_with(&[])), FailureReason::ValidationFailed);
    }

    #[test]
    fn reason_is_execution_failed_when_nothing_was_rejected() {
        let flow = flow_with(&[AttemptOutcome::ExecutionFailed, AttemptOutcome::ExecutionFailed]);
        assert_eq!(failure_reason(&flow), FailureReason::ExecutionFailed);
    }

    #[test]
    fn reason_is_mixed_otherwise() {
        let flow = flow_with(&[AttemptOutcome::ValidationFailed, AttemptOutcome::ExecutionFailed]);
        assert_eq!(failure_reason(&flow), FailureReason::NoStrategySucceeded);
    }
}
