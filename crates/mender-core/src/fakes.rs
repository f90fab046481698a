//! Scripted in-memory collaborators (testing only).
//!
//! Each fake records how it was called so tests can assert on call counts
//! and arguments.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::json;

use crate::collaborators::{
    Analyzer, Collaborators, LearningSystem, ResolutionExecutor, StrategyGenerator,
    ValidationRunner,
};
use crate::context::Context;
use crate::domain::{
    AnalysisResult, ErrorReport, ExecutionResult, GeneratedStrategies, Recommendation,
    RecoveryFlow, RootCause, Strategy, StrategyAction, StrategyValidation, SystemState,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Analysis with one root cause of `cause_type` at 0.9 confidence.
pub fn analysis_for(error_type: &str, cause_type: &str) -> AnalysisResult {
    AnalysisResult::new(format!("analysis-{cause_type}"), error_type)
        .with_cause(RootCause::new(cause_type, format!("scripted {cause_type}"), 0.9))
}

/// Single-action strategy with the given id, name and confidence.
pub fn strategy(id: &str, name: &str, confidence: f64) -> Strategy {
    Strategy::new(id, name)
        .with_action(StrategyAction::new(name, "service"))
        .with_confidence(confidence)
        .with_source("scripted")
}

// ---------------------------------------------------------------------------
// ScriptedAnalyzer
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ScriptedAnalyzer {
    result: Result<AnalysisResult, String>,
    calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    pub fn returning(analysis: AnalysisResult) -> Self {
        Self {
            result: Ok(analysis),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze_error(&self, _error: &ErrorReport, _context: &Context) -> anyhow::Result<AnalysisResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(anyhow::Error::msg)
    }
}

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

/// Returns a fixed list; ranking and adaptation use the trait defaults.
#[derive(Debug)]
pub struct ScriptedGenerator {
    result: Result<Vec<Strategy>, String>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn with_strategies(strategies: Vec<Strategy>) -> Self {
        Self {
            result: Ok(strategies),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::with_strategies(Vec::new())
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StrategyGenerator for ScriptedGenerator {
    async fn generate_strategies(
        &self,
        _analysis_id: &str,
        _analysis: &AnalysisResult,
    ) -> anyhow::Result<GeneratedStrategies> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result
            .clone()
            .map(GeneratedStrategies::from)
            .map_err(anyhow::Error::msg)
    }
}

// ---------------------------------------------------------------------------
// ScriptedValidator
// ---------------------------------------------------------------------------

/// Accepts every strategy except the listed rejections and errors.
#[derive(Debug, Default)]
pub struct ScriptedValidator {
    rejected: HashSet<String>,
    erroring: HashSet<String>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedValidator {
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn rejecting(ids: &[&str]) -> Self {
        Self {
            rejected: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn erroring(ids: &[&str]) -> Self {
        Self {
            erroring: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Strategy ids in the order they were validated.
    pub fn seen(&self) -> Vec<String> {
        lock(&self.seen).clone()
    }
}

#[async_trait]
impl ValidationRunner for ScriptedValidator {
    async fn validate_strategy(
        &self,
        strategy: &Strategy,
        _analysis: &AnalysisResult,
        _system_state: &SystemState,
    ) -> anyhow::Result<StrategyValidation> {
        lock(&self.seen).push(strategy.id.clone());
        if self.erroring.contains(&strategy.id) {
            anyhow::bail!("validator unavailable for {}", strategy.id);
        }
        if self.rejected.contains(&strategy.id) {
            return Ok(StrategyValidation::reject(format!("{} rejected", strategy.id)));
        }
        Ok(StrategyValidation::accept())
    }
}

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    Succeed,
    /// Returns `successful: false`.
    Fail(String),
    /// Returns an `Err`.
    Error(String),
}

/// Pops one scripted outcome per call; succeeds once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
    calls: Mutex<Vec<Strategy>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<ScriptedOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Strategies as they were handed to the executor, after adaptation.
    pub fn calls(&self) -> Vec<Strategy> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl ResolutionExecutor for ScriptedExecutor {
    async fn execute_strategy(&self, strategy: &Strategy, _analysis: &AnalysisResult) -> anyhow::Result<ExecutionResult> {
        lock(&self.calls).push(strategy.clone());
        let outcome = lock(&self.outcomes)
            .pop_front()
            .unwrap_or(ScriptedOutcome::Succeed);
        match outcome {
            ScriptedOutcome::Succeed => Ok(ExecutionResult::succeeded(
                vec![json!({ "strategyId": strategy.id })],
                1,
            )),
            ScriptedOutcome::Fail(reason) => Ok(ExecutionResult::failed(reason, 1)),
            ScriptedOutcome::Error(reason) => Err(anyhow::Error::msg(reason)),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingLearning
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RecordingLearning {
    flows: Mutex<Vec<RecoveryFlow>>,
    recommendations: Vec<Recommendation>,
    fail: bool,
}

impl RecordingLearning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_recommendations(recommendations: Vec<Recommendation>) -> Self {
        Self {
            recommendations,
            ..Self::default()
        }
    }

    /// Flows passed to `record_recovery_outcome`, in call order.
    pub fn recorded(&self) -> Vec<RecoveryFlow> {
        lock(&self.flows).clone()
    }
}

#[async_trait]
impl LearningSystem for RecordingLearning {
    async fn record_recovery_outcome(&self, flow: &RecoveryFlow) -> anyhow::Result<()> {
        lock(&self.flows).push(flow.clone());
        if self.fail {
            anyhow::bail!("learning store unavailable");
        }
        Ok(())
    }

    async fn recommendations(&self, root_cause_types: &[String]) -> anyhow::Result<Vec<Recommendation>> {
        Ok(self
            .recommendations
            .iter()
            .filter(|r| root_cause_types.contains(&r.root_cause_type))
            .cloned()
            .collect())
    }
}

/// Bundles fakes into [`Collaborators`], keeping typed handles available to
/// the caller through the `Arc`s passed in.
pub fn collaborators(
    analyzer: Arc<ScriptedAnalyzer>,
    generator: Arc<ScriptedGenerator>,
    validator: Arc<ScriptedValidator>,
    executor: Arc<ScriptedExecutor>,
    learning: Arc<RecordingLearning>,
) -> Collaborators {
    Collaborators {
        analyzer,
        generator,
        validator,
        executor,
        learning,
    }
}
