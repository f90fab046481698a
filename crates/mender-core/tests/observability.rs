//! Observability hooks must be callable without a subscriber installed and
//! must not disturb the flow they describe.

use std::sync::Arc;

use mender_core::fakes::{self, RecordingLearning, ScriptedAnalyzer, ScriptedExecutor, ScriptedGenerator, ScriptedValidator};
use mender_core::obs::{
    emit_breaker_transition, emit_disposal_failures, emit_flow_aborted, emit_flow_finished,
    emit_flow_started, FlowSpan,
};
use mender_core::{ContextManager, ErrorReport, EventBus, MenderConfig, Orchestrator, METRICS};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_flow_started() {
    emit_flow_started("flow-1", "NetworkError", "ctx-1");
}

#[traced_test]
#[test]
fn test_emit_flow_finished() {
    emit_flow_finished("flow-1", 42, 2, true);
}

#[traced_test]
#[test]
fn test_emit_flow_aborted() {
    emit_flow_aborted("flow-1", "execute");
}

#[traced_test]
#[test]
fn test_emit_breaker_transition() {
    emit_breaker_transition("analyzer", "CLOSED", "OPEN", 5);
}

#[traced_test]
#[test]
fn test_emit_disposal_failures() {
    emit_disposal_failures(1, 3);
}

#[traced_test]
#[tokio::test]
async fn test_flow_span_wraps_future() {
    let span = FlowSpan::new("flow-2", "Timeout");
    let out = span.instrument(async { 7 }).await;
    assert_eq!(out, 7);
}

#[traced_test]
#[tokio::test]
async fn test_flow_updates_metrics() {
    let bus = Arc::new(EventBus::default());
    let orchestrator = Orchestrator::new(
        fakes::collaborators(
            Arc::new(ScriptedAnalyzer::returning(fakes::analysis_for("Timeout", "timeout"))),
            Arc::new(ScriptedGenerator::with_strategies(vec![fakes::strategy("retry", "retry_request", 0.8)])),
            Arc::new(ScriptedValidator::accept_all()),
            Arc::new(ScriptedExecutor::new()),
            Arc::new(RecordingLearning::new()),
        ),
        bus.clone(),
        Arc::new(ContextManager::new(Default::default(), bus)),
        &MenderConfig::default(),
    );
    let started = METRICS.flows_started();
    let recovered = METRICS.flows_recovered();
    let published = METRICS.events_published();

    let result = orchestrator
        .recover_from_error(ErrorReport::new("Timeout", "upstream timed out"))
        .await;

    assert!(result.success);
    // Other tests in this binary share the global counters.
    assert!(METRICS.flows_started() > started);
    assert!(METRICS.flows_recovered() > recovered);
    assert!(METRICS.events_published() >= published + 8);
}
