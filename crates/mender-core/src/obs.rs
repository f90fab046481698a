//! Structured observability hooks for recovery lifecycle events.
//!
//! Flow-scoped spans come from [`FlowSpan`]; lifecycle events are emitted at
//! `info!` level with a stable `event` field so log pipelines can filter on it.

use tracing::{info, warn, Instrument};

/// Span tagged with a flow id.
///
/// Flows suspend across collaborator calls, so the span is attached to the
/// flow future with [`FlowSpan::instrument`] instead of being entered on the
/// current thread.
pub struct FlowSpan {
    span: tracing::Span,
}

impl FlowSpan {
    pub fn new(flow_id: &str, error_type: &str) -> Self {
        Self {
            span: tracing::info_span!("recovery_flow", flow_id = %flow_id, error_type = %error_type),
        }
    }

    pub fn instrument<F: std::future::Future>(self, fut: F) -> tracing::instrument::Instrumented<F> {
        fut.instrument(self.span)
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

pub fn emit_flow_started(flow_id: &str, error_type: &str, context_id: &str) {
    info!(
        event = "flow.started",
        flow_id = %flow_id,
        error_type = %error_type,
        context_id = %context_id,
    );
}

pub fn emit_flow_finished(flow_id: &str, duration_ms: i64, attempts: usize, success: bool) {
    info!(
        event = "flow.finished",
        flow_id = %flow_id,
        duration_ms = duration_ms,
        attempts = attempts,
        success = success,
    );
}

pub fn emit_flow_aborted(flow_id: &str, stage: &str) {
    warn!(event = "flow.aborted", flow_id = %flow_id, stage = %stage);
}

/// Emit event: a breaker changed state.
pub fn emit_breaker_transition(name: &str, from: &str, to: &str, consecutive_failures: u32) {
    info!(
        event = "breaker.transition",
        breaker = %name,
        from = %from,
        to = %to,
        consecutive_failures = consecutive_failures,
    );
}

/// Emit event: container teardown finished with at least one disposer error.
pub fn emit_disposal_failures(failed: usize, total: usize) {
    warn!(
        event = "container.disposed_with_errors",
        failed = failed,
        total = total,
    );
}
