//! In-memory learning from recovery outcomes.
//!
//! Outcomes are tallied per `(root cause type, strategy name)`. Only
//! strategies that executed are counted; validation rejections are ignored.
//! Success rates are Laplace-smoothed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use mender_core::{AttemptOutcome, LearningSystem, Recommendation, RecoveryFlow};
use tracing::debug;

use crate::analyzer::UNKNOWN_CAUSE;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    successes: u64,
    failures: u64,
}

/// `(successes + 1) / (attempts + 2)`.
pub fn smoothed_success_rate(successes: u64, failures: u64) -> f64 {
    (successes as f64 + 1.0) / ((successes + failures) as f64 + 2.0)
}

#[derive(Debug, Default)]
pub struct InMemoryLearningSystem {
    tallies: RwLock<HashMap<(String, String), Tally>>,
    flows: AtomicU64,
}

impl InMemoryLearningSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of flows recorded so far.
    pub fn flows_recorded(&self) -> u64 {
        self.flows.load(Ordering::Relaxed)
    }

    pub fn record(&self, flow: &RecoveryFlow) {
        let causes: Vec<String> = match &flow.analysis {
            Some(analysis) if !analysis.root_causes.is_empty() => analysis.root_cause_types(),
            _ => vec![UNKNOWN_CAUSE.to_string()],
        };

        let mut tallies = self.tallies.write().unwrap_or_else(PoisonError::into_inner);
        for attempt in &flow.strategies_attempted {
            let succeeded = match attempt.outcome {
                AttemptOutcome::Succeeded => true,
                AttemptOutcome::ExecutionFailed => false,
                AttemptOutcome::ValidationFailed => continue,
            };
            for cause in &causes {
                let tally = tallies
                    .entry((cause.clone(), attempt.strategy_name.clone()))
                    .or_default();
                if succeeded {
                    tally.successes += 1;
                } else {
                    tally.failures += 1;
                }
            }
        }
        drop(tallies);

        self.flows.fetch_add(1, Ordering::Relaxed);
        debug!(flow_id = %flow.id, attempts = flow.strategies_attempted.len(), "outcome recorded");
    }

    /// Recommendations for the given cause types, best first; ties by
    /// strategy name.
    pub fn recommend(&self, root_cause_types: &[String]) -> Vec<Recommendation> {
        let tallies = self.tallies.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<Recommendation> = tallies
            .iter()
            .filter(|((cause, _), _)| root_cause_types.contains(cause))
            .map(|((cause, name), tally)| Recommendation {
                root_cause_type: cause.clone(),
                strategy_name: name.clone(),
                successes: tally.successes,
                failures: tally.failures,
                success_rate: smoothed_success_rate(tally.successes, tally.failures),
            })
            .collect();
        out.sort_by(|a, b| {
            b.success_rate
                .total_cmp(&a.success_rate)
                .then_with(|| a.strategy_name.cmp(&b.strategy_name))
                .then_with(|| a.root_cause_type.cmp(&b.root_cause_type))
        });
        out
    }
}

#[async_trait]
impl LearningSystem for InMemoryLearningSystem {
    async fn record_recovery_outcome(&self, flow: &RecoveryFlow) -> anyhow::Result<()> {
        self.record(flow);
        Ok(())
    }

    async fn recommendations(&self, root_cause_types: &[String]) -> anyhow::Result<Vec<Recommendation>> {
        Ok(self.recommend(root_cause_types))
    }
}
