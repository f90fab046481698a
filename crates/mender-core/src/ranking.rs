//! Weighted, deterministic strategy ranking.
//!
//! Each factor is normalised to `[0, 1]` with higher meaning better; missing
//! estimates score a neutral 0.5. The final score is the weighted mean of
//! the factors. Ties keep confidence-descending order, then input order.

use serde::{Deserialize, Serialize};

use crate::adaptation::component_availability;
use crate::domain::{AnalysisResult, Ranking, RankingFactors, Recommendation, Strategy, SystemState};

/// Durations at or above this score zero on the duration factor.
pub const DURATION_CEILING_MS: u64 = 60_000;

const NEUTRAL: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub success_probability: f64,
    pub resource_cost: f64,
    pub side_effect_severity: f64,
    pub duration: f64,
    pub historical: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            success_probability: 0.35,
            resource_cost: 0.15,
            side_effect_severity: 0.15,
            duration: 0.10,
            historical: 0.25,
        }
    }
}

impl RankingWeights {
    fn as_array(&self) -> [f64; 5] {
        [
            self.success_probability,
            self.resource_cost,
            self.side_effect_severity,
            self.duration,
            self.historical,
        ]
    }

    /// Weights must be finite, non-negative and not all zero.
    pub fn validate(&self) -> Result<(), String> {
        let weights = self.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("ranking weights must be finite and non-negative".to_string());
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err("ranking weights must not all be zero".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StrategyRanker {
    weights: RankingWeights,
}

impl StrategyRanker {
    pub fn new(weights: RankingWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> RankingWeights {
        self.weights
    }

    pub fn factors(
        &self,
        strategy: &Strategy,
        analysis: &AnalysisResult,
        system_state: &SystemState,
        recommendations: &[Recommendation],
    ) -> RankingFactors {
        let meta = &strategy.metadata;

        let mut success = meta.estimated_success.unwrap_or(strategy.confidence).clamp(0.0, 1.0);
        let dependent = strategy.actions.iter().filter(|a| a.depends_on.is_some()).count();
        if dependent > 0 {
            let blocked = strategy
                .actions
                .iter()
                .filter_map(|a| a.depends_on.as_deref())
                .filter(|c| component_availability(system_state, c).is_blocking())
                .count();
            success *= 1.0 - 0.5 * (blocked as f64 / strategy.actions.len() as f64);
        }

        let duration = meta.estimated_duration_ms.map_or(NEUTRAL, |ms| {
            1.0 - ms.min(DURATION_CEILING_MS) as f64 / DURATION_CEILING_MS as f64
        });

        let cause_types = analysis.root_cause_types();
        let historical = recommendations
            .iter()
            .filter(|r| r.strategy_name == strategy.name && cause_types.contains(&r.root_cause_type))
            .map(|r| r.success_rate.clamp(0.0, 1.0))
            .fold(None, |best: Option<f64>, rate| Some(best.map_or(rate, |b| b.max(rate))))
            .unwrap_or(NEUTRAL);

        RankingFactors {
            success_probability: success,
            resource_cost: 1.0 - meta.resource_cost.unwrap_or(NEUTRAL).clamp(0.0, 1.0),
            side_effect_severity: 1.0 - meta.side_effect_severity.unwrap_or(NEUTRAL).clamp(0.0, 1.0),
            duration,
            historical,
        }
    }

    pub fn score(&self, factors: &RankingFactors) -> f64 {
        let w = self.weights;
        let total = w.as_array().iter().sum::<f64>();
        if total <= 0.0 {
            return 0.0;
        }
        (w.success_probability * factors.success_probability
            + w.resource_cost * factors.resource_cost
            + w.side_effect_severity * factors.side_effect_severity
            + w.duration * factors.duration
            + w.historical * factors.historical)
            / total
    }

    /// Returns ranked, decorated copies of `strategies`, best first.
    pub fn rank(
        &self,
        strategies: Vec<Strategy>,
        analysis: &AnalysisResult,
        system_state: &SystemState,
        recommendations: &[Recommendation],
    ) -> Vec<Strategy> {
        let mut scored: Vec<(Strategy, RankingFactors, f64)> = strategies
            .into_iter()
            .map(|s| {
                let factors = self.factors(&s, analysis, system_state, recommendations);
                let score = self.score(&factors);
                (s, factors, score)
            })
            .collect();

        // sort_by is stable, so equal keys keep input order.
        scored.sort_by(|a, b| {
            b.2.total_cmp(&a.2)
                .then_with(|| b.0.confidence.total_cmp(&a.0.confidence))
        });

        scored
            .into_iter()
            .enumerate()
            .map(|(i, (mut strategy, factors, score))| {
                strategy.explanation = Some(explain(score, &factors));
                strategy.ranking = Some(Ranking {
                    score,
                    rank: i + 1,
                    ranking_factors: factors,
                });
                strategy
            })
            .collect()
    }
}

fn explain(score: f64, f: &RankingFactors) -> String {
    format!(
        "score {score:.3}: success {:.2}, cost {:.2}, side effects {:.2}, duration {:.2}, history {:.2}",
        f.success_probability, f.resource_cost, f.side_effect_severity, f.duration, f.historical
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RootCause, StrategyAction, StrategyMetadata};
    use serde_json::json;

    fn analysis() -> AnalysisResult {
        AnalysisResult::new("a", "NetworkError")
            .with_cause(RootCause::new("connection_refused", "closed port", 0.9))
    }

    fn with_estimates(id: &str, success: f64, cost: f64) -> Strategy {
        Strategy::new(id, id).with_metadata(StrategyMetadata {
            estimated_success: Some(success),
            resource_cost: Some(cost),
            ..StrategyMetadata::default()
        })
    }

    #[test]
    fn better_estimates_rank_first() {
        let ranked = StrategyRanker::default().rank(
            vec![with_estimates("weak", 0.2, 0.9), with_estimates("strong", 0.9, 0.1)],
            &analysis(),
            &SystemState::new(),
            &[],
        );
        assert_eq!(ranked[0].id, "strong");
        assert_eq!(ranked[0].ranking.as_ref().unwrap().rank, 1);
        assert_eq!(ranked[1].ranking.as_ref().unwrap().rank, 2);
        assert!(ranked[0].explanation.as_deref().unwrap().starts_with("score "));
    }

    #[test]
    fn ties_break_on_confidence_then_input_order() {
        let weights = RankingWeights {
            success_probability: 0.0,
            historical: 0.0,
            ..RankingWeights::default()
        };
        let ranked = StrategyRanker::new(weights).rank(
            vec![
                Strategy::new("a", "a").with_confidence(0.3),
                Strategy::new("b", "b").with_confidence(0.8),
                Strategy::new("c", "c").with_confidence(0.3),
            ],
            &analysis(),
            &SystemState::new(),
            &[],
        );
        let ids: Vec<&str> = ranked.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn ranking_the_same_input_twice_is_identical() {
        let recs: Vec<Recommendation> = [("retry", 0.7), ("restart", 0.7), ("failover", 0.2)]
            .iter()
            .map(|(name, rate)| Recommendation {
                root_cause_type: "connection_refused".into(),
                strategy_name: (*name).into(),
                successes: 7,
                failures: 3,
                success_rate: *rate,
            })
            .collect();
        let state = match json!({"components": {"db": "degraded"}}) {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        };
        let candidates = vec![
            Strategy::new("r1", "retry").with_confidence(0.6),
            Strategy::new("r2", "restart").with_confidence(0.6),
            Strategy::new("f", "failover")
                .with_confidence(0.6)
                .with_action(StrategyAction::new("failover", "db").depending_on("db")),
            Strategy::new("r3", "retry").with_confidence(0.6),
        ];

        let ranker = StrategyRanker::default();
        let first = ranker.rank(candidates.clone(), &analysis(), &state, &recs);
        let second = ranker.rank(candidates, &analysis(), &state, &recs);

        let summary = |ranked: &[Strategy]| -> Vec<(String, u64, usize)> {
            ranked
                .iter()
                .map(|s| {
                    let r = s.ranking.as_ref().unwrap();
                    (s.id.clone(), r.score.to_bits(), r.rank)
                })
                .collect()
        };
        assert_eq!(summary(&first), summary(&second));
        // r1, r2 and r3 tie; input order decides.
        let ids: Vec<&str> = first.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2", "r3", "f"]);
    }

    #[test]
    fn historical_rate_uses_matching_cause_only() {
        let recs = vec![
            Recommendation {
                root_cause_type: "connection_refused".into(),
                strategy_name: "retry".into(),
                successes: 9,
                failures: 1,
                success_rate: 0.9,
            },
            Recommendation {
                root_cause_type: "disk_full".into(),
                strategy_name: "retry".into(),
                successes: 0,
                failures: 5,
                success_rate: 0.1,
            },
        ];
        let ranker = StrategyRanker::default();
        let f = ranker.factors(&Strategy::new("r", "retry"), &analysis(), &SystemState::new(), &recs);
        assert!((f.historical - 0.9).abs() < 1e-9);

        let g = ranker.factors(&Strategy::new("x", "other"), &analysis(), &SystemState::new(), &recs);
        assert!((g.historical - 0.5).abs() < 1e-9);
    }

    #[test]
    fn offline_dependency_lowers_success_probability() {
        let strategy = Strategy::new("s", "restart")
            .with_confidence(0.8)
            .with_action(StrategyAction::new("restart", "api").depending_on("db"));
        let state = match json!({"components": {"db": "offline"}}) {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        };
        let f = StrategyRanker::default().factors(&strategy, &analysis(), &state, &[]);
        assert!((f.success_probability - 0.4).abs() < 1e-9);
    }

    #[test]
    fn weights_validation() {
        assert!(RankingWeights::default().validate().is_ok());
        let zero = RankingWeights {
            success_probability: 0.0,
            resource_cost: 0.0,
            side_effect_severity: 0.0,
            duration: 0.0,
            historical: 0.0,
        };
        assert!(zero.validate().is_err());
        let negative = RankingWeights {
            duration: -1.0,
            ..RankingWeights::default()
        };
        assert!(negative.validate().is_err());
    }
}
