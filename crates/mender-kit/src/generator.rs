//! Template-based strategy generation.
//!
//! Templates are keyed by root-cause type. For each root cause of an
//! analysis, in order, every matching template yields one candidate whose
//! confidence is the template's own confidence scaled by the cause's. A
//! template reached through several causes is emitted once, for the first.

use std::collections::HashSet;

use async_trait::async_trait;
use mender_core::{
    AnalysisResult, GeneratedStrategies, RankingWeights, Recommendation, Strategy, StrategyAction,
    StrategyGenerator, StrategyMetadata, StrategyRanker, SystemState,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{KitError, Result};

pub const TEMPLATE_SOURCE: &str = "template";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTemplate {
    pub name: String,
    pub cause_type: String,
    pub confidence: f64,
    pub actions: Vec<StrategyAction>,
    #[serde(default)]
    pub metadata: StrategyMetadata,
}

impl StrategyTemplate {
    pub fn new(name: &str, cause_type: &str, confidence: f64) -> Self {
        Self {
            name: name.to_string(),
            cause_type: cause_type.to_string(),
            confidence,
            actions: Vec::new(),
            metadata: StrategyMetadata::default(),
        }
    }

    pub fn with_action(mut self, action: StrategyAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Success estimate, resource cost, side-effect severity, duration.
    pub fn with_estimates(mut self, success: f64, cost: f64, severity: f64, duration_ms: u64) -> Self {
        self.metadata.estimated_success = Some(success);
        self.metadata.resource_cost = Some(cost);
        self.metadata.side_effect_severity = Some(severity);
        self.metadata.estimated_duration_ms = Some(duration_ms);
        self
    }

    fn instantiate(&self, analysis_id: &str, cause_confidence: f64) -> Strategy {
        let mut metadata = self.metadata.clone();
        metadata.source = TEMPLATE_SOURCE.to_string();
        let mut strategy = Strategy::new(format!("{analysis_id}:{}", self.name), &self.name)
            .with_confidence(self.confidence * cause_confidence)
            .with_metadata(metadata)
            .with_tag(&self.cause_type);
        strategy.actions = self.actions.clone();
        strategy
    }
}

pub fn builtin_templates() -> Vec<StrategyTemplate> {
    vec![
        StrategyTemplate::new("retry_connection", "connection_refused", 0.8)
            .with_action(
                StrategyAction::new("retry", "upstream")
                    .with_parameter("attempts", 3)
                    .with_parameter("backoffMs", 500),
            )
            .with_estimates(0.6, 0.1, 0.1, 2_000),
        StrategyTemplate::new("restart_service", "connection_refused", 0.7)
            .with_action(StrategyAction::new("restart", "service").depending_on("supervisor"))
            .with_action(StrategyAction::new("health_check", "service"))
            .with_estimates(0.75, 0.3, 0.5, 15_000),
        StrategyTemplate::new("increase_timeout", "timeout", 0.7)
            .with_action(StrategyAction::new("configure", "client").with_parameter("timeoutMs", 30_000))
            .with_estimates(0.55, 0.1, 0.2, 1_000),
        StrategyTemplate::new("retry_with_backoff", "timeout", 0.75)
            .with_action(
                StrategyAction::new("retry", "upstream")
                    .with_parameter("attempts", 5)
                    .with_parameter("backoffMs", 1_000),
            )
            .with_estimates(0.6, 0.2, 0.1, 10_000),
        StrategyTemplate::new("free_resources", "resource_exhaustion", 0.7)
            .with_action(StrategyAction::new("cleanup", "disk").with_parameter("paths", json!(["/tmp", "logs"])))
            .with_estimates(0.6, 0.1, 0.3, 5_000),
        StrategyTemplate::new("scale_up", "resource_exhaustion", 0.65)
            .with_action(
                StrategyAction::new("allocate", "memory")
                    .with_parameter("resource", "memory")
                    .with_parameter("amount", 1_024),
            )
            .with_estimates(0.7, 0.7, 0.2, 30_000),
        StrategyTemplate::new("refresh_credentials", "permission_denied", 0.7)
            .with_action(StrategyAction::new("refresh_credentials", "credentials").depending_on("vault"))
            .with_estimates(0.65, 0.1, 0.2, 3_000),
        StrategyTemplate::new("escalate", "permission_denied", 0.4)
            .with_action(StrategyAction::new("notify", "operator").with_parameter("severity", "high"))
            .with_estimates(0.3, 0.05, 0.05, 500),
        StrategyTemplate::new("failover", "dependency_unavailable", 0.7)
            .with_action(StrategyAction::new("failover", "replica").depending_on("replica"))
            .with_estimates(0.7, 0.4, 0.4, 8_000),
        StrategyTemplate::new("retry_with_backoff", "dependency_unavailable", 0.6)
            .with_action(
                StrategyAction::new("retry", "upstream")
                    .with_parameter("attempts", 5)
                    .with_parameter("backoffMs", 2_000),
            )
            .with_estimates(0.5, 0.2, 0.1, 20_000),
    ]
}

/// Generates from templates and ranks with its own configured ranker.
#[derive(Debug, Clone)]
pub struct TemplateStrategyGenerator {
    templates: Vec<StrategyTemplate>,
    ranker: StrategyRanker,
}

impl TemplateStrategyGenerator {
    pub fn new(templates: Vec<StrategyTemplate>, weights: RankingWeights) -> Result<Self> {
        for template in &templates {
            if template.actions.is_empty() {
                return Err(KitError::InvalidTemplate {
                    name: template.name.clone(),
                    reason: "template has no actions".to_string(),
                });
            }
            if !(0.0..=1.0).contains(&template.confidence) {
                return Err(KitError::InvalidTemplate {
                    name: template.name.clone(),
                    reason: format!("confidence {} outside [0, 1]", template.confidence),
                });
            }
        }
        Ok(Self {
            templates,
            ranker: StrategyRanker::new(weights),
        })
    }

    pub fn builtin(weights: RankingWeights) -> Result<Self> {
        Self::new(builtin_templates(), weights)
    }

    pub fn templates(&self) -> &[StrategyTemplate] {
        &self.templates
    }

    pub fn generate(&self, analysis_id: &str, analysis: &AnalysisResult) -> Vec<Strategy> {
        let mut seen = HashSet::new();
        let mut strategies = Vec::new();
        for cause in &analysis.root_causes {
            for template in self.templates.iter().filter(|t| t.cause_type == cause.cause_type) {
                if seen.insert(template.name.as_str()) {
                    strategies.push(template.instantiate(analysis_id, cause.confidence));
                }
            }
        }
        debug!(analysis_id, count = strategies.len(), "strategies generated");
        strategies
    }
}

#[async_trait]
impl StrategyGenerator for TemplateStrategyGenerator {
    async fn generate_strategies(
        &self,
        analysis_id: &str,
        analysis: &AnalysisResult,
    ) -> anyhow::Result<GeneratedStrategies> {
        Ok(self.generate(analysis_id, analysis).into())
    }

    async fn rank_strategies(
        &self,
        strategies: &[Strategy],
        analysis: &AnalysisResult,
        system_state: &SystemState,
        recommendations: &[Recommendation],
    ) -> anyhow::Result<Option<Vec<Strategy>>> {
        Ok(Some(self.ranker.rank(
            strategies.to_vec(),
            analysis,
            system_state,
            recommendations,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_core::RootCause;

    fn generator() -> TemplateStrategyGenerator {
        TemplateStrategyGenerator::builtin(RankingWeights::default()).unwrap()
    }

    fn analysis(causes: &[(&str, f64)]) -> AnalysisResult {
        causes.iter().fold(AnalysisResult::new("a-1", "E"), |a, (t, c)| {
            a.with_cause(RootCause::new(*t, "test", *c))
        })
    }

    #[test]
    fn test_templates_match_cause() {
        let strategies = generator().generate("a-1", &analysis(&[("connection_refused", 0.5)]));
        let names: Vec<&str> = strategies.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["retry_connection", "restart_service"]);
        assert_eq!(strategies[0].id, "a-1:retry_connection");
        assert!((strategies[0].confidence - 0.4).abs() < 1e-9);
        assert!(strategies[0].has_tag("connection_refused"));
        assert_eq!(strategies[0].metadata.source, TEMPLATE_SOURCE);
    }

    #[test]
    fn test_shared_template_emitted_once() {
        let strategies = generator().generate(
            "a-1",
            &analysis(&[("timeout", 0.9), ("dependency_unavailable", 0.6)]),
        );
        let backoff: Vec<_> = strategies.iter().filter(|s| s.name == "retry_with_backoff").collect();
        assert_eq!(backoff.len(), 1);
        assert!(backoff[0].has_tag("timeout"));
    }

    #[test]
    fn test_unknown_cause_generates_nothing() {
        assert!(generator().generate("a-1", &analysis(&[("unknown", 0.2)])).is_empty());
    }

    #[test]
    fn test_template_without_actions_is_rejected() {
        let err = TemplateStrategyGenerator::new(
            vec![StrategyTemplate::new("empty", "timeout", 0.5)],
            RankingWeights::default(),
        )
        .unwrap_err();
        assert!(matches!(err, KitError::InvalidTemplate { .. }));
    }

    #[tokio::test]
    async fn test_configured_weights_drive_ranking() {
        let only_cost = RankingWeights {
            success_probability: 0.0,
            resource_cost: 1.0,
            side_effect_severity: 0.0,
            duration: 0.0,
            historical: 0.0,
        };
        let gen = TemplateStrategyGenerator::builtin(only_cost).unwrap();
        let a = analysis(&[("resource_exhaustion", 1.0)]);
        let candidates = gen.generate("a-1", &a);
        let ranked = gen
            .rank_strategies(&candidates, &a, &SystemState::new(), &[])
            .await
            .unwrap()
            .unwrap();
        // free_resources is cheaper than scale_up.
        assert_eq!(ranked[0].name, "free_resources");
        assert_eq!(ranked[0].ranking.as_ref().map(|r| r.rank), Some(1));
    }
}
