//! Rule-based strategy validation.
//!
//! Every rule is evaluated and all violations are reported together in the
//! rejection reason.

use async_trait::async_trait;
use mender_core::{AnalysisResult, Strategy, StrategyValidation, SystemState, ValidationRunner};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// System-state key that, when `true`, blocks every non-fallback strategy.
pub const MAINTENANCE_MODE: &str = "maintenanceMode";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    pub min_confidence: f64,
    pub blocked_action_types: Vec<String>,
    /// Strategies declaring a higher side-effect severity are rejected.
    pub max_side_effect_severity: Option<f64>,
    pub respect_maintenance_mode: bool,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            min_confidence: 0.05,
            blocked_action_types: Vec::new(),
            max_side_effect_severity: None,
            respect_maintenance_mode: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleValidationRunner {
    rules: ValidationRules,
}

impl RuleValidationRunner {
    pub fn new(rules: ValidationRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    pub fn violations(&self, strategy: &Strategy, system_state: &SystemState) -> Vec<String> {
        let mut violations = Vec::new();

        if strategy.confidence < self.rules.min_confidence {
            violations.push(format!(
                "confidence {:.2} below minimum {:.2}",
                strategy.confidence, self.rules.min_confidence
            ));
        }

        for action in &strategy.actions {
            if self.rules.blocked_action_types.contains(&action.action_type) {
                violations.push(format!("action type {} is blocked", action.action_type));
            }
        }

        if strategy.executable_actions().next().is_none() {
            violations.push("strategy has no executable actions".to_string());
        }

        if let (Some(max), Some(severity)) = (
            self.rules.max_side_effect_severity,
            strategy.metadata.side_effect_severity,
        ) {
            if severity > max {
                violations.push(format!("side-effect severity {severity:.2} exceeds {max:.2}"));
            }
        }

        if self.rules.respect_maintenance_mode
            && system_state.get(MAINTENANCE_MODE) == Some(&Value::Bool(true))
            && !strategy.is_fallback()
        {
            violations.push("system is in maintenance mode".to_string());
        }

        violations
    }
}

#[async_trait]
impl ValidationRunner for RuleValidationRunner {
    async fn validate_strategy(
        &self,
        strategy: &Strategy,
        _analysis: &AnalysisResult,
        system_state: &SystemState,
    ) -> anyhow::Result<StrategyValidation> {
        let violations = self.violations(strategy, system_state);
        if violations.is_empty() {
            return Ok(StrategyValidation::accept());
        }
        debug!(strategy = %strategy.id, violations = violations.len(), "strategy rejected");
        Ok(StrategyValidation::reject(violations.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_core::StrategyAction;
    use serde_json::json;

    fn strategy(confidence: f64) -> Strategy {
        Strategy::new("s", "restart")
            .with_action(StrategyAction::new("restart", "api"))
            .with_confidence(confidence)
    }

    fn state(v: Value) -> SystemState {
        match v {
            Value::Object(m) => m,
            _ => SystemState::new(),
        }
    }

    #[tokio::test]
    async fn test_accepts_reasonable_strategy() {
        let v = RuleValidationRunner::default()
            .validate_strategy(&strategy(0.6), &AnalysisResult::new("a", "E"), &SystemState::new())
            .await
            .unwrap();
        assert!(v.is_valid);
    }

    #[test]
    fn test_reports_every_violation() {
        let runner = RuleValidationRunner::new(ValidationRules {
            blocked_action_types: vec!["restart".into()],
            ..ValidationRules::default()
        });
        let violations = runner.violations(&strategy(0.01), &SystemState::new());
        assert_eq!(violations.len(), 2);
        assert!(violations[0].contains("below minimum"));
        assert!(violations[1].contains("restart is blocked"));
    }

    #[test]
    fn test_empty_strategy_is_rejected() {
        let violations = RuleValidationRunner::default().violations(
            &Strategy::new("s", "nothing").with_confidence(0.9),
            &SystemState::new(),
        );
        assert_eq!(violations, vec!["strategy has no executable actions"]);
    }

    #[test]
    fn test_maintenance_mode_allows_only_fallback() {
        let runner = RuleValidationRunner::default();
        let st = state(json!({ "maintenanceMode": true }));
        assert_eq!(runner.violations(&strategy(0.9), &st).len(), 1);

        let analysis = AnalysisResult::new("a", "E");
        assert!(runner.violations(&Strategy::fallback(&analysis, 0.1), &st).is_empty());
    }

    #[test]
    fn test_side_effect_ceiling() {
        let runner = RuleValidationRunner::new(ValidationRules {
            max_side_effect_severity: Some(0.3),
            ..ValidationRules::default()
        });
        let mut s = strategy(0.9);
        s.metadata.side_effect_severity = Some(0.5);
        assert_eq!(runner.violations(&s, &SystemState::new()).len(), 1);
    }
}
