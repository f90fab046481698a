//! Regex-driven root-cause analysis.
//!
//! Each [`CauseRule`] is matched against a single line built from the error
//! type, code and message. Every matching rule contributes one root cause;
//! an error no rule recognises gets a low-confidence `unknown` cause.

use async_trait::async_trait;
use mender_core::{AnalysisResult, Analyzer, Context, ErrorReport, RootCause};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{KitError, Result};

pub const UNKNOWN_CAUSE: &str = "unknown";
const UNKNOWN_CONFIDENCE: f64 = 0.2;

/// One recognisable failure pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CauseRule {
    pub cause_type: String,
    pub pattern: String,
    pub description: String,
    pub confidence: f64,
    #[serde(default)]
    pub hints: Vec<String>,
}

impl CauseRule {
    pub fn new(cause_type: &str, pattern: &str, description: &str, confidence: f64) -> Self {
        Self {
            cause_type: cause_type.to_string(),
            pattern: pattern.to_string(),
            description: description.to_string(),
            confidence,
            hints: Vec::new(),
        }
    }

    pub fn with_hints(mut self, hints: &[&str]) -> Self {
        self.hints = hints.iter().map(|h| h.to_string()).collect();
        self
    }
}

/// Rules shipped with the kit.
pub fn builtin_rules() -> Vec<CauseRule> {
    vec![
        CauseRule::new(
            "connection_refused",
            r"(?i)ECONNREFUSED|ECONNRESET|connection (refused|reset)",
            "the remote endpoint refused or dropped the connection",
            0.85,
        )
        .with_hints(&["retry_connection", "restart_service"]),
        CauseRule::new(
            "timeout",
            r"(?i)ETIMEDOUT|timed? ?out|deadline exceeded",
            "the operation exceeded its time budget",
            0.8,
        )
        .with_hints(&["increase_timeout", "retry_with_backoff"]),
        CauseRule::new(
            "resource_exhaustion",
            r"(?i)ENOMEM|ENOSPC|EMFILE|out of memory|no space left|too many open files|quota exceeded",
            "a local resource limit was reached",
            0.8,
        )
        .with_hints(&["free_resources", "scale_up"]),
        CauseRule::new(
            "permission_denied",
            r"(?i)EACCES|EPERM|permission denied|forbidden|unauthori[sz]ed|\b40[13]\b",
            "the caller lacks the required credentials or rights",
            0.75,
        )
        .with_hints(&["refresh_credentials", "escalate"]),
        CauseRule::new(
            "dependency_unavailable",
            r"(?i)ENOTFOUND|service unavailable|no such host|bad gateway|\b50[23]\b",
            "a downstream dependency is unreachable or unhealthy",
            0.65,
        )
        .with_hints(&["failover", "retry_with_backoff"]),
    ]
}

#[derive(Debug)]
struct CompiledRule {
    rule: CauseRule,
    regex: Regex,
}

#[derive(Debug)]
pub struct PatternAnalyzer {
    rules: Vec<CompiledRule>,
}

impl PatternAnalyzer {
    pub fn new(rules: Vec<CauseRule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|regex| CompiledRule {
                        rule: rule.clone(),
                        regex,
                    })
                    .map_err(|source| KitError::InvalidPattern {
                        cause_type: rule.cause_type.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn builtin() -> Result<Self> {
        Self::new(builtin_rules())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Synchronous core of [`Analyzer::analyze_error`].
    pub fn analyze(&self, error: &ErrorReport) -> AnalysisResult {
        let haystack = format!(
            "{} {} {}",
            error.error_type,
            error.code.as_deref().unwrap_or_default(),
            error.message
        );

        let mut analysis = AnalysisResult::new(format!("analysis-{}", Uuid::new_v4()), &error.error_type);
        for compiled in &self.rules {
            if !compiled.regex.is_match(&haystack) {
                continue;
            }
            let rule = &compiled.rule;
            analysis = analysis.with_cause(RootCause::new(
                &rule.cause_type,
                &rule.description,
                rule.confidence,
            ));
            for hint in &rule.hints {
                if !analysis.recovery_hints.contains(hint) {
                    analysis = analysis.with_hint(hint);
                }
            }
        }

        if analysis.root_causes.is_empty() {
            analysis = analysis.with_cause(RootCause::new(
                UNKNOWN_CAUSE,
                format!("no known pattern matches {}", error.error_type),
                UNKNOWN_CONFIDENCE,
            ));
        }
        debug!(
            analysis_id = %analysis.analysis_id,
            causes = ?analysis.root_cause_types(),
            "error analyzed"
        );
        analysis
    }
}

#[async_trait]
impl Analyzer for PatternAnalyzer {
    async fn analyze_error(&self, error: &ErrorReport, _context: &Context) -> anyhow::Result<AnalysisResult> {
        Ok(self.analyze(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> PatternAnalyzer {
        PatternAnalyzer::builtin().unwrap()
    }

    #[test]
    fn test_builtin_rules_compile() {
        assert_eq!(analyzer().rule_count(), builtin_rules().len());
    }

    #[test]
    fn test_connection_refused_from_code() {
        let error = ErrorReport::new("NetworkError", "connect failed").with_code("ECONNREFUSED");
        let analysis = analyzer().analyze(&error);
        assert_eq!(analysis.root_cause_types(), vec!["connection_refused"]);
        assert_eq!(analysis.recovery_hints, vec!["retry_connection", "restart_service"]);
        assert!((analysis.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_multiple_rules_can_match() {
        let error = ErrorReport::new("IoError", "write timed out: no space left on device");
        let types = analyzer().analyze(&error).root_cause_types();
        assert!(types.contains(&"timeout".to_string()));
        assert!(types.contains(&"resource_exhaustion".to_string()));
    }

    #[test]
    fn test_unmatched_error_is_unknown() {
        let analysis = analyzer().analyze(&ErrorReport::new("WeirdError", "the flux capacitor hums"));
        assert_eq!(analysis.root_cause_types(), vec![UNKNOWN_CAUSE]);
        assert!(analysis.confidence < 0.5);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = PatternAnalyzer::new(vec![CauseRule::new("broken", "(unclosed", "x", 0.5)]).unwrap_err();
        assert!(matches!(err, KitError::InvalidPattern { ref cause_type, .. } if cause_type == "broken"));
    }
}
