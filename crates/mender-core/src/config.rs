//! Runtime configuration loaded from TOML.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::breaker::{BreakerConfig, BreakerSettings};
use crate::context::ContextManagerConfig;
use crate::error::{MenderError, Result};
use crate::event_bus::EventBusConfig;
use crate::ranking::RankingWeights;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on candidates tried per flow. Unset tries every
    /// ranked candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<usize>,
    /// Confidence of the synthesized fallback strategy.
    pub fallback_confidence: f64,
    /// Source recorded on context entries written by the orchestrator.
    pub context_source: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            fallback_confidence: 0.1,
            context_source: "recovery-orchestrator".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MenderConfig {
    pub event_bus: EventBusConfig,
    pub contexts: ContextManagerConfig,
    pub breakers: BreakerSettings,
    pub ranking: RankingWeights,
    pub orchestrator: OrchestratorConfig,
}

fn check_breaker(name: &str, config: &BreakerConfig) -> Result<()> {
    if config.failure_threshold == 0 {
        return Err(MenderError::InvalidConfig(format!(
            "breakers.{name}.failure_threshold must be > 0"
        )));
    }
    Ok(())
}

impl MenderConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        check_breaker("default", &self.breakers.default)?;
        for (name, config) in &self.breakers.overrides {
            check_breaker(&format!("overrides.{name}"), config)?;
        }
        self.ranking.validate().map_err(MenderError::InvalidConfig)?;
        if self.orchestrator.max_attempts == Some(0) {
            return Err(MenderError::InvalidConfig(
                "orchestrator.max_attempts must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.orchestrator.fallback_confidence) {
            return Err(MenderError::InvalidConfig(
                "orchestrator.fallback_confidence must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}
