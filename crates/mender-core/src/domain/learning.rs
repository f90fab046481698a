//! Learning-system output consumed by ranking.

use serde::{Deserialize, Serialize};

/// Historical performance of one strategy against one root-cause type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub root_cause_type: String,
    pub strategy_name: String,
    pub successes: u64,
    pub failures: u64,
    /// Smoothed success rate in `[0, 1]`.
    pub success_rate: f64,
}

impl Recommendation {
    pub fn attempts(&self) -> u64 {
        self.successes + self.failures
    }
}
