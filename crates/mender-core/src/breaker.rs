//! Per-dependency circuit breakers.
//!
//! CLOSED counts consecutive failures and trips to OPEN at the threshold.
//! OPEN rejects calls until `reset_timeout_ms` has passed since the last
//! failure; the next caller then moves the breaker to HALF_OPEN and becomes
//! the single trial call. Trial success closes the breaker, trial failure
//! reopens it.
//!
//! Elapsed time uses `tokio::time::Instant`, so paused-clock tests can drive
//! the timeout with `tokio::time::advance`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::METRICS;
use crate::obs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
        }
    }
}

/// Breaker configuration for a registry: one default plus per-name overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub default: BreakerConfig,
    pub overrides: BTreeMap<String, BreakerConfig>,
}

impl BreakerSettings {
    pub fn config_for(&self, name: &str) -> BreakerConfig {
        self.overrides.get(name).copied().unwrap_or(self.default)
    }
}

/// A call was short-circuited without invoking the guarded function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker {name} is open (retry after {retry_after_ms} ms)")]
pub struct CircuitOpenError {
    pub name: String,
    pub retry_after_ms: u64,
}

/// Outcome of a guarded call that did not succeed.
#[derive(Debug)]
pub enum CallError<E> {
    /// The breaker rejected the call.
    Open(CircuitOpenError),
    /// The guarded function ran and returned this error.
    Failed(E),
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(e) => write!(f, "{e}"),
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

impl<E> std::error::Error for CallError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(e) => Some(e),
            Self::Failed(e) => Some(e),
        }
    }
}

impl<E> CallError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

impl CallError<anyhow::Error> {
    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            Self::Open(e) => e.into(),
            Self::Failed(e) => e,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Frees the half-open trial slot if the trial future is dropped mid-call.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
            debug!(breaker = %self.breaker.name, "half-open trial cancelled");
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                last_failure_time: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        obs::emit_breaker_transition(
            &self.name,
            inner.state.as_str(),
            to.as_str(),
            inner.consecutive_failures,
        );
        inner.state = to;
    }

    fn acquire(&self) -> Result<Admission, CircuitOpenError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let timeout = Duration::from_millis(self.config.reset_timeout_ms);
                let elapsed = inner.last_failure.map_or(timeout, |t| t.elapsed());
                if elapsed >= timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(Admission::Trial)
                } else {
                    Err(CircuitOpenError {
                        name: self.name.clone(),
                        retry_after_ms: u64::try_from((timeout - elapsed).as_millis())
                            .unwrap_or(u64::MAX),
                    })
                }
            }
            CircuitState::HalfOpen if inner.trial_in_flight => Err(CircuitOpenError {
                name: self.name.clone(),
                retry_after_ms: 0,
            }),
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(Admission::Trial)
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.lock();
        if admission == Admission::Trial {
            inner.trial_in_flight = false;
        }
        inner.consecutive_failures = 0;
        self.transition(&mut inner, CircuitState::Closed);
    }

    fn on_failure(&self, admission: Admission) {
        let mut inner = self.lock();
        if admission == Admission::Trial {
            inner.trial_in_flight = false;
        }
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_time = Some(Utc::now());

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            warn!(
                breaker = %self.name,
                consecutive_failures = inner.consecutive_failures,
                "circuit breaker opened"
            );
            METRICS.inc_breaker_trips();
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    /// Runs `call` unless the breaker is open. The guarded error is returned
    /// unchanged as [`CallError::Failed`].
    pub async fn execute<T, E, F, Fut>(&self, call: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.acquire().map_err(CallError::Open)?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };
        let outcome = call().await;
        guard.armed = false;

        match &outcome {
            Ok(_) => self.on_success(admission),
            Err(_) => self.on_failure(admission),
        }
        outcome.map_err(CallError::Failed)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.lock();
        CircuitBreakerState {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_time: inner.last_failure_time,
            failure_threshold: self.config.failure_threshold,
            reset_timeout_ms: self.config.reset_timeout_ms,
        }
    }

    /// Forces the breaker closed and forgets past failures.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed);
    }
}

/// One breaker per collaborator name, created on first use.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    settings: BreakerSettings,
    breakers: Mutex<BTreeMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.settings.config_for(name))))
            .clone()
    }

    /// Snapshots of every breaker created so far, sorted by name.
    pub fn states(&self) -> Vec<CircuitBreakerState> {
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|b| b.snapshot())
            .collect()
    }

    pub fn reset_all(&self) {
        for breaker in self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guarded_error_is_returned_unchanged() {
        let breaker = CircuitBreaker::new("svc", BreakerConfig::default());
        let err = breaker
            .execute(|| async { Err::<(), _>(std::io::Error::other("boom")) })
            .await
            .unwrap_err();
        match err {
            CallError::Failed(e) => assert_eq!(e.to_string(), "boom"),
            CallError::Open(_) => panic!("breaker should still be closed"),
        }
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new("svc", BreakerConfig::default());
        for _ in 0..3 {
            let _ = breaker.execute(|| async { Err::<(), _>("x") }).await;
        }
        breaker.execute(|| async { Ok::<_, &str>(1) }).await.unwrap();
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn registry_applies_overrides() {
        let mut settings = BreakerSettings::default();
        settings.overrides.insert(
            "analyzer".into(),
            BreakerConfig {
                failure_threshold: 1,
                reset_timeout_ms: 10,
            },
        );
        let registry = CircuitBreakerRegistry::new(settings);
        assert_eq!(registry.get("analyzer").config().failure_threshold, 1);
        assert_eq!(registry.get("executor").config().failure_threshold, 5);
        assert!(Arc::ptr_eq(&registry.get("analyzer"), &registry.get("analyzer")));

        let names: Vec<String> = registry.states().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["analyzer", "executor"]);
    }

    #[test]
    fn call_error_into_anyhow_keeps_message() {
        let open: CallError<anyhow::Error> = CallError::Open(CircuitOpenError {
            name: "x".into(),
            retry_after_ms: 5,
        });
        assert!(open.is_open());
        assert!(open.into_anyhow().to_string().contains("is open"));
    }
}
