//! Mender: autonomous error-recovery orchestration.
//!
//! Given a runtime error, the [`Orchestrator`] diagnoses it, generates and
//! ranks candidate strategies, validates and executes them in order until
//! one succeeds, and feeds the outcome back to a learning system. The
//! supporting pieces are usable on their own:
//!
//! - [`EventBus`]: in-process pub/sub with bounded history
//! - [`DependencyContainer`]: async service registry with cycle detection
//! - [`ContextManager`]: audited per-recovery state
//! - [`CircuitBreaker`]: per-collaborator failure isolation

pub mod adaptation;
pub mod artifact;
pub mod breaker;
pub mod collaborators;
pub mod config;
pub mod container;
pub mod context;
pub mod domain;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod fakes;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod ranking;
pub mod telemetry;

pub use artifact::{flow_digest, read_flow_artifact, write_flow_artifact, ArtifactError};
pub use breaker::{
    BreakerConfig, BreakerSettings, CallError, CircuitBreaker, CircuitBreakerRegistry,
    CircuitBreakerState, CircuitOpenError, CircuitState,
};
pub use collaborators::{
    Analyzer, Collaborators, LearningSystem, ResolutionExecutor, StrategyGenerator,
    ValidationRunner,
};
pub use config::{MenderConfig, OrchestratorConfig};
pub use container::{
    ContainerError, DependencyContainer, DisposalFailure, RegistrationOptions, Resolver,
};
pub use context::{
    Context, ContextManager, ContextManagerConfig, ContextValidation, GetContextOptions,
    HistoryEntry,
};
pub use domain::*;
pub use error::{ContextError, MenderError, Result};
pub use event_bus::{EventBus, EventBusConfig, EventRecord, SubscriptionId};
pub use metrics::METRICS;
pub use orchestrator::{
    cancellation, CancelHandle, FailureReason, FlowCancellation, Orchestrator, RecoveryRequest,
    RecoveryResult,
};
pub use ranking::{RankingWeights, StrategyRanker};
pub use telemetry::init_tracing;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
