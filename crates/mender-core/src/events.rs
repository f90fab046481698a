//! Names of the events published on the bus.

pub const RECOVERY_STARTED: &str = "recovery:started";
pub const ANALYSIS_COMPLETED: &str = "analysis:completed";
pub const STRATEGY_GENERATION_COMPLETED: &str = "strategy:generation:completed";
pub const STRATEGY_RANKING_COMPLETED: &str = "strategy:ranking:completed";
pub const VALIDATION_COMPLETED: &str = "validation:completed";
pub const EXECUTION_COMPLETED: &str = "execution:completed";
pub const LEARNING_COMPLETED: &str = "learning:completed";
pub const RECOVERY_COMPLETED: &str = "recovery:completed";
pub const RECOVERY_ERROR: &str = "recovery:error";
pub const RECOVERY_ABORTED: &str = "recovery:aborted";

pub const CONTEXT_CREATED: &str = "context:created";
pub const CONTEXT_UPDATED: &str = "context:updated";
pub const SYSTEM_STATE_UPDATED: &str = "system:state:updated";

/// Every event the orchestrator emits for a flow, in pipeline order.
pub const FLOW_EVENTS: [&str; 10] = [
    RECOVERY_STARTED,
    ANALYSIS_COMPLETED,
    STRATEGY_GENERATION_COMPLETED,
    STRATEGY_RANKING_COMPLETED,
    VALIDATION_COMPLETED,
    EXECUTION_COMPLETED,
    LEARNING_COMPLETED,
    RECOVERY_COMPLETED,
    RECOVERY_ERROR,
    RECOVERY_ABORTED,
];
