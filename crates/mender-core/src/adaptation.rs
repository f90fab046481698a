//! Fitting a strategy to current system state before execution.
//!
//! Two adjustments are made, neither of which fails the strategy:
//! actions whose `depends_on` component is unavailable are marked skipped,
//! and an `amount` parameter is clamped to what the targeted resource
//! reports as available.

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{Strategy, StrategyAction, SystemState};

const OFFLINE_STATUSES: [&str; 4] = ["offline", "down", "unavailable", "failed"];

/// Availability of a component as reported by `systemState.components`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentAvailability {
    Online,
    Offline,
    /// The component map exists but does not list this component.
    Absent,
    /// No component map is present, so nothing is known.
    Unknown,
}

impl ComponentAvailability {
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Offline | Self::Absent)
    }
}

fn status_is_online(status: &Value) -> bool {
    match status {
        Value::Bool(online) => *online,
        Value::String(s) => !OFFLINE_STATUSES.contains(&s.to_ascii_lowercase().as_str()),
        Value::Object(obj) => obj.get("status").map_or(true, status_is_online),
        Value::Null => false,
        _ => true,
    }
}

pub fn component_availability(system_state: &SystemState, component: &str) -> ComponentAvailability {
    let Some(Value::Object(components)) = system_state.get("components") else {
        return ComponentAvailability::Unknown;
    };
    match components.get(component) {
        None => ComponentAvailability::Absent,
        Some(status) if status_is_online(status) => ComponentAvailability::Online,
        Some(_) => ComponentAvailability::Offline,
    }
}

/// `systemState.resources.<name>.available`, if numeric.
pub fn available_resource(system_state: &SystemState, resource: &str) -> Option<f64> {
    system_state
        .get("resources")?
        .get(resource)?
        .get("available")?
        .as_f64()
}

fn clamp_amount(action: &mut StrategyAction, system_state: &SystemState) {
    let Some(requested) = action.parameters.get("amount").and_then(Value::as_f64) else {
        return;
    };
    let resource = action
        .parameters
        .get("resource")
        .and_then(Value::as_str)
        .unwrap_or(&action.target)
        .to_string();
    let Some(available) = available_resource(system_state, &resource) else {
        return;
    };
    if requested <= available {
        return;
    }

    let params: &mut Map<String, Value> = &mut action.parameters;
    let original = params.get("amount").cloned().unwrap_or(Value::Null);
    params.insert("requestedAmount".to_string(), original);
    params.insert("amount".to_string(), number(available.max(0.0)));
    params.insert("clamped".to_string(), Value::Bool(true));
    debug!(resource = %resource, requested, available, "action amount clamped");
}

fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value <= u64::MAX as f64 {
        Value::from(value as u64)
    } else {
        serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

/// Returns an adapted copy of `strategy`.
pub fn adapt_strategy(mut strategy: Strategy, system_state: &SystemState) -> Strategy {
    for action in &mut strategy.actions {
        if let Some(component) = action.depends_on.clone() {
            let availability = component_availability(system_state, &component);
            if availability.is_blocking() {
                let why = match availability {
                    ComponentAvailability::Absent => "absent",
                    _ => "offline",
                };
                action.skip(format!("component {component} is {why}"));
                debug!(strategy = %strategy.id, action = %action.action_type, component = %component, "action skipped");
                continue;
            }
        }
        clamp_amount(action, system_state);
    }
    strategy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ActionStatus;
    use serde_json::json;

    fn state(v: Value) -> SystemState {
        match v {
            Value::Object(m) => m,
            _ => SystemState::new(),
        }
    }

    #[test]
    fn offline_and_absent_dependencies_are_skipped() {
        let s = Strategy::new("s", "restart")
            .with_action(StrategyAction::new("restart", "api").depending_on("db"))
            .with_action(StrategyAction::new("flush", "cache").depending_on("cache"))
            .with_action(StrategyAction::new("notify", "ops").depending_on("pager"));
        let st = state(json!({"components": {"db": {"status": "offline"}, "cache": "online"}}));

        let adapted = adapt_strategy(s, &st);
        assert_eq!(adapted.actions[0].status, ActionStatus::Skipped);
        assert_eq!(adapted.actions[0].skip_reason.as_deref(), Some("component db is offline"));
        assert_eq!(adapted.actions[1].status, ActionStatus::Pending);
        assert_eq!(adapted.actions[2].skip_reason.as_deref(), Some("component pager is absent"));
    }

    #[test]
    fn dependencies_are_kept_without_component_map() {
        let s = Strategy::new("s", "restart")
            .with_action(StrategyAction::new("restart", "api").depending_on("db"));
        let adapted = adapt_strategy(s, &SystemState::new());
        assert!(!adapted.actions[0].is_skipped());
    }

    #[test]
    fn amount_is_clamped_to_available_resource() {
        let s = Strategy::new("s", "scale")
            .with_action(
                StrategyAction::new("allocate", "memory")
                    .with_parameter("amount", 512),
            )
            .with_action(
                StrategyAction::new("allocate", "pool")
                    .with_parameter("resource", "connections")
                    .with_parameter("amount", 10),
            );
        let st = state(json!({"resources": {
            "memory": {"available": 256},
            "connections": {"available": 20}
        }}));

        let adapted = adapt_strategy(s, &st);
        let mem = &adapted.actions[0].parameters;
        assert_eq!(mem["amount"], json!(256));
        assert_eq!(mem["requestedAmount"], json!(512));
        assert_eq!(mem["clamped"], json!(true));

        let pool = &adapted.actions[1].parameters;
        assert_eq!(pool["amount"], json!(10));
        assert!(pool.get("clamped").is_none());
    }
}
