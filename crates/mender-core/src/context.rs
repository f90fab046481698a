//! Versioned, audit-tracked state for in-flight recoveries.
//!
//! Every mutation of a context goes through [`ContextManager::update_context`],
//! which appends a history entry. History is write-once: nothing rewrites or
//! removes an entry short of deleting the whole context.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::domain::SystemState;
use crate::error::ContextError;
use crate::event_bus::EventBus;
use crate::events;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextOperation {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub operation: ContextOperation,
    pub changed_keys: Vec<String>,
    /// Values the changed keys held before this entry. Keys that did not
    /// exist are absent.
    #[serde(default)]
    pub previous_values: Map<String, Value>,
    /// Full body after this entry was applied.
    pub snapshot: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMeta {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source: String,
    pub history: Vec<HistoryEntry>,
}

/// A copy of a context as handed out by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ContextMeta>,
}

impl Context {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn history(&self) -> &[HistoryEntry] {
        self.meta.as_ref().map_or(&[], |m| m.history.as_slice())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextManagerConfig {
    /// When false, returned copies carry no `meta`.
    pub include_metadata: bool,
}

impl Default for ContextManagerConfig {
    fn default() -> Self {
        Self {
            include_metadata: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetContextOptions {
    pub create_if_missing: bool,
    pub default_data: Map<String, Value>,
    /// Recorded as the creator when a missing context is created.
    pub source: Option<String>,
}

impl GetContextOptions {
    pub fn create_if_missing(default_data: Map<String, Value>) -> Self {
        Self {
            create_if_missing: true,
            default_data,
            source: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextValidation {
    pub valid: bool,
    pub missing_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct ContextManager {
    contexts: RwLock<HashMap<String, Context>>,
    system_state: RwLock<SystemState>,
    events: Arc<EventBus>,
    config: ContextManagerConfig,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("contexts", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

impl ContextManager {
    pub fn new(config: ContextManagerConfig, events: Arc<EventBus>) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            system_state: RwLock::new(SystemState::new()),
            events,
            config,
        }
    }

    fn view(&self, ctx: &Context) -> Context {
        let mut copy = ctx.clone();
        if !self.config.include_metadata {
            copy.meta = None;
        }
        copy
    }

    fn insert_new(&self, id: String, data: Map<String, Value>, source: &str) -> Context {
        let now = Utc::now();
        let ctx = Context {
            id: id.clone(),
            data: data.clone(),
            meta: Some(ContextMeta {
                created_at: now,
                updated_at: now,
                source: source.to_string(),
                history: vec![HistoryEntry {
                    timestamp: now,
                    source: source.to_string(),
                    operation: ContextOperation::Create,
                    changed_keys: data.keys().cloned().collect(),
                    previous_values: Map::new(),
                    snapshot: data,
                }],
            }),
        };
        {
            let mut contexts = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
            // Lost a create-if-missing race: keep the winner's history.
            if let Some(existing) = contexts.get(&id) {
                return existing.clone();
            }
            contexts.insert(id.clone(), ctx.clone());
        }

        debug!(context_id = %id, source, "context created");
        self.events.publish(
            events::CONTEXT_CREATED,
            json!({ "contextId": id, "source": source, "timestamp": now }),
        );
        ctx
    }

    /// Creates a context with a fresh id and returns the id.
    pub fn create_context(&self, initial_data: Map<String, Value>, source: &str) -> String {
        self.insert_new(Uuid::new_v4().to_string(), initial_data, source)
            .id
    }

    pub fn get_context(&self, id: &str) -> Result<Context, ContextError> {
        self.get_context_with(id, GetContextOptions::default())
    }

    /// Like [`get_context`](Self::get_context), optionally creating the
    /// context under the requested id when it does not exist.
    pub fn get_context_with(&self, id: &str, options: GetContextOptions) -> Result<Context, ContextError> {
        if let Some(ctx) = self
            .contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return Ok(self.view(ctx));
        }
        if !options.create_if_missing {
            return Err(ContextError::ContextNotFound(id.to_string()));
        }
        let source = options.source.as_deref().unwrap_or("context-manager");
        let created = self.insert_new(id.to_string(), options.default_data, source);
        Ok(self.view(&created))
    }

    /// Shallow-merges `partial` into the context body and records a history
    /// entry with the previous values of every changed key.
    pub fn update_context(
        &self,
        id: &str,
        partial: Map<String, Value>,
        source: &str,
    ) -> Result<Context, ContextError> {
        let now = Utc::now();
        let (updated, changed_keys) = {
            let mut contexts = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
            let ctx = contexts
                .get_mut(id)
                .ok_or_else(|| ContextError::ContextNotFound(id.to_string()))?;

            let mut changed_keys = Vec::new();
            let mut previous_values = Map::new();
            for (key, value) in partial {
                if ctx.data.get(&key) == Some(&value) {
                    continue;
                }
                if let Some(old) = ctx.data.insert(key.clone(), value) {
                    previous_values.insert(key.clone(), old);
                }
                changed_keys.push(key);
            }

            let meta = ctx.meta.get_or_insert_with(|| ContextMeta {
                created_at: now,
                updated_at: now,
                source: source.to_string(),
                history: Vec::new(),
            });
            meta.updated_at = now;
            meta.history.push(HistoryEntry {
                timestamp: now,
                source: source.to_string(),
                operation: ContextOperation::Update,
                changed_keys: changed_keys.clone(),
                previous_values,
                snapshot: ctx.data.clone(),
            });
            (self.view(ctx), changed_keys)
        };

        debug!(context_id = %id, source, changed = changed_keys.len(), "context updated");
        self.events.publish(
            events::CONTEXT_UPDATED,
            json!({
                "contextId": id,
                "source": source,
                "changedKeys": changed_keys,
                "timestamp": now,
            }),
        );
        Ok(updated)
    }

    /// Best-effort preflight check; a missing context is reported, not raised.
    pub fn validate_context(&self, id: &str, required_fields: &[&str]) -> ContextValidation {
        let contexts = self.contexts.read().unwrap_or_else(PoisonError::into_inner);
        match contexts.get(id) {
            None => ContextValidation {
                valid: false,
                missing_fields: required_fields.iter().map(|f| f.to_string()).collect(),
                reason: Some(format!("context not found: {id}")),
            },
            Some(ctx) => {
                let missing_fields: Vec<String> = required_fields
                    .iter()
                    .filter(|f| ctx.data.get(**f).map_or(true, Value::is_null))
                    .map(|f| f.to_string())
                    .collect();
                ContextValidation {
                    valid: missing_fields.is_empty(),
                    missing_fields,
                    reason: None,
                }
            }
        }
    }

    pub fn delete_context(&self, id: &str) -> bool {
        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    /// Full audit trail of a context, oldest first. Returned even when the
    /// manager strips metadata from context copies.
    pub fn context_history(&self, id: &str) -> Result<Vec<HistoryEntry>, ContextError> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|ctx| ctx.history().to_vec())
            .ok_or_else(|| ContextError::ContextNotFound(id.to_string()))
    }

    /// History entries that touched `key`.
    pub fn history_for_key(&self, id: &str, key: &str) -> Result<Vec<HistoryEntry>, ContextError> {
        Ok(self
            .context_history(id)?
            .into_iter()
            .filter(|e| e.changed_keys.iter().any(|k| k == key))
            .collect())
    }

    pub fn clear_all_contexts(&self) {
        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn context_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.contexts.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn system_state(&self) -> SystemState {
        self.system_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merges `partial` into system state, one level deep for object values.
    pub fn update_system_state(&self, partial: SystemState, source: &str) -> SystemState {
        let keys: Vec<String> = partial.keys().cloned().collect();
        let state = {
            let mut state = self.system_state.write().unwrap_or_else(PoisonError::into_inner);
            merge_one_level(&mut state, partial);
            state.clone()
        };
        self.events.publish(
            events::SYSTEM_STATE_UPDATED,
            json!({ "keys": keys, "source": source, "timestamp": Utc::now() }),
        );
        state
    }
}

/// Object values are merged key by key; anything else overwrites.
pub(crate) fn merge_one_level(target: &mut Map<String, Value>, partial: Map<String, Value>) {
    for (key, value) in partial {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                existing.extend(incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(include_metadata: bool) -> ContextManager {
        ContextManager::new(
            ContextManagerConfig { include_metadata },
            Arc::new(EventBus::default()),
        )
    }

    fn map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    #[test]
    fn missing_context_is_an_error() {
        let m = manager(true);
        assert_eq!(
            m.get_context("nope").unwrap_err(),
            ContextError::ContextNotFound("nope".into())
        );
        assert!(m.update_context("nope", Map::new(), "t").is_err());
    }

    #[test]
    fn create_if_missing_keeps_requested_id() {
        let m = manager(true);
        let ctx = m
            .get_context_with("ctx-1", GetContextOptions::create_if_missing(map(json!({"a": 1}))))
            .unwrap();
        assert_eq!(ctx.id, "ctx-1");
        assert_eq!(ctx.get("a"), Some(&json!(1)));
        assert_eq!(ctx.history().len(), 1);
    }

    #[test]
    fn metadata_is_stripped_when_disabled() {
        let m = manager(false);
        let id = m.create_context(map(json!({"a": 1})), "test");
        assert!(m.get_context(&id).unwrap().meta.is_none());
        assert_eq!(m.context_history(&id).unwrap().len(), 1);
    }

    #[test]
    fn validate_reports_missing_fields_without_failing() {
        let m = manager(true);
        let id = m.create_context(map(json!({"a": 1, "b": null})), "test");
        let v = m.validate_context(&id, &["a", "b", "c"]);
        assert!(!v.valid);
        assert_eq!(v.missing_fields, vec!["b", "c"]);

        let gone = m.validate_context("missing", &["a"]);
        assert!(!gone.valid);
        assert!(gone.reason.is_some());
    }

    #[test]
    fn system_state_merges_one_level() {
        let m = manager(true);
        m.update_system_state(
            map(json!({"components": {"db": "online"}, "mode": "normal"})),
            "test",
        );
        let state = m.update_system_state(
            map(json!({"components": {"cache": "offline"}, "mode": "degraded"})),
            "test",
        );
        assert_eq!(
            state["components"],
            json!({"db": "online", "cache": "offline"})
        );
        assert_eq!(state["mode"], json!("degraded"));
    }

    #[test]
    fn delete_and_clear() {
        let m = manager(true);
        let a = m.create_context(Map::new(), "t");
        m.create_context(Map::new(), "t");
        assert_eq!(m.len(), 2);
        assert!(m.delete_context(&a));
        assert!(!m.delete_context(&a));
        m.clear_all_contexts();
        assert!(m.is_empty());
    }
}
