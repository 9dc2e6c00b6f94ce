//! Per-call context attached to every event a layer emits.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifies one logical call for observability.
///
/// The context never influences control flow; it only enriches the events
/// emitted by the retry executor, circuit breaker and batch processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallContext {
    /// Name of the operation (e.g., "llm.complete").
    pub operation: String,
    /// Unique id of this call.
    pub call_id: Uuid,
    /// Free-form attributes (workflow id, step name, model).
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new("operation")
    }
}

impl CallContext {
    /// Creates a context for the named operation.
    #[must_use]
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            call_id: Uuid::new_v4(),
            attributes: HashMap::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builds an event payload from this context plus event-specific fields.
    ///
    /// Fields in `extra` win over attributes with the same name.
    #[must_use]
    pub fn event_data(&self, extra: serde_json::Value) -> serde_json::Value {
        let mut payload = serde_json::Map::new();
        for (k, v) in &self.attributes {
            payload.insert(k.clone(), v.clone());
        }
        payload.insert("operation".to_string(), serde_json::json!(self.operation));
        payload.insert("call_id".to_string(), serde_json::json!(self.call_id.to_string()));

        if let serde_json::Value::Object(fields) = extra {
            payload.extend(fields);
        }

        serde_json::Value::Object(payload)
    }
}
