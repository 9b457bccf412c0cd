//! Workflow context: the shared key-value store threaded through one run.
//!
//! `WorkflowContext` is a handle. Cloning it yields another handle onto the
//! same store, which is how a context is "passed by reference" into
//! concurrently running children. Use [`WorkflowContext::fork`] for an
//! independent copy.
//!
//! Concurrent writers inside one `Parallel` group must target disjoint keys.
//! The store itself is a concurrent map, so overlapping writes cannot corrupt
//! it, but the last writer wins and which one that is is unspecified.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::StepError;

/// Shared mutable state for one workflow execution.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    values: Arc<DashMap<String, Value>>,
    run_id: Uuid,
    cancel: CancellationToken,
}

impl Default for WorkflowContext {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowContext {
    /// Create an empty context for a new run.
    pub fn new() -> Self {
        Self {
            values: Arc::new(DashMap::new()),
            run_id: Uuid::now_v7(),
            cancel: CancellationToken::new(),
        }
    }

    /// Create a context pre-populated with `values`.
    pub fn with_values<K, I>(values: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let ctx = Self::new();
        ctx.merge(values);
        ctx
    }

    /// Identifier of the run this context belongs to.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    // -- accessors ----------------------------------------------------------

    /// Clone out the value under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.value().clone())
    }

    /// Clone out the value under `key`, failing if it is absent.
    pub fn require(&self, key: &str) -> Result<Value, StepError> {
        self.get(key)
            .ok_or_else(|| StepError::MissingContextKey(key.to_string()))
    }

    /// Deserialize the value under `key` into `T`.
    ///
    /// Fails on a missing key and on a value of the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, StepError> {
        let value = self.require(key)?;
        serde_json::from_value(value).map_err(|source| StepError::InvalidContextValue {
            key: key.to_string(),
            source,
        })
    }

    /// Like [`get_as`](Self::get_as), but returns `default` when the key is
    /// absent. A present value of the wrong shape is still an error.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, StepError> {
        if self.has(key) {
            self.get_as(key)
        } else {
            Ok(default)
        }
    }

    /// Read the value under `key` as display text (strings unquoted).
    pub fn get_text(&self, key: &str) -> Result<String, StepError> {
        self.require(key).map(|v| value_to_string(&v))
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Serialize `value` and store it under `key`.
    pub fn set_serialized<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<(), StepError> {
        let value = serde_json::to_value(value)?;
        self.values.insert(key.into(), value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.remove(key).map(|(_, v)| v)
    }

    /// Insert every pair from `values`, overwriting existing keys.
    pub fn merge<K, I>(&self, values: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        for (k, v) in values {
            self.values.insert(k.into(), v);
        }
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy the current contents into a JSON object.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Independent deep copy with a fresh run ID and cancellation token.
    pub fn fork(&self) -> Self {
        Self::with_values(self.snapshot())
    }

    // -- templates ----------------------------------------------------------

    /// Render `{{ key }}` placeholders from context values.
    ///
    /// A placeholder may index into an object or array value with dots
    /// (`{{ report.title }}`, `{{ items.0 }}`). Any placeholder that cannot be
    /// resolved fails with `MissingContextKey` naming the placeholder.
    pub fn render(&self, template: &str) -> Result<String, StepError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            out.push_str(&rest[..start]);
            let expr = rest[start + 2..start + 2 + len].trim();
            let value = self.lookup_path(expr)?;
            out.push_str(&value_to_string(&value));
            rest = &rest[start + 2 + len + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }

    fn lookup_path(&self, path: &str) -> Result<Value, StepError> {
        let missing = || StepError::MissingContextKey(path.to_string());
        let mut segments = path.split('.');
        let head = segments.next().filter(|s| !s.is_empty()).ok_or_else(missing)?;
        let mut current = self.get(head).ok_or_else(missing)?;

        for segment in segments {
            let next = match &current {
                Value::Object(map) => map.get(segment).cloned(),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
                _ => None,
            };
            current = next.ok_or_else(missing)?;
        }
        Ok(current)
    }

    // -- cancellation -------------------------------------------------------

    /// Request cooperative cancellation of the run.
    ///
    /// Steps already dispatched run to completion; nothing new is started.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token observed by composites at each dispatch point.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl From<Map<String, Value>> for WorkflowContext {
    fn from(map: Map<String, Value>) -> Self {
        Self::with_values(map)
    }
}

impl From<HashMap<String, Value>> for WorkflowContext {
    fn from(map: HashMap<String, Value>) -> Self {
        Self::with_values(map)
    }
}

impl<const N: usize> From<[(&str, Value); N]> for WorkflowContext {
    fn from(pairs: [(&str, Value); N]) -> Self {
        Self::with_values(pairs)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a JSON value to display text for prompts and templates.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // For objects/arrays, return compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
