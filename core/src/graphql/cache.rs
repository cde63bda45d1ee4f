//! Normalized result cache with offset-pagination merge policies.
//!
//! # Design
//! Entries are keyed by field name plus the canonical JSON of the field's
//! declared key arguments (for example `filter`), so two calls that differ
//! only in `offset` or `limit` land in the same entry. Writing through a
//! [`FieldPolicy`] either appends (non-zero offset) or replaces.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::trace;

pub const DEFAULT_OFFSET_ARG: &str = "offset";

/// Identity of a cached list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub field: String,
    pub key_args: String,
}

/// How incoming results for a field are merged into the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPolicy {
    pub key_args: Vec<String>,
    pub offset_arg: String,
}

impl FieldPolicy {
    /// Offset pagination keyed by the given arguments.
    pub fn offset_pagination(key_args: &[&str]) -> Self {
        Self {
            key_args: key_args.iter().map(|a| a.to_string()).collect(),
            offset_arg: DEFAULT_OFFSET_ARG.to_string(),
        }
    }

    pub fn key(&self, field: &str, args: &Value) -> CacheKey {
        let mut selected = Map::new();
        for name in &self.key_args {
            if let Some(value) = args.get(name) {
                selected.insert(name.clone(), value.clone());
            }
        }
        CacheKey {
            field: field.to_string(),
            key_args: canonical_json(&Value::Object(selected)),
        }
    }

    /// True when the call carries an offset greater than zero.
    pub fn is_continuation(&self, args: &Value) -> bool {
        match args.get(&self.offset_arg) {
            Some(Value::Number(n)) => n.as_f64().is_some_and(|o| o > 0.0),
            Some(Value::String(s)) => s.trim().parse::<f64>().is_ok_and(|o| o > 0.0),
            _ => false,
        }
    }

    /// Append on continuation, otherwise replace. No de-duplication.
    pub fn merge(&self, existing: Option<Vec<Value>>, incoming: Vec<Value>, args: &Value) -> Vec<Value> {
        match existing {
            Some(mut items) if self.is_continuation(args) => {
                items.extend(incoming);
                items
            }
            _ => incoming,
        }
    }
}

/// Serialize with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::new();
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

/// In-process cache for paginated list fields.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    policies: HashMap<String, FieldPolicy>,
    entries: RwLock<HashMap<CacheKey, Vec<Value>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_policy(mut self, field: impl Into<String>, policy: FieldPolicy) -> Self {
        self.policies.insert(field.into(), policy);
        self
    }

    pub fn policy(&self, field: &str) -> Option<&FieldPolicy> {
        self.policies.get(field)
    }

    fn key_for(&self, field: &str, args: &Value) -> CacheKey {
        match self.policies.get(field) {
            Some(policy) => policy.key(field, args),
            None => FieldPolicy::offset_pagination(&[]).key(field, args),
        }
    }

    /// Merge `incoming` into the entry for `field`/`args` and return the
    /// merged list. Fields without a policy are stored as replacements.
    pub fn write(&self, field: &str, args: &Value, incoming: Vec<Value>) -> Vec<Value> {
        let fallback = FieldPolicy::offset_pagination(&[]);
        let policy = self.policies.get(field).unwrap_or(&fallback);
        let key = policy.key(field, args);

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let existing = entries.remove(&key);
        let appended = existing.is_some() && policy.is_continuation(args);
        let merged = policy.merge(existing, incoming, args);
        trace!(field, key = %key.key_args, appended, len = merged.len(), "cache write");
        entries.insert(key, merged.clone());
        merged
    }

    pub fn read(&self, field: &str, args: &Value) -> Option<Vec<Value>> {
        let key = self.key_for(field, args);
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&key).cloned()
    }

    pub fn evict(&self, field: &str, args: &Value) -> Option<Vec<Value>> {
        let key = self.key_for(field, args);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&key)
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
