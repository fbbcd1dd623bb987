//! Run-scoped key/value state shared by every stage of a workflow run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Type-safe state key wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(String);

impl StateKey {
    /// Creates a new StateKey.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StateKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StateKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StateKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Returns `true` when a value carries no content.
///
/// `null`, blank strings and empty arrays/objects are empty; numbers and
/// booleans never are.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// The state store of one workflow run.
///
/// Values are arbitrary JSON so the whole store can be persisted as a flat
/// record. `set` always overwrites and there is no way to delete an entry:
/// keys only ever appear or change during a run.
///
/// # Examples
///
/// ```
/// use tsuzuri_core::WorkflowState;
/// use serde_json::json;
///
/// let mut state = WorkflowState::new();
/// state.set("topic", json!("rust"));
/// state.set("topic", json!("tokio"));
///
/// assert_eq!(state.get_str("topic"), Some("tokio"));
/// assert!(state.has("topic"));
/// assert!(!state.has("outline"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowState {
    entries: BTreeMap<StateKey, Value>,
}

impl WorkflowState {
    /// Creates a new empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, replacing any previous value for the key.
    pub fn set(&mut self, key: impl Into<StateKey>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Returns the value for the key, or `None` when absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns the value for the key when it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Returns `true` if the state contains a value for the key.
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns `true` if the key is present and its value is not blank.
    pub fn has_content(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !is_blank(v))
    }

    /// Returns an iterator over all keys in the state.
    pub fn keys(&self) -> impl Iterator<Item = &StateKey> {
        self.entries.keys()
    }

    /// Returns an iterator over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &Value)> {
        self.entries.iter()
    }

    /// Copies the given keys into a JSON object, skipping absent ones.
    pub fn project<'a>(&self, keys: impl IntoIterator<Item = &'a StateKey>) -> Map<String, Value> {
        keys.into_iter()
            .filter_map(|k| self.get(k.as_str()).map(|v| (k.to_string(), v.clone())))
            .collect()
    }

    /// Returns the number of entries in the state.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the state contains no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_overwrites() {
        let mut state = WorkflowState::new();
        state.set("draft", "first");
        state.set("draft", "second");

        assert_eq!(state.get_str("draft"), Some("second"));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_absent_key_is_not_an_error() {
        let state = WorkflowState::new();
        assert_eq!(state.get("missing"), None);
        assert!(!state.has("missing"));
        assert!(!state.has_content("missing"));
    }

    #[test]
    fn test_has_content() {
        let mut state = WorkflowState::new();
        state.set("blank", "   ");
        state.set("null", Value::Null);
        state.set("list", json!([]));
        state.set("zero", json!(0));
        state.set("text", "hello");

        assert!(state.has("blank"));
        assert!(!state.has_content("blank"));
        assert!(!state.has_content("null"));
        assert!(!state.has_content("list"));
        assert!(state.has_content("zero"));
        assert!(state.has_content("text"));
    }

    #[test]
    fn test_project_skips_absent_keys() {
        let mut state = WorkflowState::new();
        state.set("topic", "rust");

        let keys = [StateKey::new("topic"), StateKey::new("outline")];
        let projected = state.project(&keys);

        assert_eq!(projected.len(), 1);
        assert_eq!(projected.get("topic"), Some(&json!("rust")));
    }

    #[test]
    fn test_serializes_as_flat_record() {
        let mut state = WorkflowState::new();
        state.set("topic", "rust");
        state.set("count", json!(2));

        let value = serde_json::to_value(&state).expect("serialize");
        assert_eq!(value, json!({"count": 2, "topic": "rust"}));

        let restored: WorkflowState = serde_json::from_value(value).expect("deserialize");
        assert_eq!(restored, state);
    }

    #[test]
    fn test_state_key() {
        let key1 = StateKey::new("test");
        let key2: StateKey = "test".into();
        assert_eq!(key1, key2);
        assert_eq!(key1.to_string(), "test");
    }
}
