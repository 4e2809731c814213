//! Shared session state and instruction templating.
//!
//! State is the only hand-off channel between agents: an agent with an
//! output key writes its result here, and later agents read it through
//! `{key}` placeholders in their instruction templates.
//!
//! Writes never touch `State` directly during a run. Tools and agents
//! produce a [`StateDelta`], which the session service applies when the
//! carrying event is appended. Keys prefixed with `temp:` are visible for
//! the rest of the invocation but are never persisted.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Prefix for invocation-scoped keys that are never persisted.
pub const TEMP_PREFIX: &str = "temp:";

/// Key/value state attached to a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    values: Map<String, Value>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build state from a JSON object. Non-object values produce empty state.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(values) => Self { values },
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Get a value as text. Strings are returned verbatim, other values
    /// as compact JSON.
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.values.get(key).map(value_to_text)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Apply a delta in place.
    pub fn apply(&mut self, delta: &StateDelta) {
        for (key, value) in &delta.changes {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// A copy of this state without invocation-scoped (`temp:`) keys.
    pub fn persistent(&self) -> State {
        Self {
            values: self
                .values
                .iter()
                .filter(|(k, _)| !k.starts_with(TEMP_PREFIX))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Drop all `temp:` keys.
    pub fn clear_temp(&mut self) {
        self.values.retain(|k, _| !k.starts_with(TEMP_PREFIX));
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

/// Pending writes to session state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDelta {
    changes: Map<String, Value>,
}

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.changes.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.changes.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }

    /// Fold another delta into this one; later writes win.
    pub fn merge(&mut self, other: StateDelta) {
        self.changes.extend(other.changes);
    }

    /// This delta without `temp:` keys.
    pub fn persistent(&self) -> StateDelta {
        Self {
            changes: self
                .changes
                .iter()
                .filter(|(k, _)| !k.starts_with(TEMP_PREFIX))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// A `{key}` or `{key?}` reference found in an instruction template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub key: String,
    pub optional: bool,
}

/// A required placeholder had no value in state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingKey(pub String);

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Only identifier-like names are placeholders, so JSON examples such as
    // `{ "subject": ... }` inside an instruction are left alone.
    RE.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.:]*)(\?)?\}").expect("placeholder regex is valid")
    })
}

/// List the placeholders a template references, in order of appearance.
pub fn placeholders(template: &str) -> Vec<Placeholder> {
    placeholder_regex()
        .captures_iter(template)
        .map(|caps| Placeholder {
            key: caps[1].to_string(),
            optional: caps.get(2).is_some(),
        })
        .collect()
}

/// Resolve `{key}` placeholders against state.
///
/// Optional placeholders (`{key?}`) render as an empty string when the key
/// is absent; required ones fail with [`MissingKey`].
pub fn render(template: &str, state: &State) -> Result<String, MissingKey> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in placeholder_regex().captures_iter(template) {
        let whole = caps.get(0).expect("capture 0 always present");
        let key = &caps[1];
        let optional = caps.get(2).is_some();

        out.push_str(&template[last..whole.start()]);
        match state.get_text(key) {
            Some(text) => out.push_str(&text),
            None if optional => {}
            None => return Err(MissingKey(key.to_string())),
        }
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
