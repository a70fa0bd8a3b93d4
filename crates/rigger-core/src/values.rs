//! Configuration values: YAML documents and `key=value` overrides merged
//! into one JSON tree

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::reconcile::{BoxError, ValueMerger};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// An empty or comment-only document yields empty values rather than `null`.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let blank = yaml
            .lines()
            .map(str::trim)
            .all(|line| line.is_empty() || line.starts_with('#') || line == "---");
        if blank {
            return Ok(Self::new());
        }

        let value: JsonValue = serde_yaml::from_str(yaml)?;
        match value {
            JsonValue::Null => Ok(Self::new()),
            JsonValue::Object(_) => Ok(Self(value)),
            other => Err(CoreError::ValuesMerge {
                message: format!("values document must be a mapping, got {}", type_name(&other)),
            }),
        }
    }

    /// Overlay `overlay` onto these values. Mappings merge key by key;
    /// anything else, lists included, is replaced wholesale.
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Set a value at a path, creating intermediate objects.
    ///
    /// Fails when a path segment runs through an existing non-object value.
    pub fn set<S: AsRef<str>>(&mut self, path: &[S], value: JsonValue) -> Result<()> {
        if !self.0.is_object() {
            self.0 = JsonValue::Object(serde_json::Map::new());
        }
        set_nested(&mut self.0, path, value)
    }

    /// Look up `a.b.c`
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        path.split('.')
            .try_fold(&self.0, |current, key| current.as_object()?.get(key))
    }

    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// The view a subchart gets of its parent's values: the block under
    /// `subchart_name` lifted to the root, with the parent's `global` kept.
    ///
    /// ```yaml
    /// # parent                 # scope_for_subchart("cache")
    /// global: {region: eu}     global: {region: eu}
    /// cache: {port: 7000}      port: 7000
    /// ```
    pub fn scope_for_subchart(&self, subchart_name: &str) -> Values {
        let parent = self.0.as_object();
        let mut scoped = parent
            .and_then(|p| p.get(subchart_name))
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();

        if let Some(global) = parent.and_then(|p| p.get("global")) {
            scoped.insert("global".to_string(), global.clone());
        }

        Values(JsonValue::Object(scoped))
    }

    /// Subchart defaults overlaid with the parent's scoped values
    pub fn for_subchart(
        subchart_defaults: &Values,
        parent: &Values,
        subchart_name: &str,
    ) -> Values {
        let mut result = subchart_defaults.clone();
        result.merge(&parent.scope_for_subchart(subchart_name));
        result
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "a mapping",
    }
}

/// Deep merge two JSON values
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn set_nested<S: AsRef<str>>(
    value: &mut JsonValue,
    path: &[S],
    new_value: JsonValue,
) -> Result<()> {
    let Some((key, remaining)) = path.split_first() else {
        *value = new_value;
        return Ok(());
    };
    let key = key.as_ref();

    let map = match value {
        JsonValue::Object(map) => map,
        other => {
            return Err(CoreError::ValuesMerge {
                message: format!(
                    "cannot set '{}': its parent is already {}",
                    key,
                    type_name(other)
                ),
            });
        }
    };

    if remaining.is_empty() {
        map.insert(key.to_string(), new_value);
        return Ok(());
    }

    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
    set_nested(entry, remaining, new_value)
}

/// Split an override key on unescaped dots. `\.` yields a literal dot.
pub fn split_key(key: &str) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = key.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                current.push('.');
                chars.next();
            }
            '.' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    if segments.iter().any(|s| s.trim().is_empty()) {
        return Err(CoreError::ValuesMerge {
            message: format!("invalid key '{}': empty path segment", key),
        });
    }

    Ok(segments)
}

/// Parse `key=value` overrides into a nested tree.
///
/// Values stay literal strings. Empty entries are skipped and later entries
/// replace earlier ones at the same path.
pub fn parse_overrides<S: AsRef<str>>(overrides: &[S]) -> Result<Values> {
    let mut values = Values::new();

    for raw in overrides {
        let raw = raw.as_ref();
        if raw.is_empty() {
            continue;
        }

        let (key, val) = raw.split_once('=').ok_or_else(|| CoreError::ValuesMerge {
            message: format!("invalid override '{}': expected key=value", raw),
        })?;

        let path = split_key(key)?;
        values.set(&path, JsonValue::String(val.to_string()))?;
    }

    Ok(values)
}

/// Merges raw `key=value` overrides with [`parse_overrides`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SetValuesMerger;

impl ValueMerger for SetValuesMerger {
    fn merge(&self, raw_overrides: &[String]) -> std::result::Result<Values, BoxError> {
        Ok(parse_overrides(raw_overrides)?)
    }
}
