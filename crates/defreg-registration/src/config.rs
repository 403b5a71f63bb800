//! Nested JSON parameter tree with per-key descriptions.
//!
//! Values live in one JSON object and descriptions in a parallel object of
//! the same shape. Keys are addressed with dotted paths such as
//! `"optimizer.multi_scale.scale_factors"`.

use std::fs;
use std::path::Path;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use defreg_core::{RegistrationError, Result};

/// Configuration tree with defaults recorded on first access.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTree {
    values: Value,
    comments: Value,
}

impl Default for ParameterTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterTree {
    pub fn new() -> Self {
        Self {
            values: Value::Object(Map::new()),
            comments: Value::Object(Map::new()),
        }
    }

    /// Parse a JSON object.
    ///
    /// # Errors
    /// `Serialization` for malformed JSON, `InvalidConfiguration` if the
    /// document is not an object.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let values: Value = serde_json::from_str(text)?;
        if !values.is_object() {
            return Err(RegistrationError::invalid_configuration(
                "configuration root must be a JSON object",
            ));
        }
        Ok(Self {
            values,
            comments: Value::Object(Map::new()),
        })
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.values)?)
    }

    /// Write the values (no descriptions).
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path.as_ref(), self.to_json_string()?)?;
        Ok(())
    }

    /// Write the descriptions tree (same shape as the values).
    pub fn write_json_comments(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path.as_ref(), serde_json::to_string_pretty(&self.comments)?)?;
        Ok(())
    }

    pub fn values(&self) -> &Value {
        &self.values
    }

    pub fn comments(&self) -> &Value {
        &self.comments
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.values, |node, key| node.as_object()?.get(key))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn description(&self, path: &str) -> Option<&str> {
        path.split('.')
            .try_fold(&self.comments, |node, key| node.as_object()?.get(key))?
            .as_str()
    }

    /// Store `value` at `path`, creating intermediate objects.
    ///
    /// # Errors
    /// `InvalidConfiguration` if a path prefix already holds a non-object.
    pub fn set<T: Serialize>(&mut self, path: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        insert(&mut self.values, path, value)
    }

    /// Typed read with a default; the first access wins.
    ///
    /// An existing value is returned as is; otherwise `default` is stored. The
    /// description, followed by the default, is recorded in the comments tree
    /// on first access.
    ///
    /// # Errors
    /// `Serialization` if the stored value has the wrong type.
    pub fn value_or<T>(&mut self, path: &str, default: T, description: &str) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        if self.description(path).is_none() {
            let comment = format!("{description} (default: {})", serde_json::to_string(&default)?);
            insert(&mut self.comments, path, Value::String(comment))?;
        }
        match self.get(path) {
            Some(existing) => Ok(serde_json::from_value(existing.clone())?),
            None => {
                self.set(path, &default)?;
                Ok(default)
            }
        }
    }

    /// Copy of the tree rooted at `key` (empty if absent).
    pub fn subtree(&self, key: &str) -> ParameterTree {
        let pick = |root: &Value| {
            key.split('.')
                .try_fold(root, |node, k| node.as_object()?.get(k))
                .filter(|v| v.is_object())
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()))
        };
        Self {
            values: pick(&self.values),
            comments: pick(&self.comments),
        }
    }

    /// Overlay `other` onto this tree; values from `other` win.
    pub fn merge(&mut self, other: &ParameterTree) {
        merge_values(&mut self.values, &other.values);
        merge_values(&mut self.comments, &other.comments);
    }
}

fn insert(root: &mut Value, path: &str, value: Value) -> Result<()> {
    let keys: Vec<&str> = path.split('.').collect();
    let (last, parents) = keys
        .split_last()
        .ok_or_else(|| RegistrationError::invalid_configuration("empty configuration path"))?;

    let mut node = root;
    for key in parents {
        let map = node.as_object_mut().ok_or_else(|| {
            RegistrationError::invalid_configuration(format!("'{path}': '{key}' is not a group"))
        })?;
        node = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let map = node.as_object_mut().ok_or_else(|| {
        RegistrationError::invalid_configuration(format!("'{path}': parent is not a group"))
    })?;
    map.insert(last.to_string(), value);
    Ok(())
}

fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let nested = value.is_object() && base.get(key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = base.get_mut(key) {
                        merge_values(existing, value);
                    }
                } else {
                    base.insert(key.clone(), value.clone());
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
