// ============================================================================
// Document Patching
// ============================================================================

use crate::core::{DbError, JsonDocument, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchCommandType {
    Set,
    Unset,
    Inc,
    Add,
    Remove,
    Rename,
}

/// One structured change to a top-level property of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatchRequest {
    #[serde(rename = "Type")]
    pub command: PatchCommandType,
    pub name: String,
    #[serde(default)]
    pub value: JsonValue,
    /// When present the property must currently hold exactly this value
    #[serde(default, rename = "PrevVal", skip_serializing_if = "Option::is_none")]
    pub prev_val: Option<JsonValue>,
}

impl PatchRequest {
    pub fn new(command: PatchCommandType, name: impl Into<String>, value: JsonValue) -> Self {
        Self {
            command,
            name: name.into(),
            value,
            prev_val: None,
        }
    }

    pub fn set(name: impl Into<String>, value: JsonValue) -> Self {
        Self::new(PatchCommandType::Set, name, value)
    }

    pub fn unset(name: impl Into<String>) -> Self {
        Self::new(PatchCommandType::Unset, name, JsonValue::Null)
    }

    pub fn inc(name: impl Into<String>, by: JsonValue) -> Self {
        Self::new(PatchCommandType::Inc, name, by)
    }

    pub fn add(name: impl Into<String>, item: JsonValue) -> Self {
        Self::new(PatchCommandType::Add, name, item)
    }

    pub fn remove(name: impl Into<String>, item: JsonValue) -> Self {
        Self::new(PatchCommandType::Remove, name, item)
    }

    pub fn rename(name: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(PatchCommandType::Rename, name, JsonValue::String(to.into()))
    }

    pub fn with_prev_val(mut self, prev_val: JsonValue) -> Self {
        self.prev_val = Some(prev_val);
        self
    }
}

/// A patch expressed as a script run by a `ScriptedPatcher`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScriptedPatchRequest {
    pub script: String,
    #[serde(default)]
    pub values: BTreeMap<String, JsonValue>,
}

impl ScriptedPatchRequest {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn value(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchResult {
    DocumentDoesNotExists,
    Patched,
    NotModified,
}

/// New document body produced by a script, plus its output lines
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedPatchOutcome {
    pub data: JsonValue,
    pub debug: Vec<String>,
}

/// Runs scripted patches. The scripting runtime is supplied by the host.
pub trait ScriptedPatcher: Send + Sync {
    fn patch(&self, document: &JsonDocument, request: &ScriptedPatchRequest) -> Result<ScriptedPatchOutcome>;
}

/// Apply `patches` in order to `data`. Returns whether anything changed.
pub fn apply_patches(key: &str, data: &mut JsonValue, patches: &[PatchRequest]) -> Result<bool> {
    let JsonValue::Object(object) = data else {
        return Err(DbError::InvalidArgument(format!(
            "Document '{}' is not a JSON object and cannot be patched",
            key
        )));
    };

    let mut modified = false;
    for patch in patches {
        if let Some(expected) = &patch.prev_val {
            let current = object.get(&patch.name).unwrap_or(&JsonValue::Null);
            if current != expected {
                return Err(DbError::Concurrency(format!(
                    "Cannot patch property '{}' of document '{}': previous value does not match",
                    patch.name, key
                )));
            }
        }
        modified |= apply_one(key, object, patch)?;
    }
    Ok(modified)
}

fn apply_one(key: &str, object: &mut Map<String, JsonValue>, patch: &PatchRequest) -> Result<bool> {
    let name = patch.name.as_str();
    match patch.command {
        PatchCommandType::Set => {
            let previous = object.insert(name.to_string(), patch.value.clone());
            Ok(previous.as_ref() != Some(&patch.value))
        }
        PatchCommandType::Unset => Ok(object.remove(name).is_some()),
        PatchCommandType::Inc => {
            let incremented = match object.get(name) {
                None | Some(JsonValue::Null) => patch.value.clone(),
                Some(current) => add_numbers(key, name, current, &patch.value)?,
            };
            object.insert(name.to_string(), incremented);
            Ok(true)
        }
        PatchCommandType::Add => {
            let entry = object
                .entry(name.to_string())
                .or_insert_with(|| JsonValue::Array(Vec::new()));
            let JsonValue::Array(items) = entry else {
                return Err(not_an_array(key, name));
            };
            items.push(patch.value.clone());
            Ok(true)
        }
        PatchCommandType::Remove => {
            let Some(entry) = object.get_mut(name) else {
                return Ok(false);
            };
            let JsonValue::Array(items) = entry else {
                return Err(not_an_array(key, name));
            };
            let before = items.len();
            items.retain(|item| item != &patch.value);
            Ok(items.len() != before)
        }
        PatchCommandType::Rename => {
            let Some(target) = patch.value.as_str() else {
                return Err(DbError::InvalidArgument(format!(
                    "Rename of '{}' needs a string target name",
                    name
                )));
            };
            match object.remove(name) {
                Some(value) => {
                    object.insert(target.to_string(), value);
                    Ok(target != name)
                }
                None => Ok(false),
            }
        }
    }
}

fn add_numbers(key: &str, name: &str, current: &JsonValue, by: &JsonValue) -> Result<JsonValue> {
    if let (Some(a), Some(b)) = (current.as_i64(), by.as_i64()) {
        return a.checked_add(b).map(JsonValue::from).ok_or_else(|| {
            DbError::InvalidArgument(format!(
                "Incrementing property '{}' of document '{}' by {} overflows",
                name, key, b
            ))
        });
    }
    let (Some(a), Some(b)) = (current.as_f64(), by.as_f64()) else {
        return Err(DbError::InvalidArgument(format!(
            "Cannot increment non numeric property '{}' of document '{}'",
            name, key
        )));
    };
    serde_json::Number::from_f64(a + b)
        .map(JsonValue::Number)
        .ok_or_else(|| {
            DbError::InvalidArgument(format!(
                "Incrementing property '{}' of document '{}' is not a finite number",
                name, key
            ))
        })
}

fn not_an_array(key: &str, name: &str) -> DbError {
    DbError::InvalidArgument(format!(
        "Property '{}' of document '{}' is not an array",
        name, key
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_patch_commands() {
        let mut doc = json!({"Name": "Oren", "Age": 30, "Tags": ["a", "b"], "Old": 1});

        let modified = apply_patches(
            "users/1",
            &mut doc,
            &[
                PatchRequest::set("Name", json!("Ayende")),
                PatchRequest::inc("Age", json!(2)),
                PatchRequest::add("Tags", json!("c")),
                PatchRequest::remove("Tags", json!("a")),
                PatchRequest::rename("Old", "New"),
                PatchRequest::unset("Missing"),
            ],
        )
        .unwrap();

        assert!(modified);
        assert_eq!(
            doc,
            json!({"Name": "Ayende", "Age": 32, "Tags": ["b", "c"], "New": 1})
        );
    }

    #[test]
    fn test_noop_patch_is_not_modified() {
        let mut doc = json!({"Name": "Oren"});
        let modified = apply_patches(
            "users/1",
            &mut doc,
            &[PatchRequest::set("Name", json!("Oren")), PatchRequest::unset("Nope")],
        )
        .unwrap();
        assert!(!modified);
    }

    #[test]
    fn test_prev_val_mismatch_is_conflict() {
        let mut doc = json!({"Name": "Oren"});
        let err = apply_patches(
            "users/1",
            &mut doc,
            &[PatchRequest::set("Name", json!("x")).with_prev_val(json!("Other"))],
        )
        .unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert_eq!(doc, json!({"Name": "Oren"}));
    }

    #[test]
    fn test_inc_on_text_fails() {
        let mut doc = json!({"Name": "Oren"});
        let err = apply_patches("users/1", &mut doc, &[PatchRequest::inc("Name", json!(1))]).unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        assert!(err.to_string().contains("non numeric"));
    }

    #[test]
    fn test_inc_overflow_is_reported() {
        let mut doc = json!({"Count": i64::MAX});
        let err = apply_patches("users/1", &mut doc, &[PatchRequest::inc("Count", json!(1))]).unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        assert!(err.to_string().contains("overflows"));
        assert!(!err.to_string().contains("non numeric"));
        assert_eq!(doc["Count"], json!(i64::MAX));
    }

    #[test]
    fn test_patch_request_wire_format() {
        let request: PatchRequest =
            serde_json::from_value(json!({"Type": "Set", "Name": "Subject", "Value": "hi"})).unwrap();
        assert_eq!(request, PatchRequest::set("Subject", json!("hi")));
        assert_eq!(serde_json::to_value(PatchResult::Patched).unwrap(), json!("Patched"));
    }
}
