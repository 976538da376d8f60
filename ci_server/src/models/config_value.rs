//! Tagged configuration values.
//!
//! Loosely typed JSON coming in at the edges (stage step inputs, external
//! material info) is captured as a [`ConfigValue`]. Patches address their
//! target with an RFC 6901 JSON pointer and are applied by an explicit walker.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::string_enum;

string_enum! {
    pub enum PatchOp {
        Add => "add",
        Replace => "replace",
        Remove => "remove",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ConfigValue {
    #[serde(rename = "STRING")]
    Stringly(String),
    #[serde(rename = "PATCH")]
    Patch {
        pointer: String,
        op: PatchOp,
        #[serde(default)]
        value: Value,
    },
    #[serde(rename = "OPAQUE")]
    Opaque(#[serde(with = "opaque_base64")] Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValueError {
    #[error("invalid json pointer '{0}'")]
    InvalidPointer(String),
    #[error("path '{0}' does not exist")]
    MissingPath(String),
    #[error("path '{0}' is not an object or array")]
    NotAContainer(String),
    #[error("invalid array index '{0}'")]
    InvalidIndex(String),
}

impl ConfigValue {
    /// Captures an arbitrary JSON value. Strings stay strings; everything
    /// else is kept as its compact serialization.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Stringly(s),
            other => Self::Stringly(other.to_string()),
        }
    }

    /// Compact textual form. Strings holding JSON are re-serialized without
    /// whitespace.
    pub fn compact(&self) -> String {
        match self {
            Self::Stringly(s) => serde_json::from_str::<Value>(s)
                .map(|v| v.to_string())
                .unwrap_or_else(|_| s.clone()),
            Self::Patch { value, .. } => value.to_string(),
            Self::Opaque(bytes) => STANDARD.encode(bytes),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigValueError> {
        if let Self::Patch { pointer, op, .. } = self {
            let tokens = parse_pointer(pointer)?;
            if tokens.is_empty() && *op == PatchOp::Remove {
                return Err(ConfigValueError::InvalidPointer(pointer.clone()));
            }
        }
        Ok(())
    }

    /// Applies this value to `doc`. Plain values replace `doc`; patches
    /// modify the addressed location.
    pub fn apply(&self, doc: &mut Value) -> Result<(), ConfigValueError> {
        match self {
            Self::Stringly(s) => {
                *doc = Value::String(s.clone());
                Ok(())
            }
            Self::Opaque(bytes) => {
                *doc = Value::String(STANDARD.encode(bytes));
                Ok(())
            }
            Self::Patch { pointer, op, value } => {
                let tokens = parse_pointer(pointer)?;
                apply_patch(doc, pointer, &tokens, *op, value)
            }
        }
    }
}

fn parse_pointer(pointer: &str) -> Result<Vec<String>, ConfigValueError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(ConfigValueError::InvalidPointer(pointer.to_string()));
    };
    Ok(rest
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn array_index(token: &str, len: usize, allow_end: bool) -> Result<usize, ConfigValueError> {
    if allow_end && token == "-" {
        return Ok(len);
    }
    if token.len() > 1 && token.starts_with('0') {
        return Err(ConfigValueError::InvalidIndex(token.to_string()));
    }
    let idx: usize = token
        .parse()
        .map_err(|_| ConfigValueError::InvalidIndex(token.to_string()))?;
    let bound = if allow_end { len } else { len.saturating_sub(1) };
    if idx > bound || (!allow_end && len == 0) {
        return Err(ConfigValueError::InvalidIndex(token.to_string()));
    }
    Ok(idx)
}

fn step_mut<'a>(
    node: &'a mut Value,
    token: &str,
    pointer: &str,
) -> Result<&'a mut Value, ConfigValueError> {
    match node {
        Value::Object(map) => map
            .get_mut(token)
            .ok_or_else(|| ConfigValueError::MissingPath(pointer.to_string())),
        Value::Array(items) => {
            let idx = array_index(token, items.len(), false)?;
            items
                .get_mut(idx)
                .ok_or_else(|| ConfigValueError::MissingPath(pointer.to_string()))
        }
        _ => Err(ConfigValueError::NotAContainer(pointer.to_string())),
    }
}

fn apply_patch(
    doc: &mut Value,
    pointer: &str,
    tokens: &[String],
    op: PatchOp,
    value: &Value,
) -> Result<(), ConfigValueError> {
    let Some((last, parents)) = tokens.split_last() else {
        return match op {
            PatchOp::Remove => Err(ConfigValueError::InvalidPointer(pointer.to_string())),
            PatchOp::Add | PatchOp::Replace => {
                *doc = value.clone();
                Ok(())
            }
        };
    };

    let mut node = doc;
    for token in parents {
        node = step_mut(node, token, pointer)?;
    }

    match node {
        Value::Object(map) => patch_object(map, last, pointer, op, value),
        Value::Array(items) => match op {
            PatchOp::Add => {
                let idx = array_index(last, items.len(), true)?;
                items.insert(idx, value.clone());
                Ok(())
            }
            PatchOp::Replace => {
                let idx = array_index(last, items.len(), false)?;
                items[idx] = value.clone();
                Ok(())
            }
            PatchOp::Remove => {
                let idx = array_index(last, items.len(), false)?;
                items.remove(idx);
                Ok(())
            }
        },
        _ => Err(ConfigValueError::NotAContainer(pointer.to_string())),
    }
}

fn patch_object(
    map: &mut Map<String, Value>,
    key: &str,
    pointer: &str,
    op: PatchOp,
    value: &Value,
) -> Result<(), ConfigValueError> {
    match op {
        PatchOp::Add => {
            map.insert(key.to_string(), value.clone());
            Ok(())
        }
        PatchOp::Replace => match map.get_mut(key) {
            Some(slot) => {
                *slot = value.clone();
                Ok(())
            }
            None => Err(ConfigValueError::MissingPath(pointer.to_string())),
        },
        PatchOp::Remove => map
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ConfigValueError::MissingPath(pointer.to_string())),
    }
}

mod opaque_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(pointer: &str, op: PatchOp, value: Value) -> ConfigValue {
        ConfigValue::Patch {
            pointer: pointer.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn add_creates_nested_key() {
        let mut doc = json!({"env": {"A": "1"}});
        patch("/env/B", PatchOp::Add, json!("2"))
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc, json!({"env": {"A": "1", "B": "2"}}));
    }

    #[test]
    fn replace_requires_existing_key() {
        let mut doc = json!({"env": {}});
        let err = patch("/env/B", PatchOp::Replace, json!("2"))
            .apply(&mut doc)
            .unwrap_err();
        assert_eq!(err, ConfigValueError::MissingPath("/env/B".into()));
    }

    #[test]
    fn array_append_and_remove() {
        let mut doc = json!({"args": ["a", "b"]});
        patch("/args/-", PatchOp::Add, json!("c"))
            .apply(&mut doc)
            .unwrap();
        patch("/args/0", PatchOp::Remove, Value::Null)
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc, json!({"args": ["b", "c"]}));
    }

    #[test]
    fn escaped_tokens_are_decoded() {
        let mut doc = json!({"a/b": {"m~n": 1}});
        patch("/a~1b/m~0n", PatchOp::Replace, json!(2))
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc, json!({"a/b": {"m~n": 2}}));
    }

    #[test]
    fn pointer_must_start_with_slash() {
        let value = patch("env/A", PatchOp::Add, json!(1));
        assert!(matches!(
            value.validate(),
            Err(ConfigValueError::InvalidPointer(_))
        ));
    }

    #[test]
    fn leading_zero_index_is_rejected() {
        let mut doc = json!({"args": ["a", "b"]});
        let err = patch("/args/01", PatchOp::Replace, json!("x"))
            .apply(&mut doc)
            .unwrap_err();
        assert_eq!(err, ConfigValueError::InvalidIndex("01".into()));
    }

    #[test]
    fn compact_strips_whitespace_from_embedded_json() {
        let value = ConfigValue::from_json(json!("{ \"commit\" : \"abc\" }"));
        assert_eq!(value.compact(), r#"{"commit":"abc"}"#);
        let value = ConfigValue::from_json(json!({"commit": "abc"}));
        assert_eq!(value.compact(), r#"{"commit":"abc"}"#);
    }

    #[test]
    fn opaque_serializes_as_base64() {
        let value = ConfigValue::Opaque(b"hi".to_vec());
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, r#"{"type":"OPAQUE","value":"aGk="}"#);
        let back: ConfigValue = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }
}
