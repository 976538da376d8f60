//! Pre and post build stages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::string_enum;
use super::ConfigValue;

string_enum! {
    pub enum StageType {
        PreCi => "PRE_CI",
        PostCi => "POST_CI",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStep {
    pub name: String,
    pub index: i32,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, ConfigValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStage {
    pub id: i64,
    pub ci_pipeline_id: i64,
    pub stage_type: StageType,
    pub steps: Vec<StageStep>,
    pub active: bool,
}

impl StageStep {
    /// Folds the step inputs into one JSON object. Plain inputs become
    /// string variables; patches edit the document built so far.
    pub fn resolve_inputs(&self) -> Result<serde_json::Value, super::config_value::ConfigValueError> {
        let mut doc = serde_json::Value::Object(serde_json::Map::new());
        for (name, input) in &self.inputs {
            match input {
                ConfigValue::Patch { .. } => input.apply(&mut doc)?,
                plain => {
                    let mut slot = serde_json::Value::Null;
                    plain.apply(&mut slot)?;
                    if let serde_json::Value::Object(map) = &mut doc {
                        map.insert(name.clone(), slot);
                    }
                }
            }
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PatchOp;
    use serde_json::json;

    #[test]
    fn inputs_resolve_in_key_order() {
        let mut inputs = BTreeMap::new();
        inputs.insert("A_TARGET".to_string(), ConfigValue::Stringly("x86".into()));
        inputs.insert(
            "B_PATCH".to_string(),
            ConfigValue::Patch {
                pointer: "/A_TARGET".into(),
                op: PatchOp::Replace,
                value: json!("arm64"),
            },
        );
        let step = StageStep {
            name: "build".into(),
            index: 1,
            script: None,
            inputs,
        };
        assert_eq!(step.resolve_inputs().unwrap(), json!({"A_TARGET": "arm64"}));
    }
}
