//! Workflow status events emitted by the executor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CI_WORKFLOW_NAME;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatusEvent {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeStatus>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    #[serde(default)]
    pub template_name: String,
    #[serde(default, rename = "boundaryID", alias = "boundaryId")]
    pub boundary_id: String,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub outputs: Option<NodeOutputs>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeOutputs {
    #[serde(default)]
    pub artifacts: Vec<OutputArtifact>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputArtifact {
    #[serde(default)]
    pub s3: Option<ArtifactKey>,
    #[serde(default)]
    pub gcs: Option<ArtifactKey>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactKey {
    #[serde(default)]
    pub key: String,
}

/// What the reconciler needs from the CI node of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiNodeStatus {
    pub run_name: String,
    pub pod_name: String,
    pub pod_phase: String,
    pub message: String,
    pub log_location: Option<String>,
}

impl CiNodeStatus {
    /// Integer prefix of the run name up to the first `-`.
    pub fn run_id(&self) -> Option<i64> {
        self.run_name.split('-').next()?.parse().ok()
    }
}

impl WorkflowStatusEvent {
    /// The first node, in key order, running the CI template.
    pub fn ci_node(&self) -> Option<CiNodeStatus> {
        let (key, node) = self
            .nodes
            .iter()
            .find(|(_, node)| node.template_name == CI_WORKFLOW_NAME)?;

        let run_name = if node.boundary_id.is_empty() {
            key.clone()
        } else {
            node.boundary_id.clone()
        };

        let log_location = node
            .outputs
            .as_ref()
            .and_then(|o| o.artifacts.first())
            .and_then(|a| a.s3.as_ref().or(a.gcs.as_ref()))
            .map(|k| k.key.clone());

        Some(CiNodeStatus {
            run_name,
            pod_name: key.clone(),
            pod_phase: node.phase.clone(),
            message: node.message.clone(),
            log_location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: serde_json::Value) -> WorkflowStatusEvent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn extracts_ci_node_and_log_location() {
        let ev = event(serde_json::json!({
            "phase": "Failed",
            "finishedAt": "2026-01-02T03:04:05Z",
            "nodes": {
                "42-wf-0": {
                    "templateName": "ci",
                    "boundaryID": "42-wf",
                    "phase": "Failed",
                    "message": "exit 137",
                    "outputs": {"artifacts": [{"s3": {"key": "logs/42/main.log"}}]}
                },
                "42-wf-1": {"templateName": "cleanup", "phase": "Succeeded"}
            }
        }));
        let node = ev.ci_node().unwrap();
        assert_eq!(node.run_name, "42-wf");
        assert_eq!(node.pod_name, "42-wf-0");
        assert_eq!(node.pod_phase, "Failed");
        assert_eq!(node.log_location.as_deref(), Some("logs/42/main.log"));
        assert_eq!(node.run_id(), Some(42));
        assert!(ev.finished_at.is_some());
    }

    #[test]
    fn falls_back_to_gcs_and_node_key() {
        let ev = event(serde_json::json!({
            "phase": "Running",
            "nodes": {
                "7-abc": {
                    "templateName": "ci",
                    "phase": "Running",
                    "outputs": {"artifacts": [{"gcs": {"key": "gs/7.log"}}]}
                }
            }
        }));
        let node = ev.ci_node().unwrap();
        assert_eq!(node.run_name, "7-abc");
        assert_eq!(node.log_location.as_deref(), Some("gs/7.log"));
    }

    #[test]
    fn missing_ci_node_yields_none() {
        let ev = event(serde_json::json!({
            "phase": "Running",
            "nodes": {"x": {"templateName": "deploy"}}
        }));
        assert!(ev.ci_node().is_none());
    }

    #[test]
    fn non_numeric_run_name_has_no_id() {
        let node = CiNodeStatus {
            run_name: "build-42".into(),
            pod_name: String::new(),
            pod_phase: String::new(),
            message: String::new(),
            log_location: None,
        };
        assert_eq!(node.run_id(), None);
    }
}
