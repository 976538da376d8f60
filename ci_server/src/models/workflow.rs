//! Workflow graph edges.

use serde::{Deserialize, Serialize};

use super::string_enum;

string_enum! {
    pub enum NodeKind {
        CiPipeline => "CI_PIPELINE",
        Webhook => "WEBHOOK",
        CdPipeline => "CD_PIPELINE",
    }
}

impl NodeKind {
    /// CI and external CI nodes are the only valid workflow roots.
    pub fn is_source(&self) -> bool {
        matches!(self, Self::CiPipeline | Self::Webhook)
    }
}

/// Parent→child edge. Root mappings have `parent_id == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNodeMapping {
    pub id: i64,
    pub workflow_id: i64,
    pub parent_id: i64,
    pub parent_kind: Option<NodeKind>,
    pub child_id: i64,
    pub child_kind: NodeKind,
    pub active: bool,
}

impl WorkflowNodeMapping {
    pub fn root(workflow_id: i64, child_id: i64, child_kind: NodeKind) -> Self {
        Self {
            id: 0,
            workflow_id,
            parent_id: 0,
            parent_kind: None,
            child_id,
            child_kind,
            active: true,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == 0
    }

    pub fn parent(&self) -> Option<(i64, NodeKind)> {
        self.parent_kind.map(|kind| (self.parent_id, kind))
    }

    pub fn child(&self) -> (i64, NodeKind) {
        (self.child_id, self.child_kind)
    }
}
