//! Artifacts: immutable build outputs consumed by CD.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Data source recorded when a webhook payload names none.
pub const DATA_SOURCE_WEBHOOK: &str = "WEBHOOK";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: i64,
    pub image: String,
    pub image_digest: String,
    /// Compacted JSON describing the commits the image was built from.
    pub material_info: String,
    pub data_source: String,
    pub pipeline_id: i64,
    pub workflow_run_id: Option<i64>,
    pub parent_artifact_id: Option<i64>,
    pub external_ci_id: Option<i64>,
    pub scan_enabled: bool,
    pub scanned: bool,
    pub is_artifact_uploaded: bool,
    pub created_by: i64,
    pub created_on: DateTime<Utc>,
}

impl Artifact {
    /// Copy of a parent artifact attributed to a linked child pipeline. The
    /// copy is unscanned regardless of the parent.
    pub fn for_child(&self, child_pipeline_id: i64, child_scan_enabled: bool) -> Self {
        Self {
            id: 0,
            pipeline_id: child_pipeline_id,
            parent_artifact_id: Some(self.id),
            scan_enabled: child_scan_enabled,
            scanned: false,
            ..self.clone()
        }
    }
}
