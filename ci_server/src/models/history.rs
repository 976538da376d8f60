//! Pipeline configuration history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::string_enum;

string_enum! {
    pub enum HistoryTrigger {
        Create => "CREATE",
        Update => "UPDATE",
        Delete => "DELETE",
    }
}

/// Snapshot of a pipeline, its materials and stages at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineHistory {
    pub id: i64,
    pub ci_pipeline_id: i64,
    pub trigger: HistoryTrigger,
    pub snapshot: serde_json::Value,
    pub created_by: i64,
    pub created_on: DateTime<Utc>,
}
