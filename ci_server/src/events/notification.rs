//! Notification events written to the notification bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::string_enum;

string_enum! {
    pub enum NotificationKind {
        Success => "SUCCESS",
        Fail => "FAIL",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub pipeline_type: String,
    pub pipeline_id: i64,
    pub app_id: i64,
    pub run_id: Option<i64>,
    pub user_id: i64,
    pub artifact_id: Option<i64>,
    /// Commits the build was triggered from, as reported by the run or the
    /// external CI payload.
    pub trigger_materials: Value,
    pub event_time: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn ci(kind: NotificationKind, pipeline_id: i64, app_id: i64, user_id: i64) -> Self {
        Self {
            kind,
            pipeline_type: "CI".to_string(),
            pipeline_id,
            app_id,
            run_id: None,
            user_id,
            artifact_id: None,
            trigger_materials: Value::Null,
            event_time: Utc::now(),
        }
    }

    pub fn with_run(mut self, run_id: i64) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_artifact(mut self, artifact_id: i64) -> Self {
        self.artifact_id = Some(artifact_id);
        self
    }

    pub fn with_materials(mut self, materials: Value) -> Self {
        self.trigger_materials = materials;
        self
    }
}
