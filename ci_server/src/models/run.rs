//! Workflow runs: one execution of a CI pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::string_enum;

/// Terminal statuses. Compared case-insensitively; executors report
/// `Failed` where the engine writes `FAILED`.
pub const TERMINAL_STATUSES: [&str; 5] = ["SUCCEEDED", "FAILED", "ERROR", "CANCELLED", "TIMEOUT"];

pub const STATUS_SUCCEEDED: &str = "SUCCEEDED";
pub const STATUS_CANCELLED: &str = "CANCELLED";
pub const STATUS_FAILED: &str = "FAILED";
pub const POD_STATUS_FAILED: &str = "FAILED";
pub const MESSAGE_TERMINATED: &str = "terminated";

pub fn is_terminal(status: &str) -> bool {
    TERMINAL_STATUSES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(status))
}

pub fn is_cancelled(status: &str) -> bool {
    status.eq_ignore_ascii_case(STATUS_CANCELLED)
}

/// Statuses that ask for re-trigger detection.
pub fn is_failure(status: &str) -> bool {
    status.eq_ignore_ascii_case("FAILED") || status.eq_ignore_ascii_case("ERROR")
}

string_enum! {
    pub enum ExecutorType {
        System => "SYSTEM",
        External => "EXTERNAL",
    }
}

/// Whether the run's artifact made it to blob storage. `Unknown` marks rows
/// written before the flag existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactUploaded {
    Yes,
    No,
    #[default]
    Unknown,
}

impl ArtifactUploaded {
    pub fn from_column(value: Option<bool>) -> Self {
        match value {
            Some(true) => Self::Yes,
            Some(false) => Self::No,
            None => Self::Unknown,
        }
    }

    pub fn to_column(self) -> Option<bool> {
        match self {
            Self::Yes => Some(true),
            Self::No => Some(false),
            Self::Unknown => None,
        }
    }
}

impl From<bool> for ArtifactUploaded {
    fn from(uploaded: bool) -> Self {
        if uploaded {
            Self::Yes
        } else {
            Self::No
        }
    }
}

/// Commit that triggered a run for one git material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GitTrigger {
    pub commit: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: i64,
    pub ci_pipeline_id: i64,
    pub name: String,
    pub status: String,
    pub pod_status: String,
    pub pod_name: String,
    pub namespace: String,
    pub message: String,
    pub started_on: DateTime<Utc>,
    pub finished_on: Option<DateTime<Utc>>,
    pub log_location: Option<String>,
    /// Keyed by CI material id.
    pub git_triggers: BTreeMap<i64, GitTrigger>,
    pub artifact_id: Option<i64>,
    pub is_artifact_uploaded: ArtifactUploaded,
    pub blob_storage_enabled: bool,
    pub executor_type: ExecutorType,
    pub triggered_by: i64,
}

impl WorkflowRun {
    /// A run the engine still expects events for.
    pub fn in_progress(&self) -> bool {
        !is_terminal(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("SUCCEEDED", true)]
    #[case("Succeeded", true)]
    #[case("failed", true)]
    #[case("Error", true)]
    #[case("CANCELLED", true)]
    #[case("Timeout", true)]
    #[case("RUNNING", false)]
    #[case("Starting", false)]
    #[case("", false)]
    fn terminal_set_ignores_case(#[case] status: &str, #[case] terminal: bool) {
        assert_eq!(is_terminal(status), terminal);
    }

    #[test]
    fn artifact_uploaded_column_mapping() {
        assert_eq!(ArtifactUploaded::from_column(None), ArtifactUploaded::Unknown);
        assert_eq!(ArtifactUploaded::Yes.to_column(), Some(true));
        assert_eq!(ArtifactUploaded::from(false), ArtifactUploaded::No);
    }
}
