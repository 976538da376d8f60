//! CI pipelines, their materials, external CI endpoints and CD nodes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::string_enum;

string_enum! {
    /// How a CI pipeline produces artifacts.
    pub enum PipelineKind {
        Direct => "DIRECT",
        Linked => "LINKED",
        External => "EXTERNAL",
        Job => "JOB",
    }
}

string_enum! {
    pub enum SourceType {
        BranchFixed => "BRANCH_FIXED",
        BranchRegex => "BRANCH_REGEX",
        TagRegex => "TAG_REGEX",
        Webhook => "WEBHOOK",
    }
}

string_enum! {
    pub enum BuildType {
        SelfDockerfile => "SELF_DOCKERFILE",
        Buildpack => "BUILDPACK",
        SkipBuild => "SKIP_BUILD",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfigOverride {
    #[serde(default)]
    pub registry_id: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    pub build_type: BuildType,
}

impl DockerConfigOverride {
    /// Override carried by every job pipeline.
    pub fn skip_build() -> Self {
        Self {
            registry_id: None,
            repository: None,
            build_type: BuildType::SkipBuild,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiPipeline {
    pub id: i64,
    pub app_id: i64,
    pub name: String,
    pub kind: PipelineKind,
    pub manual_trigger: bool,
    pub scan_enabled: bool,
    pub docker_args: BTreeMap<String, String>,
    /// Set iff `kind == Linked`.
    pub parent_ci_id: Option<i64>,
    pub active: bool,
    pub deleted: bool,
    pub docker_config_overridden: bool,
    pub docker_config_override: Option<DockerConfigOverride>,
    pub updated_by: i64,
    pub updated_on: DateTime<Utc>,
}

impl CiPipeline {
    pub fn is_live(&self) -> bool {
        self.active && !self.deleted
    }

    pub fn is_external(&self) -> bool {
        self.kind == PipelineKind::External
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiMaterial {
    pub id: i64,
    pub ci_pipeline_id: i64,
    pub git_material_id: i64,
    pub source_type: SourceType,
    pub value: String,
    /// Set for regex-backed materials. Kept after a value is pinned.
    pub regex: String,
    /// Plugin SCM binding; bound materials are immutable.
    pub scm_id: Option<String>,
    pub active: bool,
}

impl CiMaterial {
    pub fn is_regex(&self) -> bool {
        self.source_type == SourceType::BranchRegex
    }

    pub fn has_scm_binding(&self) -> bool {
        self.scm_id.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Webhook endpoint owned by an external CI pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalCiEndpoint {
    pub id: i64,
    pub app_id: i64,
    pub ci_pipeline_id: i64,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub active: bool,
}

/// Deployment node. Only the fields the CI side touches are modelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdPipeline {
    pub id: i64,
    pub app_id: i64,
    /// Execution-side pointer to the CI pipeline feeding this CD; 0 for external sources.
    pub ci_pipeline_id: i64,
    pub name: String,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_their_wire_names() {
        for kind in [
            PipelineKind::Direct,
            PipelineKind::Linked,
            PipelineKind::External,
            PipelineKind::Job,
        ] {
            assert_eq!(kind.as_str().parse::<PipelineKind>(), Ok(kind));
        }
        assert!("DIRECT_ISH".parse::<PipelineKind>().is_err());
    }

    #[test]
    fn empty_scm_id_is_not_a_binding() {
        let material = CiMaterial {
            id: 1,
            ci_pipeline_id: 2,
            git_material_id: 3,
            source_type: SourceType::BranchFixed,
            value: "main".into(),
            regex: String::new(),
            scm_id: Some(String::new()),
            active: true,
        };
        assert!(!material.has_scm_binding());
    }
}
