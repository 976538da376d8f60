//! Diesel row models and their mapping to domain types.
//!
//! Enum columns are stored as their wire strings; JSON-shaped fields use
//! `jsonb`. A row that fails to map back is a backend error.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

use super::schema::{
    ci_app_workflows, ci_apps, ci_artifacts, ci_attributes, ci_cd_pipelines, ci_custom_tags,
    ci_external_endpoints, ci_git_materials, ci_pipeline_history, ci_pipeline_materials,
    ci_pipeline_stages, ci_pipelines, ci_workflow_mappings, ci_workflow_runs,
};
use crate::models::{
    AppWorkflow, Application, Artifact, ArtifactUploaded, Attribute, CdPipeline, CiMaterial,
    CiPipeline, CustomTag, ExternalCiEndpoint, GitMaterial, PipelineHistory, PipelineStage,
    UnknownVariant, WorkflowNodeMapping, WorkflowRun,
};
use crate::store::{StoreError, StoreResult};

fn parse<T: FromStr<Err = UnknownVariant>>(value: &str) -> StoreResult<T> {
    value.parse().map_err(StoreError::backend)
}

fn from_json<T: serde::de::DeserializeOwned>(value: Value) -> StoreResult<T> {
    serde_json::from_value(value).map_err(StoreError::backend)
}

fn to_json<T: serde::Serialize>(value: &T) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(StoreError::backend)
}

// ── applications ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_apps)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AppRow {
    pub id: i64,
    pub name: String,
    pub project_id: i64,
    pub active: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ci_apps)]
pub struct NewAppRow {
    pub name: String,
    pub project_id: i64,
    pub active: bool,
}

impl From<AppRow> for Application {
    fn from(row: AppRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            project_id: row.project_id,
            active: row.active,
        }
    }
}

impl From<&Application> for NewAppRow {
    fn from(app: &Application) -> Self {
        Self {
            name: app.name.clone(),
            project_id: app.project_id,
            active: app.active,
        }
    }
}

// ── attributes ──

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = ci_attributes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AttributeRow {
    pub key: String,
    pub value: String,
    pub active: bool,
}

impl From<AttributeRow> for Attribute {
    fn from(row: AttributeRow) -> Self {
        Self {
            key: row.key,
            value: row.value,
            active: row.active,
        }
    }
}

impl From<Attribute> for AttributeRow {
    fn from(attr: Attribute) -> Self {
        Self {
            key: attr.key,
            value: attr.value,
            active: attr.active,
        }
    }
}

// ── git materials ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_git_materials)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct GitMaterialRow {
    pub id: i64,
    pub app_id: i64,
    pub name: String,
    pub url: String,
    pub checkout_path: String,
    pub provider_id: i64,
    pub fetch_submodules: bool,
    pub active: bool,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = ci_git_materials)]
pub struct NewGitMaterialRow {
    pub app_id: i64,
    pub name: String,
    pub url: String,
    pub checkout_path: String,
    pub provider_id: i64,
    pub fetch_submodules: bool,
    pub active: bool,
}

impl From<GitMaterialRow> for GitMaterial {
    fn from(row: GitMaterialRow) -> Self {
        Self {
            id: row.id,
            app_id: row.app_id,
            name: row.name,
            url: row.url,
            checkout_path: row.checkout_path,
            provider_id: row.provider_id,
            fetch_submodules: row.fetch_submodules,
            active: row.active,
        }
    }
}

impl From<&GitMaterial> for NewGitMaterialRow {
    fn from(m: &GitMaterial) -> Self {
        Self {
            app_id: m.app_id,
            name: m.name.clone(),
            url: m.url.clone(),
            checkout_path: m.checkout_path.clone(),
            provider_id: m.provider_id,
            fetch_submodules: m.fetch_submodules,
            active: m.active,
        }
    }
}

// ── app workflows ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_app_workflows)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AppWorkflowRow {
    pub id: i64,
    pub app_id: i64,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ci_app_workflows)]
pub struct NewAppWorkflowRow {
    pub app_id: i64,
    pub name: String,
    pub active: bool,
}

impl From<AppWorkflowRow> for AppWorkflow {
    fn from(row: AppWorkflowRow) -> Self {
        Self {
            id: row.id,
            app_id: row.app_id,
            name: row.name,
            active: row.active,
        }
    }
}

impl From<&AppWorkflow> for NewAppWorkflowRow {
    fn from(wf: &AppWorkflow) -> Self {
        Self {
            app_id: wf.app_id,
            name: wf.name.clone(),
            active: wf.active,
        }
    }
}

// ── ci pipelines ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_pipelines)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CiPipelineRow {
    pub id: i64,
    pub app_id: i64,
    pub name: String,
    pub kind: String,
    pub manual_trigger: bool,
    pub scan_enabled: bool,
    pub docker_args: Value,
    pub parent_ci_id: Option<i64>,
    pub active: bool,
    pub deleted: bool,
    pub docker_config_overridden: bool,
    pub docker_config_override: Option<Value>,
    pub updated_by: i64,
    pub updated_on: DateTime<Utc>,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = ci_pipelines)]
#[diesel(treat_none_as_null = true)]
pub struct NewCiPipelineRow {
    pub app_id: i64,
    pub name: String,
    pub kind: String,
    pub manual_trigger: bool,
    pub scan_enabled: bool,
    pub docker_args: Value,
    pub parent_ci_id: Option<i64>,
    pub active: bool,
    pub deleted: bool,
    pub docker_config_overridden: bool,
    pub docker_config_override: Option<Value>,
    pub updated_by: i64,
    pub updated_on: DateTime<Utc>,
}

impl TryFrom<CiPipelineRow> for CiPipeline {
    type Error = StoreError;

    fn try_from(row: CiPipelineRow) -> StoreResult<Self> {
        let docker_args: BTreeMap<String, String> = from_json(row.docker_args)?;
        Ok(Self {
            id: row.id,
            app_id: row.app_id,
            name: row.name,
            kind: parse(&row.kind)?,
            manual_trigger: row.manual_trigger,
            scan_enabled: row.scan_enabled,
            docker_args,
            parent_ci_id: row.parent_ci_id,
            active: row.active,
            deleted: row.deleted,
            docker_config_overridden: row.docker_config_overridden,
            docker_config_override: row.docker_config_override.map(from_json).transpose()?,
            updated_by: row.updated_by,
            updated_on: row.updated_on,
        })
    }
}

impl TryFrom<&CiPipeline> for NewCiPipelineRow {
    type Error = StoreError;

    fn try_from(p: &CiPipeline) -> StoreResult<Self> {
        Ok(Self {
            app_id: p.app_id,
            name: p.name.clone(),
            kind: p.kind.as_str().to_string(),
            manual_trigger: p.manual_trigger,
            scan_enabled: p.scan_enabled,
            docker_args: to_json(&p.docker_args)?,
            parent_ci_id: p.parent_ci_id,
            active: p.active,
            deleted: p.deleted,
            docker_config_overridden: p.docker_config_overridden,
            docker_config_override: p.docker_config_override.as_ref().map(to_json).transpose()?,
            updated_by: p.updated_by,
            updated_on: p.updated_on,
        })
    }
}

// ── ci materials ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_pipeline_materials)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CiMaterialRow {
    pub id: i64,
    pub ci_pipeline_id: i64,
    pub git_material_id: i64,
    pub source_type: String,
    pub value: String,
    pub regex: String,
    pub scm_id: Option<String>,
    pub active: bool,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = ci_pipeline_materials)]
#[diesel(treat_none_as_null = true)]
pub struct NewCiMaterialRow {
    pub ci_pipeline_id: i64,
    pub git_material_id: i64,
    pub source_type: String,
    pub value: String,
    pub regex: String,
    pub scm_id: Option<String>,
    pub active: bool,
}

impl TryFrom<CiMaterialRow> for CiMaterial {
    type Error = StoreError;

    fn try_from(row: CiMaterialRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            ci_pipeline_id: row.ci_pipeline_id,
            git_material_id: row.git_material_id,
            source_type: parse(&row.source_type)?,
            value: row.value,
            regex: row.regex,
            scm_id: row.scm_id,
            active: row.active,
        })
    }
}

impl From<&CiMaterial> for NewCiMaterialRow {
    fn from(m: &CiMaterial) -> Self {
        Self {
            ci_pipeline_id: m.ci_pipeline_id,
            git_material_id: m.git_material_id,
            source_type: m.source_type.as_str().to_string(),
            value: m.value.clone(),
            regex: m.regex.clone(),
            scm_id: m.scm_id.clone(),
            active: m.active,
        }
    }
}

// ── external ci endpoints ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_external_endpoints)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ExternalCiRow {
    pub id: i64,
    pub app_id: i64,
    pub ci_pipeline_id: i64,
    pub access_token: String,
    pub active: bool,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = ci_external_endpoints)]
pub struct NewExternalCiRow {
    pub app_id: i64,
    pub ci_pipeline_id: i64,
    pub access_token: String,
    pub active: bool,
}

impl From<ExternalCiRow> for ExternalCiEndpoint {
    fn from(row: ExternalCiRow) -> Self {
        Self {
            id: row.id,
            app_id: row.app_id,
            ci_pipeline_id: row.ci_pipeline_id,
            access_token: row.access_token,
            active: row.active,
        }
    }
}

impl From<&ExternalCiEndpoint> for NewExternalCiRow {
    fn from(e: &ExternalCiEndpoint) -> Self {
        Self {
            app_id: e.app_id,
            ci_pipeline_id: e.ci_pipeline_id,
            access_token: e.access_token.clone(),
            active: e.active,
        }
    }
}

// ── workflow mappings ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_workflow_mappings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MappingRow {
    pub id: i64,
    pub workflow_id: i64,
    pub parent_id: i64,
    pub parent_kind: Option<String>,
    pub child_id: i64,
    pub child_kind: String,
    pub active: bool,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = ci_workflow_mappings)]
#[diesel(treat_none_as_null = true)]
pub struct NewMappingRow {
    pub workflow_id: i64,
    pub parent_id: i64,
    pub parent_kind: Option<String>,
    pub child_id: i64,
    pub child_kind: String,
    pub active: bool,
}

impl TryFrom<MappingRow> for WorkflowNodeMapping {
    type Error = StoreError;

    fn try_from(row: MappingRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            workflow_id: row.workflow_id,
            parent_id: row.parent_id,
            parent_kind: row.parent_kind.as_deref().map(parse).transpose()?,
            child_id: row.child_id,
            child_kind: parse(&row.child_kind)?,
            active: row.active,
        })
    }
}

impl From<&WorkflowNodeMapping> for NewMappingRow {
    fn from(m: &WorkflowNodeMapping) -> Self {
        Self {
            workflow_id: m.workflow_id,
            parent_id: m.parent_id,
            parent_kind: m.parent_kind.map(|k| k.as_str().to_string()),
            child_id: m.child_id,
            child_kind: m.child_kind.as_str().to_string(),
            active: m.active,
        }
    }
}

// ── cd pipelines ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_cd_pipelines)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CdPipelineRow {
    pub id: i64,
    pub app_id: i64,
    pub ci_pipeline_id: i64,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = ci_cd_pipelines)]
pub struct NewCdPipelineRow {
    pub app_id: i64,
    pub ci_pipeline_id: i64,
    pub name: String,
    pub active: bool,
}

impl From<CdPipelineRow> for CdPipeline {
    fn from(row: CdPipelineRow) -> Self {
        Self {
            id: row.id,
            app_id: row.app_id,
            ci_pipeline_id: row.ci_pipeline_id,
            name: row.name,
            active: row.active,
        }
    }
}

impl From<&CdPipeline> for NewCdPipelineRow {
    fn from(p: &CdPipeline) -> Self {
        Self {
            app_id: p.app_id,
            ci_pipeline_id: p.ci_pipeline_id,
            name: p.name.clone(),
            active: p.active,
        }
    }
}

// ── workflow runs ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_workflow_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RunRow {
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
    pub git_triggers: Value,
    pub artifact_id: Option<i64>,
    pub is_artifact_uploaded: Option<bool>,
    pub blob_storage_enabled: bool,
    pub executor_type: String,
    pub triggered_by: i64,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = ci_workflow_runs)]
#[diesel(treat_none_as_null = true)]
pub struct NewRunRow {
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
    pub git_triggers: Value,
    pub artifact_id: Option<i64>,
    pub is_artifact_uploaded: Option<bool>,
    pub blob_storage_enabled: bool,
    pub executor_type: String,
    pub triggered_by: i64,
}

impl TryFrom<RunRow> for WorkflowRun {
    type Error = StoreError;

    fn try_from(row: RunRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            ci_pipeline_id: row.ci_pipeline_id,
            name: row.name,
            status: row.status,
            pod_status: row.pod_status,
            pod_name: row.pod_name,
            namespace: row.namespace,
            message: row.message,
            started_on: row.started_on,
            finished_on: row.finished_on,
            log_location: row.log_location,
            git_triggers: from_json(row.git_triggers)?,
            artifact_id: row.artifact_id,
            is_artifact_uploaded: ArtifactUploaded::from_column(row.is_artifact_uploaded),
            blob_storage_enabled: row.blob_storage_enabled,
            executor_type: parse(&row.executor_type)?,
            triggered_by: row.triggered_by,
        })
    }
}

impl TryFrom<&WorkflowRun> for NewRunRow {
    type Error = StoreError;

    fn try_from(r: &WorkflowRun) -> StoreResult<Self> {
        Ok(Self {
            ci_pipeline_id: r.ci_pipeline_id,
            name: r.name.clone(),
            status: r.status.clone(),
            pod_status: r.pod_status.clone(),
            pod_name: r.pod_name.clone(),
            namespace: r.namespace.clone(),
            message: r.message.clone(),
            started_on: r.started_on,
            finished_on: r.finished_on,
            log_location: r.log_location.clone(),
            git_triggers: to_json(&r.git_triggers)?,
            artifact_id: r.artifact_id,
            is_artifact_uploaded: r.is_artifact_uploaded.to_column(),
            blob_storage_enabled: r.blob_storage_enabled,
            executor_type: r.executor_type.as_str().to_string(),
            triggered_by: r.triggered_by,
        })
    }
}

// ── artifacts ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_artifacts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ArtifactRow {
    pub id: i64,
    pub image: String,
    pub image_digest: String,
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

#[derive(Debug, Insertable)]
#[diesel(table_name = ci_artifacts)]
pub struct NewArtifactRow {
    pub image: String,
    pub image_digest: String,
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

impl From<ArtifactRow> for Artifact {
    fn from(row: ArtifactRow) -> Self {
        Self {
            id: row.id,
            image: row.image,
            image_digest: row.image_digest,
            material_info: row.material_info,
            data_source: row.data_source,
            pipeline_id: row.pipeline_id,
            workflow_run_id: row.workflow_run_id,
            parent_artifact_id: row.parent_artifact_id,
            external_ci_id: row.external_ci_id,
            scan_enabled: row.scan_enabled,
            scanned: row.scanned,
            is_artifact_uploaded: row.is_artifact_uploaded,
            created_by: row.created_by,
            created_on: row.created_on,
        }
    }
}

impl From<Artifact> for NewArtifactRow {
    fn from(a: Artifact) -> Self {
        Self {
            image: a.image,
            image_digest: a.image_digest,
            material_info: a.material_info,
            data_source: a.data_source,
            pipeline_id: a.pipeline_id,
            workflow_run_id: a.workflow_run_id,
            parent_artifact_id: a.parent_artifact_id,
            external_ci_id: a.external_ci_id,
            scan_enabled: a.scan_enabled,
            scanned: a.scanned,
            is_artifact_uploaded: a.is_artifact_uploaded,
            created_by: a.created_by,
            created_on: a.created_on,
        }
    }
}

// ── custom tags ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_custom_tags)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CustomTagRow {
    pub id: i64,
    pub entity_key: String,
    pub entity_value: String,
    pub tag_pattern: String,
    pub auto_increasing_number: i64,
    pub enabled: bool,
    pub active: bool,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = ci_custom_tags)]
pub struct NewCustomTagRow {
    pub entity_key: String,
    pub entity_value: String,
    pub tag_pattern: String,
    pub auto_increasing_number: i64,
    pub enabled: bool,
    pub active: bool,
}

impl From<CustomTagRow> for CustomTag {
    fn from(row: CustomTagRow) -> Self {
        Self {
            id: row.id,
            entity_key: row.entity_key,
            entity_value: row.entity_value,
            tag_pattern: row.tag_pattern,
            auto_increasing_number: row.auto_increasing_number,
            enabled: row.enabled,
            active: row.active,
        }
    }
}

impl From<&CustomTag> for NewCustomTagRow {
    fn from(t: &CustomTag) -> Self {
        Self {
            entity_key: t.entity_key.clone(),
            entity_value: t.entity_value.clone(),
            tag_pattern: t.tag_pattern.clone(),
            auto_increasing_number: t.auto_increasing_number,
            enabled: t.enabled,
            active: t.active,
        }
    }
}

// ── pipeline stages ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_pipeline_stages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StageRow {
    pub id: i64,
    pub ci_pipeline_id: i64,
    pub stage_type: String,
    pub steps: Value,
    pub active: bool,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = ci_pipeline_stages)]
pub struct NewStageRow {
    pub ci_pipeline_id: i64,
    pub stage_type: String,
    pub steps: Value,
    pub active: bool,
}

impl TryFrom<StageRow> for PipelineStage {
    type Error = StoreError;

    fn try_from(row: StageRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            ci_pipeline_id: row.ci_pipeline_id,
            stage_type: parse(&row.stage_type)?,
            steps: from_json(row.steps)?,
            active: row.active,
        })
    }
}

impl TryFrom<&PipelineStage> for NewStageRow {
    type Error = StoreError;

    fn try_from(s: &PipelineStage) -> StoreResult<Self> {
        Ok(Self {
            ci_pipeline_id: s.ci_pipeline_id,
            stage_type: s.stage_type.as_str().to_string(),
            steps: to_json(&s.steps)?,
            active: s.active,
        })
    }
}

// ── history ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ci_pipeline_history)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct HistoryRow {
    pub id: i64,
    pub ci_pipeline_id: i64,
    pub trigger: String,
    pub snapshot: Value,
    pub created_by: i64,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ci_pipeline_history)]
pub struct NewHistoryRow {
    pub ci_pipeline_id: i64,
    pub trigger: String,
    pub snapshot: Value,
    pub created_by: i64,
    pub created_on: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for PipelineHistory {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            ci_pipeline_id: row.ci_pipeline_id,
            trigger: parse(&row.trigger)?,
            snapshot: row.snapshot,
            created_by: row.created_by,
            created_on: row.created_on,
        })
    }
}

impl From<PipelineHistory> for NewHistoryRow {
    fn from(h: PipelineHistory) -> Self {
        Self {
            ci_pipeline_id: h.ci_pipeline_id,
            trigger: h.trigger.as_str().to_string(),
            snapshot: h.snapshot,
            created_by: h.created_by,
            created_on: h.created_on,
        }
    }
}
