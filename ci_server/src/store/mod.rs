//! Entity store: typed queries inside explicit units of work.
//!
//! Every engine operation opens one [`UnitOfWork`], stages its reads and
//! writes, then commits or rolls back. Dropping an uncommitted unit of work
//! discards its writes. Side effects outside the store run after commit.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    AppWorkflow, Application, Artifact, Attribute, CdPipeline, CiMaterial, CiPipeline, CustomTag,
    ExternalCiEndpoint, GitMaterial, NodeKind, PipelineHistory, PipelineStage,
    WorkflowNodeMapping, WorkflowRun,
};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    /// Retryable: serialization failure, dropped connection, pool timeout.
    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error("storage backend error: {0}")]
    Backend(Arc<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Arc::new(err))
    }
}

/// Opens units of work.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;
}

/// One transaction against the entity store.
///
/// Finders named `find_active_*` or documented as active-scoped skip
/// soft-deleted rows; plain `find_*` by id return rows in any state.
#[async_trait]
pub trait UnitOfWork: Send {
    // ── applications ──
    async fn insert_app(&mut self, app: Application) -> StoreResult<Application>;
    async fn find_app(&mut self, id: i64) -> StoreResult<Option<Application>>;

    // ── attributes ──
    async fn find_attribute(&mut self, key: &str) -> StoreResult<Option<Attribute>>;
    async fn upsert_attribute(&mut self, attribute: Attribute) -> StoreResult<()>;

    // ── git materials ──
    async fn insert_git_material(&mut self, material: GitMaterial) -> StoreResult<GitMaterial>;
    async fn update_git_material(&mut self, material: &GitMaterial) -> StoreResult<()>;
    async fn find_git_material(&mut self, id: i64) -> StoreResult<Option<GitMaterial>>;
    /// Active git materials of an app, by id.
    async fn find_git_materials_by_app(&mut self, app_id: i64) -> StoreResult<Vec<GitMaterial>>;

    // ── app workflows ──
    async fn insert_workflow(&mut self, workflow: AppWorkflow) -> StoreResult<AppWorkflow>;
    async fn find_workflow(&mut self, id: i64) -> StoreResult<Option<AppWorkflow>>;

    // ── ci pipelines ──
    async fn insert_ci_pipeline(&mut self, pipeline: CiPipeline) -> StoreResult<CiPipeline>;
    async fn update_ci_pipeline(&mut self, pipeline: &CiPipeline) -> StoreResult<()>;
    async fn find_ci_pipeline(&mut self, id: i64) -> StoreResult<Option<CiPipeline>>;
    async fn find_active_by_app_id(&mut self, app_id: i64) -> StoreResult<Vec<CiPipeline>>;
    async fn find_active_by_app_and_name(
        &mut self,
        app_id: i64,
        name: &str,
    ) -> StoreResult<Option<CiPipeline>>;
    /// Active linked children of a pipeline.
    async fn find_by_parent_ci_id(&mut self, parent_ci_id: i64) -> StoreResult<Vec<CiPipeline>>;

    // ── ci materials ──
    async fn insert_ci_materials(
        &mut self,
        materials: Vec<CiMaterial>,
    ) -> StoreResult<Vec<CiMaterial>>;
    async fn update_ci_materials(&mut self, materials: &[CiMaterial]) -> StoreResult<()>;
    async fn find_ci_material(&mut self, id: i64) -> StoreResult<Option<CiMaterial>>;
    /// Active materials of a pipeline, by id.
    async fn find_ci_materials_by_pipeline(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Vec<CiMaterial>>;
    /// Active materials bound to a git material across all pipelines.
    async fn find_ci_materials_by_git_material(
        &mut self,
        git_material_id: i64,
    ) -> StoreResult<Vec<CiMaterial>>;

    // ── external ci endpoints ──
    async fn insert_external_ci(
        &mut self,
        endpoint: ExternalCiEndpoint,
    ) -> StoreResult<ExternalCiEndpoint>;
    async fn update_external_ci(&mut self, endpoint: &ExternalCiEndpoint) -> StoreResult<()>;
    async fn find_external_ci(&mut self, id: i64) -> StoreResult<Option<ExternalCiEndpoint>>;
    /// The active endpoint owned by a pipeline.
    async fn find_external_ci_by_pipeline(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Option<ExternalCiEndpoint>>;

    // ── workflow mappings ──
    async fn insert_mapping(
        &mut self,
        mapping: WorkflowNodeMapping,
    ) -> StoreResult<WorkflowNodeMapping>;
    async fn update_mapping(&mut self, mapping: &WorkflowNodeMapping) -> StoreResult<()>;
    async fn find_mappings_by_workflow(
        &mut self,
        workflow_id: i64,
    ) -> StoreResult<Vec<WorkflowNodeMapping>>;
    async fn find_mappings_by_child(
        &mut self,
        child_id: i64,
        child_kind: NodeKind,
    ) -> StoreResult<Vec<WorkflowNodeMapping>>;
    async fn find_mappings_by_parent(
        &mut self,
        parent_id: i64,
        parent_kind: NodeKind,
    ) -> StoreResult<Vec<WorkflowNodeMapping>>;

    // ── cd pipelines ──
    async fn insert_cd_pipeline(&mut self, pipeline: CdPipeline) -> StoreResult<CdPipeline>;
    async fn update_cd_pipeline(&mut self, pipeline: &CdPipeline) -> StoreResult<()>;
    async fn find_cd_pipeline(&mut self, id: i64) -> StoreResult<Option<CdPipeline>>;

    // ── workflow runs ──
    async fn insert_run(&mut self, run: WorkflowRun) -> StoreResult<WorkflowRun>;
    async fn update_run(&mut self, run: &WorkflowRun) -> StoreResult<()>;
    async fn find_run(&mut self, id: i64) -> StoreResult<Option<WorkflowRun>>;
    /// Row-locks the run until the unit of work ends.
    async fn find_run_for_update(&mut self, id: i64) -> StoreResult<Option<WorkflowRun>>;
    async fn find_last_run_by_ci_id(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Option<WorkflowRun>>;
    /// Newest first.
    async fn find_runs_by_ci_id_paged(
        &mut self,
        ci_pipeline_id: i64,
        offset: i64,
        limit: i64,
    ) -> StoreResult<Vec<WorkflowRun>>;
    /// Runs whose status is one of `statuses` and that started before `before`.
    async fn find_runs_in_status_started_before(
        &mut self,
        statuses: &[&str],
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<WorkflowRun>>;

    // ── artifacts ──
    async fn insert_artifacts(&mut self, artifacts: Vec<Artifact>) -> StoreResult<Vec<Artifact>>;
    async fn find_artifact(&mut self, id: i64) -> StoreResult<Option<Artifact>>;
    async fn find_artifacts_by_parent(
        &mut self,
        parent_artifact_id: i64,
    ) -> StoreResult<Vec<Artifact>>;

    // ── custom tags ──
    async fn insert_custom_tag(&mut self, tag: CustomTag) -> StoreResult<CustomTag>;
    async fn update_custom_tag(&mut self, tag: &CustomTag) -> StoreResult<()>;
    async fn find_custom_tag(
        &mut self,
        entity_key: &str,
        entity_value: &str,
    ) -> StoreResult<Option<CustomTag>>;

    // ── pipeline stages ──
    async fn insert_stage(&mut self, stage: PipelineStage) -> StoreResult<PipelineStage>;
    async fn update_stage(&mut self, stage: &PipelineStage) -> StoreResult<()>;
    async fn find_stages_by_pipeline(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Vec<PipelineStage>>;

    // ── history ──
    async fn insert_history(&mut self, entry: PipelineHistory) -> StoreResult<PipelineHistory>;
    /// Newest first.
    async fn find_history_by_pipeline(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Vec<PipelineHistory>>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
