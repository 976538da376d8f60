//! Postgres entity store on diesel-async.
//!
//! Each unit of work checks a connection out of the pool and holds an open
//! transaction on it until commit or rollback. A unit of work dropped
//! mid-transaction returns a broken connection, which the pool discards.

pub mod migration;
pub mod models;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::{Object, Pool, PoolError};
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};

use self::models::*;
use self::schema::{
    ci_app_workflows, ci_apps, ci_artifacts, ci_attributes, ci_cd_pipelines, ci_custom_tags,
    ci_external_endpoints, ci_git_materials, ci_pipeline_history, ci_pipeline_materials,
    ci_pipeline_stages, ci_pipelines, ci_workflow_mappings, ci_workflow_runs,
};
use super::{EntityStore, StoreError, StoreResult, UnitOfWork};
use crate::models::{
    AppWorkflow, Application, Artifact, Attribute, CdPipeline, CiMaterial, CiPipeline, CustomTag,
    ExternalCiEndpoint, GitMaterial, NodeKind, PipelineHistory, PipelineStage,
    WorkflowNodeMapping, WorkflowRun,
};

pub type PgPool = Pool<AsyncPgConnection>;

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                let constraint = info.constraint_name().unwrap_or(info.message());
                StoreError::Conflict(constraint.to_string())
            }
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, info)
            | DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
                StoreError::Transient(info.message().to_string())
            }
            DieselError::NotFound => StoreError::not_found("row", 0),
            other => StoreError::backend(other),
        }
    }
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        StoreError::Transient(format!("connection pool: {err}"))
    }
}

/// Zero affected rows on an update by id means the row is gone.
fn expect_one(affected: usize, entity: &'static str, id: i64) -> StoreResult<()> {
    if affected == 0 {
        return Err(StoreError::not_found(entity, id));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let mut conn = self.pool.get().await?;
        AnsiTransactionManager::begin_transaction(&mut *conn).await?;
        Ok(Box::new(PgUnitOfWork { conn }))
    }
}

pub struct PgUnitOfWork {
    conn: Object<AsyncPgConnection>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn insert_app(&mut self, app: Application) -> StoreResult<Application> {
        let row = diesel::insert_into(ci_apps::table)
            .values(NewAppRow::from(&app))
            .returning(AppRow::as_returning())
            .get_result(&mut *self.conn)
            .await?;
        Ok(row.into())
    }

    async fn find_app(&mut self, id: i64) -> StoreResult<Option<Application>> {
        let row = ci_apps::table
            .find(id)
            .select(AppRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        Ok(row.map(Into::into))
    }

    async fn find_attribute(&mut self, key: &str) -> StoreResult<Option<Attribute>> {
        let row = ci_attributes::table
            .filter(ci_attributes::key.eq(key))
            .filter(ci_attributes::active.eq(true))
            .select(AttributeRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        Ok(row.map(Into::into))
    }

    async fn upsert_attribute(&mut self, attribute: Attribute) -> StoreResult<()> {
        let row = AttributeRow::from(attribute);
        diesel::insert_into(ci_attributes::table)
            .values(&row)
            .on_conflict(ci_attributes::key)
            .do_update()
            .set((
                ci_attributes::value.eq(&row.value),
                ci_attributes::active.eq(row.active),
            ))
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn insert_git_material(&mut self, material: GitMaterial) -> StoreResult<GitMaterial> {
        let row = diesel::insert_into(ci_git_materials::table)
            .values(NewGitMaterialRow::from(&material))
            .returning(GitMaterialRow::as_returning())
            .get_result(&mut *self.conn)
            .await?;
        Ok(row.into())
    }

    async fn update_git_material(&mut self, material: &GitMaterial) -> StoreResult<()> {
        let affected = diesel::update(ci_git_materials::table.find(material.id))
            .set(NewGitMaterialRow::from(material))
            .execute(&mut *self.conn)
            .await?;
        expect_one(affected, "git material", material.id)
    }

    async fn find_git_material(&mut self, id: i64) -> StoreResult<Option<GitMaterial>> {
        let row = ci_git_materials::table
            .find(id)
            .select(GitMaterialRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        Ok(row.map(Into::into))
    }

    async fn find_git_materials_by_app(&mut self, app_id: i64) -> StoreResult<Vec<GitMaterial>> {
        let rows = ci_git_materials::table
            .filter(ci_git_materials::app_id.eq(app_id))
            .filter(ci_git_materials::active.eq(true))
            .order(ci_git_materials::id.asc())
            .select(GitMaterialRow::as_select())
            .load(&mut *self.conn)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_workflow(&mut self, workflow: AppWorkflow) -> StoreResult<AppWorkflow> {
        let row = diesel::insert_into(ci_app_workflows::table)
            .values(NewAppWorkflowRow::from(&workflow))
            .returning(AppWorkflowRow::as_returning())
            .get_result(&mut *self.conn)
            .await?;
        Ok(row.into())
    }

    async fn find_workflow(&mut self, id: i64) -> StoreResult<Option<AppWorkflow>> {
        let row = ci_app_workflows::table
            .find(id)
            .select(AppWorkflowRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        Ok(row.map(Into::into))
    }

    async fn insert_ci_pipeline(&mut self, pipeline: CiPipeline) -> StoreResult<CiPipeline> {
        let row = diesel::insert_into(ci_pipelines::table)
            .values(NewCiPipelineRow::try_from(&pipeline)?)
            .returning(CiPipelineRow::as_returning())
            .get_result(&mut *self.conn)
            .await?;
        row.try_into()
    }

    async fn update_ci_pipeline(&mut self, pipeline: &CiPipeline) -> StoreResult<()> {
        let affected = diesel::update(ci_pipelines::table.find(pipeline.id))
            .set(NewCiPipelineRow::try_from(pipeline)?)
            .execute(&mut *self.conn)
            .await?;
        expect_one(affected, "ci pipeline", pipeline.id)
    }

    async fn find_ci_pipeline(&mut self, id: i64) -> StoreResult<Option<CiPipeline>> {
        let row = ci_pipelines::table
            .find(id)
            .select(CiPipelineRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_active_by_app_id(&mut self, app_id: i64) -> StoreResult<Vec<CiPipeline>> {
        let rows = ci_pipelines::table
            .filter(ci_pipelines::app_id.eq(app_id))
            .filter(ci_pipelines::active.eq(true))
            .filter(ci_pipelines::deleted.eq(false))
            .order(ci_pipelines::id.asc())
            .select(CiPipelineRow::as_select())
            .load(&mut *self.conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_active_by_app_and_name(
        &mut self,
        app_id: i64,
        name: &str,
    ) -> StoreResult<Option<CiPipeline>> {
        let row = ci_pipelines::table
            .filter(ci_pipelines::app_id.eq(app_id))
            .filter(ci_pipelines::name.eq(name))
            .filter(ci_pipelines::active.eq(true))
            .filter(ci_pipelines::deleted.eq(false))
            .select(CiPipelineRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_parent_ci_id(&mut self, parent_ci_id: i64) -> StoreResult<Vec<CiPipeline>> {
        let rows = ci_pipelines::table
            .filter(ci_pipelines::parent_ci_id.eq(parent_ci_id))
            .filter(ci_pipelines::active.eq(true))
            .filter(ci_pipelines::deleted.eq(false))
            .order(ci_pipelines::id.asc())
            .select(CiPipelineRow::as_select())
            .load(&mut *self.conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_ci_materials(
        &mut self,
        materials: Vec<CiMaterial>,
    ) -> StoreResult<Vec<CiMaterial>> {
        if materials.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<NewCiMaterialRow> = materials.iter().map(Into::into).collect();
        let inserted = diesel::insert_into(ci_pipeline_materials::table)
            .values(&rows)
            .returning(CiMaterialRow::as_returning())
            .get_results(&mut *self.conn)
            .await?;
        inserted.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_ci_materials(&mut self, materials: &[CiMaterial]) -> StoreResult<()> {
        for material in materials {
            let affected = diesel::update(ci_pipeline_materials::table.find(material.id))
                .set(NewCiMaterialRow::from(material))
                .execute(&mut *self.conn)
                .await?;
            expect_one(affected, "ci material", material.id)?;
        }
        Ok(())
    }

    async fn find_ci_material(&mut self, id: i64) -> StoreResult<Option<CiMaterial>> {
        let row = ci_pipeline_materials::table
            .find(id)
            .select(CiMaterialRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_ci_materials_by_pipeline(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Vec<CiMaterial>> {
        let rows = ci_pipeline_materials::table
            .filter(ci_pipeline_materials::ci_pipeline_id.eq(ci_pipeline_id))
            .filter(ci_pipeline_materials::active.eq(true))
            .order(ci_pipeline_materials::id.asc())
            .select(CiMaterialRow::as_select())
            .load(&mut *self.conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_ci_materials_by_git_material(
        &mut self,
        git_material_id: i64,
    ) -> StoreResult<Vec<CiMaterial>> {
        let rows = ci_pipeline_materials::table
            .filter(ci_pipeline_materials::git_material_id.eq(git_material_id))
            .filter(ci_pipeline_materials::active.eq(true))
            .order(ci_pipeline_materials::id.asc())
            .select(CiMaterialRow::as_select())
            .load(&mut *self.conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_external_ci(
        &mut self,
        endpoint: ExternalCiEndpoint,
    ) -> StoreResult<ExternalCiEndpoint> {
        let row = diesel::insert_into(ci_external_endpoints::table)
            .values(NewExternalCiRow::from(&endpoint))
            .returning(ExternalCiRow::as_returning())
            .get_result(&mut *self.conn)
            .await?;
        Ok(row.into())
    }

    async fn update_external_ci(&mut self, endpoint: &ExternalCiEndpoint) -> StoreResult<()> {
        let affected = diesel::update(ci_external_endpoints::table.find(endpoint.id))
            .set(NewExternalCiRow::from(endpoint))
            .execute(&mut *self.conn)
            .await?;
        expect_one(affected, "external ci", endpoint.id)
    }

    async fn find_external_ci(&mut self, id: i64) -> StoreResult<Option<ExternalCiEndpoint>> {
        let row = ci_external_endpoints::table
            .find(id)
            .select(ExternalCiRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        Ok(row.map(Into::into))
    }

    async fn find_external_ci_by_pipeline(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Option<ExternalCiEndpoint>> {
        let row = ci_external_endpoints::table
            .filter(ci_external_endpoints::ci_pipeline_id.eq(ci_pipeline_id))
            .filter(ci_external_endpoints::active.eq(true))
            .order(ci_external_endpoints::id.desc())
            .select(ExternalCiRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        Ok(row.map(Into::into))
    }

    async fn insert_mapping(
        &mut self,
        mapping: WorkflowNodeMapping,
    ) -> StoreResult<WorkflowNodeMapping> {
        let row = diesel::insert_into(ci_workflow_mappings::table)
            .values(NewMappingRow::from(&mapping))
            .returning(MappingRow::as_returning())
            .get_result(&mut *self.conn)
            .await?;
        row.try_into()
    }

    async fn update_mapping(&mut self, mapping: &WorkflowNodeMapping) -> StoreResult<()> {
        let affected = diesel::update(ci_workflow_mappings::table.find(mapping.id))
            .set(NewMappingRow::from(mapping))
            .execute(&mut *self.conn)
            .await?;
        expect_one(affected, "workflow mapping", mapping.id)
    }

    async fn find_mappings_by_workflow(
        &mut self,
        workflow_id: i64,
    ) -> StoreResult<Vec<WorkflowNodeMapping>> {
        let rows = ci_workflow_mappings::table
            .filter(ci_workflow_mappings::workflow_id.eq(workflow_id))
            .filter(ci_workflow_mappings::active.eq(true))
            .order(ci_workflow_mappings::id.asc())
            .select(MappingRow::as_select())
            .load(&mut *self.conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_mappings_by_child(
        &mut self,
        child_id: i64,
        child_kind: NodeKind,
    ) -> StoreResult<Vec<WorkflowNodeMapping>> {
        let rows = ci_workflow_mappings::table
            .filter(ci_workflow_mappings::child_id.eq(child_id))
            .filter(ci_workflow_mappings::child_kind.eq(child_kind.as_str()))
            .filter(ci_workflow_mappings::active.eq(true))
            .order(ci_workflow_mappings::id.asc())
            .select(MappingRow::as_select())
            .load(&mut *self.conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_mappings_by_parent(
        &mut self,
        parent_id: i64,
        parent_kind: NodeKind,
    ) -> StoreResult<Vec<WorkflowNodeMapping>> {
        let rows = ci_workflow_mappings::table
            .filter(ci_workflow_mappings::parent_id.eq(parent_id))
            .filter(ci_workflow_mappings::parent_kind.eq(parent_kind.as_str()))
            .filter(ci_workflow_mappings::active.eq(true))
            .order(ci_workflow_mappings::id.asc())
            .select(MappingRow::as_select())
            .load(&mut *self.conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_cd_pipeline(&mut self, pipeline: CdPipeline) -> StoreResult<CdPipeline> {
        let row = diesel::insert_into(ci_cd_pipelines::table)
            .values(NewCdPipelineRow::from(&pipeline))
            .returning(CdPipelineRow::as_returning())
            .get_result(&mut *self.conn)
            .await?;
        Ok(row.into())
    }

    async fn update_cd_pipeline(&mut self, pipeline: &CdPipeline) -> StoreResult<()> {
        let affected = diesel::update(ci_cd_pipelines::table.find(pipeline.id))
            .set(NewCdPipelineRow::from(pipeline))
            .execute(&mut *self.conn)
            .await?;
        expect_one(affected, "cd pipeline", pipeline.id)
    }

    async fn find_cd_pipeline(&mut self, id: i64) -> StoreResult<Option<CdPipeline>> {
        let row = ci_cd_pipelines::table
            .find(id)
            .select(CdPipelineRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        Ok(row.map(Into::into))
    }

    async fn insert_run(&mut self, run: WorkflowRun) -> StoreResult<WorkflowRun> {
        let row = diesel::insert_into(ci_workflow_runs::table)
            .values(NewRunRow::try_from(&run)?)
            .returning(RunRow::as_returning())
            .get_result(&mut *self.conn)
            .await?;
        row.try_into()
    }

    async fn update_run(&mut self, run: &WorkflowRun) -> StoreResult<()> {
        let affected = diesel::update(ci_workflow_runs::table.find(run.id))
            .set(NewRunRow::try_from(run)?)
            .execute(&mut *self.conn)
            .await?;
        expect_one(affected, "workflow run", run.id)
    }

    async fn find_run(&mut self, id: i64) -> StoreResult<Option<WorkflowRun>> {
        let row = ci_workflow_runs::table
            .find(id)
            .select(RunRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_run_for_update(&mut self, id: i64) -> StoreResult<Option<WorkflowRun>> {
        let row = ci_workflow_runs::table
            .find(id)
            .select(RunRow::as_select())
            .for_update()
            .first(&mut *self.conn)
            .await
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_last_run_by_ci_id(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Option<WorkflowRun>> {
        let row = ci_workflow_runs::table
            .filter(ci_workflow_runs::ci_pipeline_id.eq(ci_pipeline_id))
            .order(ci_workflow_runs::id.desc())
            .select(RunRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_runs_by_ci_id_paged(
        &mut self,
        ci_pipeline_id: i64,
        offset: i64,
        limit: i64,
    ) -> StoreResult<Vec<WorkflowRun>> {
        let rows = ci_workflow_runs::table
            .filter(ci_workflow_runs::ci_pipeline_id.eq(ci_pipeline_id))
            .order(ci_workflow_runs::id.desc())
            .offset(offset.max(0))
            .limit(limit.max(0))
            .select(RunRow::as_select())
            .load(&mut *self.conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_runs_in_status_started_before(
        &mut self,
        statuses: &[&str],
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<WorkflowRun>> {
        let rows = ci_workflow_runs::table
            .filter(ci_workflow_runs::status.eq_any(statuses.to_vec()))
            .filter(ci_workflow_runs::started_on.lt(before))
            .order(ci_workflow_runs::id.asc())
            .select(RunRow::as_select())
            .load(&mut *self.conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_artifacts(&mut self, artifacts: Vec<Artifact>) -> StoreResult<Vec<Artifact>> {
        if artifacts.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<NewArtifactRow> = artifacts.into_iter().map(Into::into).collect();
        let inserted = diesel::insert_into(ci_artifacts::table)
            .values(&rows)
            .returning(ArtifactRow::as_returning())
            .get_results(&mut *self.conn)
            .await?;
        Ok(inserted.into_iter().map(Into::into).collect())
    }

    async fn find_artifact(&mut self, id: i64) -> StoreResult<Option<Artifact>> {
        let row = ci_artifacts::table
            .find(id)
            .select(ArtifactRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        Ok(row.map(Into::into))
    }

    async fn find_artifacts_by_parent(
        &mut self,
        parent_artifact_id: i64,
    ) -> StoreResult<Vec<Artifact>> {
        let rows = ci_artifacts::table
            .filter(ci_artifacts::parent_artifact_id.eq(parent_artifact_id))
            .order(ci_artifacts::id.asc())
            .select(ArtifactRow::as_select())
            .load(&mut *self.conn)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_custom_tag(&mut self, tag: CustomTag) -> StoreResult<CustomTag> {
        let row = diesel::insert_into(ci_custom_tags::table)
            .values(NewCustomTagRow::from(&tag))
            .returning(CustomTagRow::as_returning())
            .get_result(&mut *self.conn)
            .await?;
        Ok(row.into())
    }

    async fn update_custom_tag(&mut self, tag: &CustomTag) -> StoreResult<()> {
        let affected = diesel::update(ci_custom_tags::table.find(tag.id))
            .set(NewCustomTagRow::from(tag))
            .execute(&mut *self.conn)
            .await?;
        expect_one(affected, "custom tag", tag.id)
    }

    async fn find_custom_tag(
        &mut self,
        entity_key: &str,
        entity_value: &str,
    ) -> StoreResult<Option<CustomTag>> {
        let row = ci_custom_tags::table
            .filter(ci_custom_tags::entity_key.eq(entity_key))
            .filter(ci_custom_tags::entity_value.eq(entity_value))
            .filter(ci_custom_tags::active.eq(true))
            .select(CustomTagRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        Ok(row.map(Into::into))
    }

    async fn insert_stage(&mut self, stage: PipelineStage) -> StoreResult<PipelineStage> {
        let row = diesel::insert_into(ci_pipeline_stages::table)
            .values(NewStageRow::try_from(&stage)?)
            .returning(StageRow::as_returning())
            .get_result(&mut *self.conn)
            .await?;
        row.try_into()
    }

    async fn update_stage(&mut self, stage: &PipelineStage) -> StoreResult<()> {
        let affected = diesel::update(ci_pipeline_stages::table.find(stage.id))
            .set(NewStageRow::try_from(stage)?)
            .execute(&mut *self.conn)
            .await?;
        expect_one(affected, "pipeline stage", stage.id)
    }

    async fn find_stages_by_pipeline(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Vec<PipelineStage>> {
        let rows = ci_pipeline_stages::table
            .filter(ci_pipeline_stages::ci_pipeline_id.eq(ci_pipeline_id))
            .filter(ci_pipeline_stages::active.eq(true))
            .order(ci_pipeline_stages::id.asc())
            .select(StageRow::as_select())
            .load(&mut *self.conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_history(&mut self, entry: PipelineHistory) -> StoreResult<PipelineHistory> {
        let row = diesel::insert_into(ci_pipeline_history::table)
            .values(NewHistoryRow::from(entry))
            .returning(HistoryRow::as_returning())
            .get_result(&mut *self.conn)
            .await?;
        row.try_into()
    }

    async fn find_history_by_pipeline(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Vec<PipelineHistory>> {
        let rows = ci_pipeline_history::table
            .filter(ci_pipeline_history::ci_pipeline_id.eq(ci_pipeline_id))
            .order(ci_pipeline_history::id.desc())
            .select(HistoryRow::as_select())
            .load(&mut *self.conn)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        AnsiTransactionManager::commit_transaction(&mut *self.conn).await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        AnsiTransactionManager::rollback_transaction(&mut *self.conn).await?;
        Ok(())
    }
}
