//! In-memory entity store for tests and local runs.
//!
//! A unit of work holds the store lock for its whole lifetime and writes to
//! a private copy of the state; commit swaps the copy in. Units of work are
//! therefore fully serialized. Rows inserted with a non-zero id keep it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{EntityStore, StoreError, StoreResult, UnitOfWork};
use crate::models::{
    AppWorkflow, Application, Artifact, Attribute, CdPipeline, CiMaterial, CiPipeline, CustomTag,
    ExternalCiEndpoint, GitMaterial, NodeKind, PipelineHistory, PipelineStage,
    WorkflowNodeMapping, WorkflowRun,
};

trait Row: Clone {
    const ENTITY: &'static str;
    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
}

macro_rules! impl_row {
    ($($ty:ty => $entity:literal),+ $(,)?) => {
        $(impl Row for $ty {
            const ENTITY: &'static str = $entity;
            fn id(&self) -> i64 {
                self.id
            }
            fn set_id(&mut self, id: i64) {
                self.id = id;
            }
        })+
    };
}

impl_row! {
    Application => "application",
    GitMaterial => "git material",
    AppWorkflow => "app workflow",
    CiPipeline => "ci pipeline",
    CiMaterial => "ci material",
    ExternalCiEndpoint => "external ci",
    WorkflowNodeMapping => "workflow mapping",
    CdPipeline => "cd pipeline",
    WorkflowRun => "workflow run",
    Artifact => "artifact",
    CustomTag => "custom tag",
    PipelineStage => "pipeline stage",
    PipelineHistory => "pipeline history",
}

#[derive(Debug, Clone)]
struct Table<T> {
    rows: BTreeMap<i64, T>,
    last_id: i64,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            last_id: 0,
        }
    }
}

impl<T: Row> Table<T> {
    fn insert(&mut self, mut row: T) -> T {
        let id = if row.id() != 0 {
            row.id()
        } else {
            self.last_id + 1
        };
        self.last_id = self.last_id.max(id);
        row.set_id(id);
        self.rows.insert(id, row.clone());
        row
    }

    fn update(&mut self, row: &T) -> StoreResult<()> {
        match self.rows.get_mut(&row.id()) {
            Some(slot) => {
                *slot = row.clone();
                Ok(())
            }
            None => Err(StoreError::not_found(T::ENTITY, row.id())),
        }
    }

    fn get(&self, id: i64) -> Option<T> {
        self.rows.get(&id).cloned()
    }

    fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows.values().filter(|r| pred(r)).cloned().collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    apps: Table<Application>,
    attributes: BTreeMap<String, Attribute>,
    git_materials: Table<GitMaterial>,
    workflows: Table<AppWorkflow>,
    ci_pipelines: Table<CiPipeline>,
    ci_materials: Table<CiMaterial>,
    external_cis: Table<ExternalCiEndpoint>,
    mappings: Table<WorkflowNodeMapping>,
    cd_pipelines: Table<CdPipeline>,
    runs: Table<WorkflowRun>,
    artifacts: Table<Artifact>,
    custom_tags: Table<CustomTag>,
    stages: Table<PipelineStage>,
    history: Table<PipelineHistory>,
}

impl MemoryState {
    fn check_pipeline_name(&self, pipeline: &CiPipeline) -> StoreResult<()> {
        if !pipeline.is_live() {
            return Ok(());
        }
        let clash = self.ci_pipelines.rows.values().any(|p| {
            p.id != pipeline.id
                && p.is_live()
                && p.app_id == pipeline.app_id
                && p.name == pipeline.name
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "ci_pipelines (app_id, name) = ({}, {})",
                pipeline.app_id, pipeline.name
            )));
        }
        Ok(())
    }

    fn check_checkout_path(&self, material: &GitMaterial) -> StoreResult<()> {
        if !material.active {
            return Ok(());
        }
        let clash = self.git_materials.rows.values().any(|m| {
            m.id != material.id
                && m.active
                && m.app_id == material.app_id
                && m.checkout_path == material.checkout_path
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "ci_git_materials (app_id, checkout_path) = ({}, {})",
                material.app_id, material.checkout_path
            )));
        }
        Ok(())
    }
}

/// Entity store backed by process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    commit_failures: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` commits fail with a transient error.
    pub fn fail_next_commits(&self, n: usize) {
        self.commit_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            work,
            commit_failures: self.commit_failures.clone(),
        }))
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
    commit_failures: Arc<AtomicUsize>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn insert_app(&mut self, app: Application) -> StoreResult<Application> {
        Ok(self.work.apps.insert(app))
    }

    async fn find_app(&mut self, id: i64) -> StoreResult<Option<Application>> {
        Ok(self.work.apps.get(id))
    }

    async fn find_attribute(&mut self, key: &str) -> StoreResult<Option<Attribute>> {
        Ok(self.work.attributes.get(key).filter(|a| a.active).cloned())
    }

    async fn upsert_attribute(&mut self, attribute: Attribute) -> StoreResult<()> {
        self.work
            .attributes
            .insert(attribute.key.clone(), attribute);
        Ok(())
    }

    async fn insert_git_material(&mut self, material: GitMaterial) -> StoreResult<GitMaterial> {
        self.work.check_checkout_path(&material)?;
        Ok(self.work.git_materials.insert(material))
    }

    async fn update_git_material(&mut self, material: &GitMaterial) -> StoreResult<()> {
        self.work.check_checkout_path(material)?;
        self.work.git_materials.update(material)
    }

    async fn find_git_material(&mut self, id: i64) -> StoreResult<Option<GitMaterial>> {
        Ok(self.work.git_materials.get(id))
    }

    async fn find_git_materials_by_app(&mut self, app_id: i64) -> StoreResult<Vec<GitMaterial>> {
        Ok(self
            .work
            .git_materials
            .filter(|m| m.app_id == app_id && m.active))
    }

    async fn insert_workflow(&mut self, workflow: AppWorkflow) -> StoreResult<AppWorkflow> {
        Ok(self.work.workflows.insert(workflow))
    }

    async fn find_workflow(&mut self, id: i64) -> StoreResult<Option<AppWorkflow>> {
        Ok(self.work.workflows.get(id))
    }

    async fn insert_ci_pipeline(&mut self, pipeline: CiPipeline) -> StoreResult<CiPipeline> {
        self.work.check_pipeline_name(&pipeline)?;
        Ok(self.work.ci_pipelines.insert(pipeline))
    }

    async fn update_ci_pipeline(&mut self, pipeline: &CiPipeline) -> StoreResult<()> {
        self.work.check_pipeline_name(pipeline)?;
        self.work.ci_pipelines.update(pipeline)
    }

    async fn find_ci_pipeline(&mut self, id: i64) -> StoreResult<Option<CiPipeline>> {
        Ok(self.work.ci_pipelines.get(id))
    }

    async fn find_active_by_app_id(&mut self, app_id: i64) -> StoreResult<Vec<CiPipeline>> {
        Ok(self
            .work
            .ci_pipelines
            .filter(|p| p.app_id == app_id && p.is_live()))
    }

    async fn find_active_by_app_and_name(
        &mut self,
        app_id: i64,
        name: &str,
    ) -> StoreResult<Option<CiPipeline>> {
        Ok(self
            .work
            .ci_pipelines
            .filter(|p| p.app_id == app_id && p.name == name && p.is_live())
            .into_iter()
            .next())
    }

    async fn find_by_parent_ci_id(&mut self, parent_ci_id: i64) -> StoreResult<Vec<CiPipeline>> {
        Ok(self
            .work
            .ci_pipelines
            .filter(|p| p.parent_ci_id == Some(parent_ci_id) && p.is_live()))
    }

    async fn insert_ci_materials(
        &mut self,
        materials: Vec<CiMaterial>,
    ) -> StoreResult<Vec<CiMaterial>> {
        Ok(materials
            .into_iter()
            .map(|m| self.work.ci_materials.insert(m))
            .collect())
    }

    async fn update_ci_materials(&mut self, materials: &[CiMaterial]) -> StoreResult<()> {
        for material in materials {
            self.work.ci_materials.update(material)?;
        }
        Ok(())
    }

    async fn find_ci_material(&mut self, id: i64) -> StoreResult<Option<CiMaterial>> {
        Ok(self.work.ci_materials.get(id))
    }

    async fn find_ci_materials_by_pipeline(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Vec<CiMaterial>> {
        Ok(self
            .work
            .ci_materials
            .filter(|m| m.ci_pipeline_id == ci_pipeline_id && m.active))
    }

    async fn find_ci_materials_by_git_material(
        &mut self,
        git_material_id: i64,
    ) -> StoreResult<Vec<CiMaterial>> {
        Ok(self
            .work
            .ci_materials
            .filter(|m| m.git_material_id == git_material_id && m.active))
    }

    async fn insert_external_ci(
        &mut self,
        endpoint: ExternalCiEndpoint,
    ) -> StoreResult<ExternalCiEndpoint> {
        Ok(self.work.external_cis.insert(endpoint))
    }

    async fn update_external_ci(&mut self, endpoint: &ExternalCiEndpoint) -> StoreResult<()> {
        self.work.external_cis.update(endpoint)
    }

    async fn find_external_ci(&mut self, id: i64) -> StoreResult<Option<ExternalCiEndpoint>> {
        Ok(self.work.external_cis.get(id))
    }

    async fn find_external_ci_by_pipeline(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Option<ExternalCiEndpoint>> {
        Ok(self
            .work
            .external_cis
            .filter(|e| e.ci_pipeline_id == ci_pipeline_id && e.active)
            .into_iter()
            .next())
    }

    async fn insert_mapping(
        &mut self,
        mapping: WorkflowNodeMapping,
    ) -> StoreResult<WorkflowNodeMapping> {
        Ok(self.work.mappings.insert(mapping))
    }

    async fn update_mapping(&mut self, mapping: &WorkflowNodeMapping) -> StoreResult<()> {
        self.work.mappings.update(mapping)
    }

    async fn find_mappings_by_workflow(
        &mut self,
        workflow_id: i64,
    ) -> StoreResult<Vec<WorkflowNodeMapping>> {
        Ok(self
            .work
            .mappings
            .filter(|m| m.workflow_id == workflow_id && m.active))
    }

    async fn find_mappings_by_child(
        &mut self,
        child_id: i64,
        child_kind: NodeKind,
    ) -> StoreResult<Vec<WorkflowNodeMapping>> {
        Ok(self
            .work
            .mappings
            .filter(|m| m.child_id == child_id && m.child_kind == child_kind && m.active))
    }

    async fn find_mappings_by_parent(
        &mut self,
        parent_id: i64,
        parent_kind: NodeKind,
    ) -> StoreResult<Vec<WorkflowNodeMapping>> {
        Ok(self.work.mappings.filter(|m| {
            m.parent_id == parent_id && m.parent_kind == Some(parent_kind) && m.active
        }))
    }

    async fn insert_cd_pipeline(&mut self, pipeline: CdPipeline) -> StoreResult<CdPipeline> {
        Ok(self.work.cd_pipelines.insert(pipeline))
    }

    async fn update_cd_pipeline(&mut self, pipeline: &CdPipeline) -> StoreResult<()> {
        self.work.cd_pipelines.update(pipeline)
    }

    async fn find_cd_pipeline(&mut self, id: i64) -> StoreResult<Option<CdPipeline>> {
        Ok(self.work.cd_pipelines.get(id))
    }

    async fn insert_run(&mut self, run: WorkflowRun) -> StoreResult<WorkflowRun> {
        Ok(self.work.runs.insert(run))
    }

    async fn update_run(&mut self, run: &WorkflowRun) -> StoreResult<()> {
        self.work.runs.update(run)
    }

    async fn find_run(&mut self, id: i64) -> StoreResult<Option<WorkflowRun>> {
        Ok(self.work.runs.get(id))
    }

    async fn find_run_for_update(&mut self, id: i64) -> StoreResult<Option<WorkflowRun>> {
        // The unit of work already holds the store lock.
        Ok(self.work.runs.get(id))
    }

    async fn find_last_run_by_ci_id(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Option<WorkflowRun>> {
        Ok(self
            .work
            .runs
            .rows
            .values()
            .rev()
            .find(|r| r.ci_pipeline_id == ci_pipeline_id)
            .cloned())
    }

    async fn find_runs_by_ci_id_paged(
        &mut self,
        ci_pipeline_id: i64,
        offset: i64,
        limit: i64,
    ) -> StoreResult<Vec<WorkflowRun>> {
        Ok(self
            .work
            .runs
            .rows
            .values()
            .rev()
            .filter(|r| r.ci_pipeline_id == ci_pipeline_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn find_runs_in_status_started_before(
        &mut self,
        statuses: &[&str],
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<WorkflowRun>> {
        Ok(self.work.runs.filter(|r| {
            r.started_on < before && statuses.iter().any(|s| *s == r.status)
        }))
    }

    async fn insert_artifacts(&mut self, artifacts: Vec<Artifact>) -> StoreResult<Vec<Artifact>> {
        Ok(artifacts
            .into_iter()
            .map(|a| self.work.artifacts.insert(a))
            .collect())
    }

    async fn find_artifact(&mut self, id: i64) -> StoreResult<Option<Artifact>> {
        Ok(self.work.artifacts.get(id))
    }

    async fn find_artifacts_by_parent(
        &mut self,
        parent_artifact_id: i64,
    ) -> StoreResult<Vec<Artifact>> {
        Ok(self
            .work
            .artifacts
            .filter(|a| a.parent_artifact_id == Some(parent_artifact_id)))
    }

    async fn insert_custom_tag(&mut self, tag: CustomTag) -> StoreResult<CustomTag> {
        Ok(self.work.custom_tags.insert(tag))
    }

    async fn update_custom_tag(&mut self, tag: &CustomTag) -> StoreResult<()> {
        self.work.custom_tags.update(tag)
    }

    async fn find_custom_tag(
        &mut self,
        entity_key: &str,
        entity_value: &str,
    ) -> StoreResult<Option<CustomTag>> {
        Ok(self
            .work
            .custom_tags
            .filter(|t| t.entity_key == entity_key && t.entity_value == entity_value && t.active)
            .into_iter()
            .next())
    }

    async fn insert_stage(&mut self, stage: PipelineStage) -> StoreResult<PipelineStage> {
        Ok(self.work.stages.insert(stage))
    }

    async fn update_stage(&mut self, stage: &PipelineStage) -> StoreResult<()> {
        self.work.stages.update(stage)
    }

    async fn find_stages_by_pipeline(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Vec<PipelineStage>> {
        Ok(self
            .work
            .stages
            .filter(|s| s.ci_pipeline_id == ci_pipeline_id && s.active))
    }

    async fn insert_history(&mut self, entry: PipelineHistory) -> StoreResult<PipelineHistory> {
        Ok(self.work.history.insert(entry))
    }

    async fn find_history_by_pipeline(
        &mut self,
        ci_pipeline_id: i64,
    ) -> StoreResult<Vec<PipelineHistory>> {
        let mut entries = self
            .work
            .history
            .filter(|h| h.ci_pipeline_id == ci_pipeline_id);
        entries.reverse();
        Ok(entries)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryUnitOfWork {
            mut guard,
            work,
            commit_failures,
        } = *self;
        let injected = commit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Transient("injected commit failure".into()));
        }
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PipelineKind;

    fn pipeline(app_id: i64, name: &str) -> CiPipeline {
        CiPipeline {
            id: 0,
            app_id,
            name: name.to_string(),
            kind: PipelineKind::Direct,
            manual_trigger: false,
            scan_enabled: false,
            docker_args: Default::default(),
            parent_ci_id: None,
            active: true,
            deleted: false,
            docker_config_overridden: false,
            docker_config_override: None,
            updated_by: 1,
            updated_on: Utc::now(),
        }
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.insert_ci_pipeline(pipeline(1, "build")).await.unwrap();
        drop(uow);

        let mut uow = store.begin().await.unwrap();
        assert!(uow.find_active_by_app_id(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let created = uow.insert_ci_pipeline(pipeline(1, "build")).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let found = uow.find_ci_pipeline(created.id).await.unwrap();
        assert_eq!(found, Some(created));
    }

    #[tokio::test]
    async fn live_names_are_unique_per_app() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.insert_ci_pipeline(pipeline(1, "build")).await.unwrap();
        let err = uow.insert_ci_pipeline(pipeline(1, "build")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        uow.insert_ci_pipeline(pipeline(2, "build")).await.unwrap();
    }

    #[tokio::test]
    async fn injected_commit_failure_is_transient_and_one_shot() {
        let store = InMemoryStore::new();
        store.fail_next_commits(1);
        let uow = store.begin().await.unwrap();
        assert!(matches!(uow.commit().await, Err(StoreError::Transient(_))));
        let uow = store.begin().await.unwrap();
        assert!(uow.commit().await.is_ok());
    }

    #[tokio::test]
    async fn explicit_ids_are_kept_and_sequence_moves_past_them() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let mut seeded = pipeline(7, "seeded");
        seeded.id = 42;
        assert_eq!(uow.insert_ci_pipeline(seeded).await.unwrap().id, 42);
        assert_eq!(uow.insert_ci_pipeline(pipeline(7, "next")).await.unwrap().id, 43);
    }
}
