//! Shared harness: an engine context over the in-memory store and the
//! recording collaborators, plus seed helpers.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rstest::fixture;

use ci_lifecycle::clients::{
    RecordingDispatcher, RecordingExecutor, RecordingNotificationBus, RecordingSourceNotifier,
};
use ci_lifecycle::models::{
    AppWorkflow, Application, ArtifactUploaded, CdPipeline, ExecutorType, GitMaterial, NodeKind,
    PipelineKind, SourceType, WorkflowNodeMapping, WorkflowRun,
};
use ci_lifecycle::services::material::MaterialRequest;
use ci_lifecycle::services::{
    patch, PatchAction, PatchRequest, PatchResponse, PipelineRequest,
};
use ci_lifecycle::store::{EntityStore, InMemoryStore, UnitOfWork};
use ci_lifecycle::{CiConfig, CiContext};

pub const APP_ID: i64 = 7;
pub const GIT_MATERIAL_ID: i64 = 9;
pub const WORKFLOW_ID: i64 = 3;
pub const USER_ID: i64 = 2;

pub struct Harness {
    pub store: InMemoryStore,
    pub notifier: Arc<RecordingSourceNotifier>,
    pub bus: Arc<RecordingNotificationBus>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub executor: Arc<RecordingExecutor>,
    pub ctx: CiContext,
}

#[fixture]
pub fn harness() -> Harness {
    Harness::with_config(CiConfig {
        external_ci_api_secret: "test-secret".into(),
        ci_auto_trigger_batch_size: 2,
        ..CiConfig::default()
    })
}

impl Harness {
    pub fn with_config(config: CiConfig) -> Self {
        let store = InMemoryStore::new();
        let notifier = Arc::new(RecordingSourceNotifier::new());
        let bus = Arc::new(RecordingNotificationBus::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let executor = Arc::new(RecordingExecutor::new());
        let ctx = CiContext::new(
            Arc::new(store.clone()),
            notifier.clone(),
            bus.clone(),
            dispatcher.clone(),
            executor.clone(),
            config,
        );
        Self {
            store,
            notifier,
            bus,
            dispatcher,
            executor,
            ctx,
        }
    }

    /// App 7 with git material 9 checked out at `./` and an empty workflow 3.
    pub async fn seeded(self) -> Self {
        let mut uow = self.uow().await;
        uow.insert_app(Application {
            id: APP_ID,
            name: "payments".into(),
            project_id: 1,
            active: true,
        })
        .await
        .unwrap();
        uow.insert_git_material(GitMaterial {
            id: GIT_MATERIAL_ID,
            app_id: APP_ID,
            name: "1-payments".into(),
            url: "https://git.example/payments.git".into(),
            checkout_path: "./".into(),
            provider_id: 1,
            fetch_submodules: false,
            active: true,
        })
        .await
        .unwrap();
        uow.insert_workflow(AppWorkflow {
            id: WORKFLOW_ID,
            app_id: APP_ID,
            name: "wf-payments".into(),
            active: true,
        })
        .await
        .unwrap();
        uow.commit().await.unwrap();
        self
    }

    pub async fn uow(&self) -> Box<dyn UnitOfWork> {
        self.store.begin().await.unwrap()
    }

    pub async fn create(&self, req: PatchRequest) -> PatchResponse {
        patch(&self.ctx, &req).await.unwrap().result
    }

    pub async fn insert_run(&self, run: WorkflowRun) -> WorkflowRun {
        let mut uow = self.uow().await;
        let run = uow.insert_run(run).await.unwrap();
        uow.commit().await.unwrap();
        run
    }

    pub async fn run(&self, id: i64) -> WorkflowRun {
        self.uow().await.find_run(id).await.unwrap().unwrap()
    }

    /// Hangs CD pipeline `cd_id` below `parent` in `workflow_id`.
    pub async fn attach_cd(
        &self,
        workflow_id: i64,
        parent: (i64, NodeKind),
        cd_id: i64,
        ci_pipeline_id: i64,
    ) {
        let mut uow = self.uow().await;
        uow.insert_cd_pipeline(CdPipeline {
            id: cd_id,
            app_id: APP_ID,
            ci_pipeline_id,
            name: format!("deploy-{cd_id}"),
            active: true,
        })
        .await
        .unwrap();
        uow.insert_mapping(WorkflowNodeMapping {
            id: 0,
            workflow_id,
            parent_id: parent.0,
            parent_kind: Some(parent.1),
            child_id: cd_id,
            child_kind: NodeKind::CdPipeline,
            active: true,
        })
        .await
        .unwrap();
        uow.commit().await.unwrap();
    }
}

pub fn material(source_type: SourceType, value: &str, regex: &str) -> MaterialRequest {
    MaterialRequest {
        id: 0,
        git_material_id: GIT_MATERIAL_ID,
        source_type,
        value: value.into(),
        regex: regex.into(),
        deleted: false,
    }
}

pub fn create_request(name: &str, kind: PipelineKind, materials: Vec<MaterialRequest>) -> PatchRequest {
    PatchRequest {
        action: PatchAction::Create,
        app_id: APP_ID,
        app_workflow_id: 0,
        user_id: USER_ID,
        ci_pipeline: PipelineRequest {
            name: name.into(),
            kind: Some(kind),
            materials,
            ..PipelineRequest::default()
        },
        switch_from_ci_pipeline_id: 0,
    }
}

pub fn direct_request(name: &str, branch: &str) -> PatchRequest {
    create_request(
        name,
        PipelineKind::Direct,
        vec![material(SourceType::BranchFixed, branch, "")],
    )
}

pub fn linked_request(name: &str, parent_ci_id: i64) -> PatchRequest {
    let mut req = create_request(name, PipelineKind::Linked, vec![]);
    req.ci_pipeline.parent_ci_id = Some(parent_ci_id);
    req
}

pub fn run(id: i64, ci_pipeline_id: i64, status: &str, executor_type: ExecutorType) -> WorkflowRun {
    WorkflowRun {
        id,
        ci_pipeline_id,
        name: format!("{id}-wf"),
        status: status.into(),
        pod_status: status.into(),
        pod_name: String::new(),
        namespace: "devtron-ci".into(),
        message: String::new(),
        started_on: Utc::now(),
        finished_on: None,
        log_location: None,
        git_triggers: BTreeMap::new(),
        artifact_id: None,
        is_artifact_uploaded: ArtifactUploaded::Unknown,
        blob_storage_enabled: true,
        executor_type,
        triggered_by: USER_ID,
    }
}

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .unwrap()
        .with_timezone(&Utc)
}
