//! Recording in-memory collaborators.
//!
//! Each records what it was asked to do and can be told to fail, so callers
//! can observe post-commit side effects and degraded paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{
    CiSuccess, ClientError, ClientResult, DeploymentDispatcher, MaterialChanges,
    NotificationBus, PipelineMaterialSync, RefreshResult, RepoMaterial, SourceNotifier,
    WorkflowExecutor,
};
use crate::events::NotificationEvent;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn check(failing: &AtomicBool, service: &'static str) -> ClientResult<()> {
    if failing.load(Ordering::SeqCst) {
        return Err(ClientError::Unavailable {
            service,
            message: "injected failure".to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierCall {
    AddRepos(Vec<RepoMaterial>),
    UpdateRepo(RepoMaterial),
    SavePipelineMaterials(Vec<PipelineMaterialSync>),
}

#[derive(Default)]
pub struct RecordingSourceNotifier {
    calls: Mutex<Vec<NotifierCall>>,
    tracked: Mutex<BTreeMap<i64, PipelineMaterialSync>>,
    changes: Mutex<BTreeMap<i64, MaterialChanges>>,
    failing: AtomicBool,
}

impl RecordingSourceNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<NotifierCall> {
        lock(&self.calls).clone()
    }

    /// Every `save_pipeline_materials` batch, in call order.
    pub fn saved_batches(&self) -> Vec<Vec<PipelineMaterialSync>> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                NotifierCall::SavePipelineMaterials(batch) => Some(batch.clone()),
                _ => None,
            })
            .collect()
    }

    /// Current tracked state of every pipeline material, by id.
    pub fn tracked(&self) -> BTreeMap<i64, PipelineMaterialSync> {
        lock(&self.tracked).clone()
    }

    pub fn set_changes(&self, pipeline_material_id: i64, changes: MaterialChanges) {
        lock(&self.changes).insert(pipeline_material_id, changes);
    }
}

#[async_trait]
impl SourceNotifier for RecordingSourceNotifier {
    async fn add_repos(&self, repos: &[RepoMaterial]) -> ClientResult<()> {
        check(&self.failing, "git-sensor")?;
        lock(&self.calls).push(NotifierCall::AddRepos(repos.to_vec()));
        Ok(())
    }

    async fn update_repo(&self, repo: &RepoMaterial) -> ClientResult<()> {
        check(&self.failing, "git-sensor")?;
        lock(&self.calls).push(NotifierCall::UpdateRepo(repo.clone()));
        Ok(())
    }

    async fn save_pipeline_materials(
        &self,
        materials: &[PipelineMaterialSync],
    ) -> ClientResult<()> {
        check(&self.failing, "git-sensor")?;
        lock(&self.calls).push(NotifierCall::SavePipelineMaterials(materials.to_vec()));
        let mut tracked = lock(&self.tracked);
        for m in materials {
            tracked.insert(m.id, m.clone());
        }
        Ok(())
    }

    async fn fetch_changes(
        &self,
        pipeline_material_id: i64,
        _show_all: bool,
    ) -> ClientResult<MaterialChanges> {
        check(&self.failing, "git-sensor")?;
        Ok(lock(&self.changes)
            .get(&pipeline_material_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn refresh_git_material(&self, git_material_id: i64) -> ClientResult<RefreshResult> {
        check(&self.failing, "git-sensor")?;
        Ok(RefreshResult {
            message: format!("refreshed {git_material_id}"),
            ..RefreshResult::default()
        })
    }
}

#[derive(Default)]
pub struct RecordingNotificationBus {
    events: Mutex<Vec<NotificationEvent>>,
    failing: AtomicBool,
}

impl RecordingNotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        lock(&self.events).clone()
    }
}

#[async_trait]
impl NotificationBus for RecordingNotificationBus {
    async fn write_notification_event(&self, event: &NotificationEvent) -> ClientResult<()> {
        check(&self.failing, "notifier")?;
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    requests: Mutex<Vec<CiSuccess>>,
    failing: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CiSuccess> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl DeploymentDispatcher for RecordingDispatcher {
    async fn handle_ci_success(&self, request: CiSuccess) -> ClientResult<()> {
        lock(&self.requests).push(request);
        check(&self.failing, "deployment-dispatcher")
    }
}

/// Executor that knows a fixed set of live workflows.
#[derive(Default)]
pub struct RecordingExecutor {
    live: Mutex<BTreeSet<String>>,
    terminated: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn add_workflow(&self, name: &str) {
        lock(&self.live).insert(name.to_string());
    }

    pub fn terminated(&self) -> Vec<String> {
        lock(&self.terminated).clone()
    }
}

#[async_trait]
impl WorkflowExecutor for RecordingExecutor {
    async fn terminate_workflow(&self, name: &str, _namespace: &str) -> ClientResult<()> {
        check(&self.failing, "workflow-executor")?;
        lock(&self.live).remove(name);
        lock(&self.terminated).push(name.to_string());
        Ok(())
    }

    async fn workflow_exists(&self, name: &str, _namespace: &str) -> ClientResult<bool> {
        check(&self.failing, "workflow-executor")?;
        Ok(lock(&self.live).contains(name))
    }
}
