//! Shared engine context and the commit/side-effect plumbing every service uses.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::clients::{
    DeploymentDispatcher, HttpDeploymentDispatcher, HttpNotificationBus, HttpSourceNotifier,
    HttpWorkflowExecutor, NotificationBus, PipelineMaterialSync, RepoMaterial, SourceNotifier,
    WorkflowExecutor,
};
use crate::config::CiConfig;
use crate::error::{EngineResult, Warning};
use crate::store::{EntityStore, UnitOfWork};

/// Everything a service needs: the store, the collaborators and config.
#[derive(Clone)]
pub struct CiContext {
    pub store: Arc<dyn EntityStore>,
    pub notifier: Arc<dyn SourceNotifier>,
    pub bus: Arc<dyn NotificationBus>,
    pub dispatcher: Arc<dyn DeploymentDispatcher>,
    pub executor: Arc<dyn WorkflowExecutor>,
    pub config: CiConfig,
    /// External CI webhook URL stem, resolved on first use.
    pub(crate) webhook_url: Arc<RwLock<Option<String>>>,
}

impl CiContext {
    pub fn new(
        store: Arc<dyn EntityStore>,
        notifier: Arc<dyn SourceNotifier>,
        bus: Arc<dyn NotificationBus>,
        dispatcher: Arc<dyn DeploymentDispatcher>,
        executor: Arc<dyn WorkflowExecutor>,
        config: CiConfig,
    ) -> Self {
        let configured = Some(config.external_ci_web_hook_url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        Self {
            store,
            notifier,
            bus,
            dispatcher,
            executor,
            config,
            webhook_url: Arc::new(RwLock::new(configured)),
        }
    }

    /// Context wired to the HTTP collaborators named in `config`.
    pub fn with_http_clients(store: Arc<dyn EntityStore>, config: CiConfig) -> Self {
        let notifier = Arc::new(HttpSourceNotifier::new(&config.git_sensor_url));
        let bus = Arc::new(HttpNotificationBus::new(&config.notifier_url));
        let dispatcher = Arc::new(HttpDeploymentDispatcher::new(&config.dispatcher_url));
        let executor = Arc::new(HttpWorkflowExecutor::new(&config.executor_url));
        Self::new(store, notifier, bus, dispatcher, executor, config)
    }

    /// Runs post-commit Source Notifier calls. Failures become warnings.
    pub async fn flush(&self, effects: Vec<SideEffect>) -> Vec<Warning> {
        let mut warnings = Vec::new();
        for effect in effects {
            let call = effect.name();
            let result = match &effect {
                SideEffect::SavePipelineMaterials(materials) => {
                    if materials.is_empty() {
                        continue;
                    }
                    self.notifier.save_pipeline_materials(materials).await
                }
                SideEffect::AddRepos(repos) => self.notifier.add_repos(repos).await,
                SideEffect::UpdateRepo(repo) => self.notifier.update_repo(repo).await,
            };
            if let Err(e) = result {
                tracing::warn!(call, error = %e, "source notifier call failed after commit");
                crate::metrics::notifier_degraded(call);
                warnings.push(Warning::NotifierDegraded(format!("{call}: {e}")));
            }
        }
        warnings
    }
}

/// A Source Notifier call staged during a unit of work, run after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    SavePipelineMaterials(Vec<PipelineMaterialSync>),
    AddRepos(Vec<RepoMaterial>),
    UpdateRepo(RepoMaterial),
}

impl SideEffect {
    fn name(&self) -> &'static str {
        match self {
            Self::SavePipelineMaterials(_) => "save_pipeline_materials",
            Self::AddRepos(_) => "add_repos",
            Self::UpdateRepo(_) => "update_repo",
        }
    }
}

/// Commits `uow` when `result` is Ok, rolls it back otherwise.
pub async fn finish<T>(uow: Box<dyn UnitOfWork>, result: EngineResult<T>) -> EngineResult<T> {
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rb) = uow.rollback().await {
                tracing::warn!(error = %rb, "rollback failed");
            }
            Err(e)
        }
    }
}
