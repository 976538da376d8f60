//! Source Notifier (git sensor): tracks branches, tags and commits for the
//! configured git materials.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{ClientResult, JsonClient};
use crate::models::{CiMaterial, GitMaterial, SourceType};

/// A git repository as registered with the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RepoMaterial {
    pub id: i64,
    #[serde(rename = "GitProviderId")]
    pub provider_id: i64,
    pub url: String,
    pub name: String,
    #[serde(rename = "CheckoutLocation")]
    pub checkout_path: String,
    pub fetch_submodules: bool,
    pub deleted: bool,
}

impl From<&GitMaterial> for RepoMaterial {
    fn from(m: &GitMaterial) -> Self {
        Self {
            id: m.id,
            provider_id: m.provider_id,
            url: m.url.clone(),
            name: m.name.clone(),
            checkout_path: m.checkout_path.clone(),
            fetch_submodules: m.fetch_submodules,
            deleted: !m.active,
        }
    }
}

/// A CI material's desired state as tracked by the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PipelineMaterialSync {
    pub id: i64,
    pub git_material_id: i64,
    #[serde(rename = "Type")]
    pub source_type: SourceType,
    pub value: String,
    pub active: bool,
}

impl From<&CiMaterial> for PipelineMaterialSync {
    fn from(m: &CiMaterial) -> Self {
        Self {
            id: m.id,
            git_material_id: m.git_material_id,
            source_type: m.source_type,
            value: m.value.clone(),
            active: m.active,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GitCommit {
    pub commit: String,
    pub author: String,
    pub date: Option<DateTime<Utc>>,
    pub message: String,
    #[serde(default)]
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialChanges {
    #[serde(default)]
    pub commits: Vec<GitCommit>,
    pub last_fetch_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_repo_error: bool,
    #[serde(default)]
    pub repo_error_msg: String,
    #[serde(default)]
    pub is_branch_error: bool,
    #[serde(default)]
    pub branch_error_msg: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResult {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error_msg: String,
    pub last_fetch_time: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait SourceNotifier: Send + Sync {
    async fn add_repos(&self, repos: &[RepoMaterial]) -> ClientResult<()>;
    async fn update_repo(&self, repo: &RepoMaterial) -> ClientResult<()>;
    /// Idempotent; callers omit regex-typed materials.
    async fn save_pipeline_materials(&self, materials: &[PipelineMaterialSync])
        -> ClientResult<()>;
    async fn fetch_changes(
        &self,
        pipeline_material_id: i64,
        show_all: bool,
    ) -> ClientResult<MaterialChanges>;
    async fn refresh_git_material(&self, git_material_id: i64) -> ClientResult<RefreshResult>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchChangesRequest {
    pipeline_material_id: i64,
    show_all: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    git_material_id: i64,
}

pub struct HttpSourceNotifier {
    client: JsonClient,
}

impl HttpSourceNotifier {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: JsonClient::new("git-sensor", base_url),
        }
    }
}

#[async_trait]
impl SourceNotifier for HttpSourceNotifier {
    async fn add_repos(&self, repos: &[RepoMaterial]) -> ClientResult<()> {
        self.client.fire(Method::POST, "git-repo", repos).await
    }

    async fn update_repo(&self, repo: &RepoMaterial) -> ClientResult<()> {
        self.client.fire(Method::PUT, "git-repo", repo).await
    }

    async fn save_pipeline_materials(
        &self,
        materials: &[PipelineMaterialSync],
    ) -> ClientResult<()> {
        tracing::debug!(count = materials.len(), "syncing pipeline materials");
        self.client
            .fire(Method::POST, "git-pipeline-material", materials)
            .await
    }

    async fn fetch_changes(
        &self,
        pipeline_material_id: i64,
        show_all: bool,
    ) -> ClientResult<MaterialChanges> {
        let req = FetchChangesRequest {
            pipeline_material_id,
            show_all,
        };
        self.client.call(Method::POST, "git-changes", &req).await
    }

    async fn refresh_git_material(&self, git_material_id: i64) -> ClientResult<RefreshResult> {
        let req = RefreshRequest { git_material_id };
        self.client.call(Method::POST, "git-repo/refresh", &req).await
    }
}
