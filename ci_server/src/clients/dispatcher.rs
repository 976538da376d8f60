//! Downstream Deployment Dispatcher: triggers CD for a new artifact.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{ClientResult, JsonClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiSuccess {
    pub artifact_id: i64,
    pub is_manual: bool,
    #[serde(rename = "async")]
    pub async_mode: bool,
    pub user_id: i64,
}

#[async_trait]
pub trait DeploymentDispatcher: Send + Sync {
    async fn handle_ci_success(&self, request: CiSuccess) -> ClientResult<()>;
}

pub struct HttpDeploymentDispatcher {
    client: JsonClient,
}

impl HttpDeploymentDispatcher {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: JsonClient::new("deployment-dispatcher", base_url),
        }
    }
}

#[async_trait]
impl DeploymentDispatcher for HttpDeploymentDispatcher {
    async fn handle_ci_success(&self, request: CiSuccess) -> ClientResult<()> {
        self.client
            .fire(Method::POST, "ci-success", &request)
            .await
    }
}
