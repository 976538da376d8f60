//! Workflow Executor: the system that runs CI workflows.

use async_trait::async_trait;
use reqwest::Method;

use super::{ClientError, ClientResult, JsonClient};

#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    async fn terminate_workflow(&self, name: &str, namespace: &str) -> ClientResult<()>;
    async fn workflow_exists(&self, name: &str, namespace: &str) -> ClientResult<bool>;
}

pub struct HttpWorkflowExecutor {
    client: JsonClient,
}

impl HttpWorkflowExecutor {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: JsonClient::new("workflow-executor", base_url),
        }
    }
}

#[async_trait]
impl WorkflowExecutor for HttpWorkflowExecutor {
    async fn terminate_workflow(&self, name: &str, namespace: &str) -> ClientResult<()> {
        let path = format!("api/v1/workflows/{namespace}/{name}/terminate");
        self.client
            .fire(Method::PUT, &path, &serde_json::json!({ "name": name, "namespace": namespace }))
            .await
    }

    async fn workflow_exists(&self, name: &str, namespace: &str) -> ClientResult<bool> {
        let path = format!("api/v1/workflows/{namespace}/{name}");
        match self.client.status_of(Method::GET, &path).await? {
            200..=299 => Ok(true),
            404 => Ok(false),
            status => Err(ClientError::Status {
                service: "workflow-executor",
                status,
                body: String::new(),
            }),
        }
    }
}
