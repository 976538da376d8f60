//! Outbound collaborators: Source Notifier, Notification Bus, Deployment
//! Dispatcher and Workflow Executor.
//!
//! Each collaborator is a trait with a reqwest-backed implementation and a
//! recording in-memory implementation used by `--in-memory` mode and tests.

pub mod dispatcher;
pub mod executor;
pub mod memory;
pub mod notification;
pub mod source_notifier;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dispatcher::{CiSuccess, DeploymentDispatcher, HttpDeploymentDispatcher};
pub use executor::{HttpWorkflowExecutor, WorkflowExecutor};
pub use memory::{
    NotifierCall, RecordingDispatcher, RecordingExecutor, RecordingNotificationBus,
    RecordingSourceNotifier,
};
pub use notification::{HttpNotificationBus, NotificationBus};
pub use source_notifier::{
    GitCommit, HttpSourceNotifier, MaterialChanges, PipelineMaterialSync, RefreshResult,
    RepoMaterial, SourceNotifier,
};

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{service} request failed: {source}")]
    Request {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },
}

/// `{code, status, result}` envelope used by the collaborator services.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    result: Option<T>,
}

/// Shared request plumbing for the HTTP collaborators.
#[derive(Clone, Debug)]
pub(crate) struct JsonClient {
    service: &'static str,
    base_url: String,
    http: reqwest::Client,
}

impl JsonClient {
    pub(crate) fn new(service: &'static str, base_url: &str) -> Self {
        Self {
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> ClientResult<reqwest::Response> {
        let service = self.service;
        let resp = req
            .send()
            .await
            .map_err(|source| ClientError::Request { service, source })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(service, status, body = %body, "collaborator call rejected");
            return Err(ClientError::Status {
                service,
                status,
                body,
            });
        }
        Ok(resp)
    }

    /// Sends `body` and unwraps the `result` field of the response envelope.
    pub(crate) async fn call<B, T>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Default,
    {
        let service = self.service;
        let resp = self
            .send(self.http.request(method, self.url(path)).json(body))
            .await?;
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|source| ClientError::Request { service, source })?;
        Ok(envelope.result.unwrap_or_default())
    }

    /// Sends `body` and ignores the response payload.
    pub(crate) async fn fire<B>(&self, method: reqwest::Method, path: &str, body: &B) -> ClientResult<()>
    where
        B: Serialize + ?Sized,
    {
        self.send(self.http.request(method, self.url(path)).json(body))
            .await?;
        Ok(())
    }

    /// Issues a bodyless request and returns the raw status code.
    pub(crate) async fn status_of(&self, method: reqwest::Method, path: &str) -> ClientResult<u16> {
        let service = self.service;
        let resp = self
            .http
            .request(method, self.url(path))
            .send()
            .await
            .map_err(|source| ClientError::Request { service, source })?;
        Ok(resp.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slashes() {
        let client = JsonClient::new("git-sensor", "http://sensor:9999/");
        assert_eq!(client.url("/git-repo"), "http://sensor:9999/git-repo");
        assert_eq!(client.url("git-changes"), "http://sensor:9999/git-changes");
    }

    #[test]
    fn envelope_without_result_is_default() {
        let env: Envelope<Vec<i64>> = serde_json::from_str(r#"{"code":200,"status":"OK"}"#).unwrap();
        assert!(env.result.is_none());
    }
}
