//! Inbound webhooks: external CI artifact announcements and executor
//! workflow status events.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ApiError, ApiResponse, ApiResult, CiRouterState};
use crate::error::EngineError;
use crate::events::WorkflowStatusEvent;
use crate::services::external_ci::{self, ArtifactWebhook};
use crate::services::workflow_status::{self, ReconcileResult};

#[derive(Debug, Deserialize)]
pub struct ApiKeyQuery {
    #[serde(rename = "apiKey", default)]
    pub api_key: String,
}

/// Malformed bodies are a 400 in the envelope, not axum's plain rejection.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(EngineError::invalid(format!("malformed payload: {e}"))))
}

/// `POST /orchestrator/webhook/ext-ci/{external_ci_id}?apiKey=`
pub async fn external_ci(
    State(state): State<CiRouterState>,
    Path(external_ci_id): Path<i64>,
    Query(query): Query<ApiKeyQuery>,
    body: Bytes,
) -> ApiResult<i64> {
    crate::metrics::webhook_received("external-ci");

    let payload: ArtifactWebhook = parse_body(&body)?;
    let artifact_id =
        external_ci::ingest(&state.ctx, external_ci_id, &query.api_key, payload).await?;
    Ok(Json(ApiResponse::ok(artifact_id)))
}

/// `POST /orchestrator/webhook/ci/workflow-status`
pub async fn workflow_status(
    State(state): State<CiRouterState>,
    body: Bytes,
) -> ApiResult<ReconcileResult> {
    crate::metrics::webhook_received("workflow-status");

    let event: WorkflowStatusEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError(EngineError::malformed(e.to_string())))?;
    let result = workflow_status::reconcile(&state.ctx, &event).await?;
    Ok(Json(ApiResponse::ok(result)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_empty() {
        let query: ApiKeyQuery = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(query.api_key.is_empty());
    }

    #[test]
    fn garbage_body_is_a_validation_error() {
        let err = parse_body::<ArtifactWebhook>(&Bytes::from_static(b"{not json")).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
