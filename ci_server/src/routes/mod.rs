//! HTTP surface: webhook intake and the admin API.
//!
//! Every response is the `{code, status, result, error?, warnings?}`
//! envelope. Engine errors map onto HTTP status codes in one place.

pub mod api;
pub mod webhook;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::Serialize;

use crate::error::{EngineError, Outcome, Warning};
use crate::services::CiContext;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct CiRouterState {
    pub ctx: CiContext,
}

/// Build the router. Path parameters sharing a position use the same name
/// so routes stay unambiguous: `{id}` is an app id or a pipeline id
/// depending on the route.
pub fn ci_router(state: CiRouterState) -> Router {
    Router::new()
        // Webhooks
        .route(
            "/orchestrator/webhook/ext-ci/{external_ci_id}",
            post(webhook::external_ci),
        )
        .route(
            "/orchestrator/webhook/ci/workflow-status",
            post(webhook::workflow_status),
        )
        // CI pipelines
        .route("/orchestrator/app/ci-pipeline/patch", post(api::patch_pipeline))
        .route("/orchestrator/app/ci-pipeline/patch-regex", post(api::patch_regex))
        .route(
            "/orchestrator/app/ci-pipeline/workflow/{run_id}/cancel",
            post(api::cancel_run),
        )
        .route("/orchestrator/app/ci-pipeline/{id}", get(api::app_ci_config))
        .route(
            "/orchestrator/app/ci-pipeline/{id}/{pipeline_id}",
            get(api::get_pipeline),
        )
        .route("/orchestrator/app/ci-pipeline/{id}/history", get(api::pipeline_history))
        .route("/orchestrator/app/ci-pipeline/{id}/workflows", get(api::list_runs))
        .route(
            "/orchestrator/app/ci-pipeline/{id}/custom-tag/next",
            post(api::next_tag),
        )
        .route(
            "/orchestrator/app/ci-pipeline/{id}/{pipeline_id}/workflow/{run_id}",
            get(api::get_run),
        )
        .route(
            "/orchestrator/app/ci-pipeline/{id}/external-ci/{external_ci_id}",
            get(api::external_ci_config),
        )
        .route(
            "/orchestrator/app/ci-pipeline/{id}/material/{git_material_id}/changes",
            get(api::material_changes),
        )
        // Git materials
        .route(
            "/orchestrator/app/material",
            post(api::create_materials).put(api::update_material),
        )
        .route(
            "/orchestrator/app/material/{git_material_id}/refresh",
            post(api::refresh_material),
        )
        .route(
            "/orchestrator/app/{id}/material/{git_material_id}",
            delete(api::delete_material),
        )
        // Attributes
        .route("/orchestrator/attributes/host-url", put(api::update_host_url))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(result: T) -> Self {
        Self::with_warnings(result, Vec::new())
    }

    pub fn with_warnings(result: T, warnings: Vec<Warning>) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            status: status_text(StatusCode::OK),
            result: Some(result),
            error: None,
            warnings,
        }
    }
}

impl<T: Serialize> From<Outcome<T>> for ApiResponse<T> {
    fn from(outcome: Outcome<T>) -> Self {
        Self::with_warnings(outcome.result, outcome.warnings)
    }
}

fn status_text(code: StatusCode) -> String {
    code.canonical_reason().unwrap_or("Unknown").to_string()
}

/// Engine error rendered as an envelope.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::AuthFailed => StatusCode::UNAUTHORIZED,
            EngineError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Upstream(_) => StatusCode::BAD_GATEWAY,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "request failed");
        } else {
            tracing::debug!(kind = self.0.kind(), error = %self.0, "request rejected");
        }
        let body = ApiResponse::<()> {
            code: status.as_u16(),
            status: status_text(status),
            result: None,
            error: Some(ErrorBody {
                kind: self.0.kind(),
                message: self.0.to_string(),
            }),
            warnings: Vec::new(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConflictKind, ValidationKind};
    use rstest::rstest;

    #[rstest]
    #[case(EngineError::not_found("ci pipeline", 42), StatusCode::NOT_FOUND)]
    #[case(EngineError::Conflict(ConflictKind::BuildInProgress), StatusCode::CONFLICT)]
    #[case(
        EngineError::Validation(ValidationKind::RegexMismatch { material_ids: vec![1] }),
        StatusCode::BAD_REQUEST
    )]
    #[case(EngineError::AuthFailed, StatusCode::UNAUTHORIZED)]
    #[case(EngineError::Transient("deadlock".into()), StatusCode::SERVICE_UNAVAILABLE)]
    #[case(EngineError::Upstream("executor down".into()), StatusCode::BAD_GATEWAY)]
    fn engine_errors_map_to_status(#[case] err: EngineError, #[case] expected: StatusCode) {
        assert_eq!(ApiError(err).status(), expected);
    }

    #[test]
    fn envelope_omits_empty_parts() {
        let json = serde_json::to_value(ApiResponse::ok(17)).unwrap();
        assert_eq!(json, serde_json::json!({"code": 200, "status": "OK", "result": 17}));
    }

    #[test]
    fn warnings_ride_along_with_result() {
        let outcome = Outcome::new("done", vec![Warning::NotifierDegraded("add_repos".into())]);
        let json = serde_json::to_value(ApiResponse::from(outcome)).unwrap();
        assert_eq!(json["warnings"][0]["kind"], "NotifierDegraded");
        assert_eq!(json["result"], "done");
    }
}
