//! Admin API: pipeline patching, reads, build history and git materials.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;

use super::{ApiResponse, ApiResult, CiRouterState};
use crate::clients::{MaterialChanges, RefreshResult};
use crate::models::{CiMaterial, GitMaterial, PipelineHistory, WorkflowRun};
use crate::services::app_config::{self, AppCiConfig, PipelineView};
use crate::services::external_ci::{self, ExternalCiConfig};
use crate::services::git_material::{
    self, CreateMaterialsRequest, RegexValue, UpdateMaterialRequest,
};
use crate::services::workflow_status::{self, DEFAULT_PAGE_SIZE};
use crate::services::{custom_tag, history, pipeline_patch, PatchRequest, PatchResponse};

// ── CI pipelines ──

pub async fn patch_pipeline(
    State(state): State<CiRouterState>,
    Json(req): Json<PatchRequest>,
) -> ApiResult<PatchResponse> {
    let outcome = pipeline_patch::patch(&state.ctx, &req).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
pub struct RegexPatchRequest {
    pub materials: Vec<RegexValue>,
}

pub async fn patch_regex(
    State(state): State<CiRouterState>,
    Json(req): Json<RegexPatchRequest>,
) -> ApiResult<Vec<CiMaterial>> {
    let outcome = git_material::patch_regex(&state.ctx, &req.materials).await?;
    Ok(Json(outcome.into()))
}

pub async fn app_ci_config(
    State(state): State<CiRouterState>,
    Path(app_id): Path<i64>,
) -> ApiResult<AppCiConfig> {
    let config = app_config::get_app_ci_config(&state.ctx, app_id).await?;
    Ok(Json(ApiResponse::ok(config)))
}

pub async fn get_pipeline(
    State(state): State<CiRouterState>,
    Path((app_id, ci_pipeline_id)): Path<(i64, i64)>,
) -> ApiResult<PipelineView> {
    let view = app_config::get_pipeline(&state.ctx, app_id, ci_pipeline_id).await?;
    Ok(Json(ApiResponse::ok(view)))
}

pub async fn pipeline_history(
    State(state): State<CiRouterState>,
    Path(ci_pipeline_id): Path<i64>,
) -> ApiResult<Vec<PipelineHistory>> {
    let entries = history::list(&state.ctx, ci_pipeline_id).await?;
    Ok(Json(ApiResponse::ok(entries)))
}

pub async fn next_tag(
    State(state): State<CiRouterState>,
    Path(ci_pipeline_id): Path<i64>,
) -> ApiResult<String> {
    let tag = custom_tag::next_tag(&state.ctx, ci_pipeline_id).await?;
    Ok(Json(ApiResponse::ok(tag)))
}

pub async fn external_ci_config(
    State(state): State<CiRouterState>,
    Path((app_id, external_ci_id)): Path<(i64, i64)>,
) -> ApiResult<ExternalCiConfig> {
    let config = external_ci::external_ci_config(&state.ctx, app_id, external_ci_id).await?;
    Ok(Json(ApiResponse::ok(config)))
}

// ── Build history ──

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub size: Option<i64>,
}

pub async fn list_runs(
    State(state): State<CiRouterState>,
    Path(ci_pipeline_id): Path<i64>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Vec<WorkflowRun>> {
    let size = page.size.unwrap_or(DEFAULT_PAGE_SIZE);
    let runs = workflow_status::get_runs(&state.ctx, ci_pipeline_id, page.offset, size).await?;
    Ok(Json(ApiResponse::ok(runs)))
}

pub async fn get_run(
    State(state): State<CiRouterState>,
    Path((app_id, ci_pipeline_id, run_id)): Path<(i64, i64, i64)>,
) -> ApiResult<WorkflowRun> {
    let run = workflow_status::get_run(&state.ctx, app_id, ci_pipeline_id, run_id).await?;
    Ok(Json(ApiResponse::ok(run)))
}

pub async fn cancel_run(
    State(state): State<CiRouterState>,
    Path(run_id): Path<i64>,
) -> ApiResult<WorkflowRun> {
    let run = workflow_status::cancel(&state.ctx, run_id).await?;
    Ok(Json(ApiResponse::ok(run)))
}

// ── Git materials ──

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesQuery {
    #[serde(default)]
    pub show_all: bool,
}

pub async fn material_changes(
    State(state): State<CiRouterState>,
    Path((ci_pipeline_id, git_material_id)): Path<(i64, i64)>,
    Query(query): Query<ChangesQuery>,
) -> ApiResult<MaterialChanges> {
    let changes = git_material::fetch_material_changes(
        &state.ctx,
        ci_pipeline_id,
        git_material_id,
        query.show_all,
    )
    .await?;
    Ok(Json(ApiResponse::ok(changes)))
}

pub async fn create_materials(
    State(state): State<CiRouterState>,
    Json(req): Json<CreateMaterialsRequest>,
) -> ApiResult<Vec<GitMaterial>> {
    let outcome = git_material::create_materials(&state.ctx, &req).await?;
    Ok(Json(outcome.into()))
}

pub async fn update_material(
    State(state): State<CiRouterState>,
    Json(req): Json<UpdateMaterialRequest>,
) -> ApiResult<GitMaterial> {
    let outcome = git_material::update_material(&state.ctx, &req).await?;
    Ok(Json(outcome.into()))
}

pub async fn delete_material(
    State(state): State<CiRouterState>,
    Path((app_id, git_material_id)): Path<(i64, i64)>,
) -> ApiResult<GitMaterial> {
    let outcome = git_material::delete_material(&state.ctx, app_id, git_material_id).await?;
    Ok(Json(outcome.into()))
}

pub async fn refresh_material(
    State(state): State<CiRouterState>,
    Path(git_material_id): Path<i64>,
) -> ApiResult<RefreshResult> {
    let refreshed = git_material::refresh_git_material(&state.ctx, git_material_id).await?;
    Ok(Json(ApiResponse::ok(refreshed)))
}

// ── Attributes ──

#[derive(Debug, Deserialize)]
pub struct HostUrlRequest {
    pub url: String,
}

pub async fn update_host_url(
    State(state): State<CiRouterState>,
    Json(req): Json<HostUrlRequest>,
) -> ApiResult<String> {
    external_ci::update_host_url(&state.ctx, &req.url).await?;
    Ok(Json(ApiResponse::ok(req.url)))
}
