//! Execution reconciler: folds executor status events into workflow runs.
//!
//! Events for one run are serialized by a row lock on the run. Once the
//! pod status is terminal, later events can no longer touch the message
//! or the finish time.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;

use super::context::{finish, CiContext};
use crate::config::CI_STAGE_FAIL_CODE;
use crate::error::{ConflictKind, EngineError, EngineResult};
use crate::events::{CiNodeStatus, NotificationEvent, NotificationKind, WorkflowStatusEvent};
use crate::models::run::{
    is_cancelled, is_failure, is_terminal, MESSAGE_TERMINATED, POD_STATUS_FAILED,
    STATUS_CANCELLED,
};
use crate::models::{ArtifactUploaded, ExecutorType, WorkflowRun};
use crate::store::UnitOfWork;

static ERROR_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// First integer in a failure message, or -1.
pub fn extract_error_code(message: &str) -> i64 {
    ERROR_CODE
        .find(message)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(-1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub run_id: i64,
    pub changed: bool,
}

/// Next state of `current` after an event whose CI node is `node`.
pub fn transition(
    current: &WorkflowRun,
    node: &CiNodeStatus,
    event: &WorkflowStatusEvent,
) -> WorkflowRun {
    let mut next = current.clone();
    let pod_was_terminal = is_terminal(&current.pod_status);

    if !pod_was_terminal {
        next.message = node.message.clone();
        if !is_terminal(&current.status) {
            next.finished_on = event.finished_at;
        }
    }
    if !is_cancelled(&current.status) {
        next.status = event.phase.clone();
    }
    next.pod_status = node.pod_phase.clone();

    if current.executor_type == ExecutorType::System && is_cancelled(&next.status) {
        next.pod_status = POD_STATUS_FAILED.to_string();
        if !pod_was_terminal {
            next.message = MESSAGE_TERMINATED.to_string();
        }
    }

    next.name = node.run_name.clone();
    next.pod_name = node.pod_name.clone();
    if let Some(location) = &node.log_location {
        next.log_location = Some(location.clone());
    }
    next
}

/// Applies one executor event to its run.
pub async fn reconcile(
    ctx: &CiContext,
    event: &WorkflowStatusEvent,
) -> EngineResult<ReconcileResult> {
    let node = event
        .ci_node()
        .ok_or_else(|| EngineError::malformed("event has no ci node"))?;
    let run_id = node.run_id().ok_or_else(|| {
        EngineError::malformed(format!("run name '{}' carries no run id", node.run_name))
    })?;

    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        let current = uow
            .find_run_for_update(run_id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow run", run_id))?;
        let next = transition(&current, &node, event);
        if next == current {
            return Ok((current, next, None));
        }
        uow.update_run(&next).await?;
        let app_id = uow
            .find_ci_pipeline(next.ci_pipeline_id)
            .await?
            .map(|p| p.app_id);
        Ok((current, next, app_id))
    }
    .await;
    let (previous, run, app_id) = finish(uow, result).await?;

    let changed = previous != run;
    if !changed {
        tracing::debug!(run_id, "workflow status unchanged");
        return Ok(ReconcileResult { run_id, changed });
    }

    crate::metrics::workflow_status_updated(&run.status);
    tracing::info!(
        run_id,
        status = %run.status,
        pod_status = %run.pod_status,
        "workflow run updated"
    );

    if is_failure(&run.status) && !is_failure(&previous.status) {
        notify_failure(ctx, &run, app_id.unwrap_or_default()).await;
    }
    Ok(ReconcileResult { run_id, changed })
}

async fn notify_failure(ctx: &CiContext, run: &WorkflowRun, app_id: i64) {
    let code = extract_error_code(&run.message);
    if code == CI_STAGE_FAIL_CODE {
        tracing::info!(run_id = run.id, "ci stage failed with re-trigger code, not notifying");
        return;
    }
    let materials = serde_json::to_value(&run.git_triggers).unwrap_or_default();
    let event = NotificationEvent::ci(
        NotificationKind::Fail,
        run.ci_pipeline_id,
        app_id,
        run.triggered_by,
    )
    .with_run(run.id)
    .with_materials(materials);
    if let Err(e) = ctx.bus.write_notification_event(&event).await {
        tracing::error!(run_id = run.id, error = %e, "failure notification failed");
    }
}

/// Cancels a run that is still in progress. System runs are terminated in
/// the executor before the status is written.
pub async fn cancel(ctx: &CiContext, run_id: i64) -> EngineResult<WorkflowRun> {
    let mut uow = ctx.store.begin().await?;
    let result = uow
        .find_run(run_id)
        .await
        .map_err(EngineError::from)
        .and_then(|run| run.ok_or_else(|| EngineError::not_found("workflow run", run_id)));
    let run = finish(uow, result).await?;
    ensure_cancellable(&run)?;

    if run.executor_type == ExecutorType::System {
        ctx.executor
            .terminate_workflow(&run.name, &run.namespace)
            .await?;
    }

    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        let mut run = uow
            .find_run_for_update(run_id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow run", run_id))?;
        ensure_cancellable(&run)?;
        run.status = STATUS_CANCELLED.to_string();
        if run.executor_type == ExecutorType::System {
            run.pod_status = POD_STATUS_FAILED.to_string();
            run.message = MESSAGE_TERMINATED.to_string();
        }
        run.finished_on = Some(Utc::now());
        uow.update_run(&run).await?;
        Ok(run)
    }
    .await;
    let run = finish(uow, result).await?;

    crate::metrics::workflow_status_updated(&run.status);
    tracing::info!(run_id, "workflow run cancelled");
    Ok(run)
}

fn ensure_cancellable(run: &WorkflowRun) -> EngineResult<()> {
    if run.in_progress() {
        return Ok(());
    }
    Err(EngineError::Conflict(ConflictKind::RunNotCancellable {
        run_id: run.id,
        status: run.status.clone(),
    }))
}

/// Fills in the upload flag of runs written before it existed.
async fn migrate_upload_flag(uow: &mut dyn UnitOfWork, run: &mut WorkflowRun) -> EngineResult<()> {
    if run.is_artifact_uploaded != ArtifactUploaded::Unknown {
        return Ok(());
    }
    let Some(artifact_id) = run.artifact_id else {
        return Ok(());
    };
    if let Some(artifact) = uow.find_artifact(artifact_id).await? {
        run.is_artifact_uploaded = ArtifactUploaded::from(artifact.is_artifact_uploaded);
        uow.update_run(run).await?;
        tracing::debug!(run_id = run.id, "artifact upload flag migrated");
    }
    Ok(())
}

pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Runs of a pipeline, newest first.
pub async fn get_runs(
    ctx: &CiContext,
    ci_pipeline_id: i64,
    offset: i64,
    size: i64,
) -> EngineResult<Vec<WorkflowRun>> {
    let size = if size > 0 { size } else { DEFAULT_PAGE_SIZE };
    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        uow.find_ci_pipeline(ci_pipeline_id)
            .await?
            .ok_or_else(|| EngineError::not_found("ci pipeline", ci_pipeline_id))?;
        let mut runs = uow
            .find_runs_by_ci_id_paged(ci_pipeline_id, offset.max(0), size)
            .await?;
        for run in &mut runs {
            migrate_upload_flag(uow.as_mut(), run).await?;
        }
        Ok(runs)
    }
    .await;
    finish(uow, result).await
}

pub async fn get_run(
    ctx: &CiContext,
    app_id: i64,
    ci_pipeline_id: i64,
    run_id: i64,
) -> EngineResult<WorkflowRun> {
    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        let belongs = uow
            .find_ci_pipeline(ci_pipeline_id)
            .await?
            .is_some_and(|p| p.app_id == app_id);
        let mut run = uow
            .find_run(run_id)
            .await?
            .filter(|r| belongs && r.ci_pipeline_id == ci_pipeline_id)
            .ok_or_else(|| EngineError::not_found("workflow run", run_id))?;
        migrate_upload_flag(uow.as_mut(), &mut run).await?;
        Ok(run)
    }
    .await;
    finish(uow, result).await
}
