//! Stale-run sweeper: background task that fails runs the executor has
//! forgotten about.

use std::time::Duration;

use chrono::Utc;

use super::context::{finish, CiContext};
use crate::error::EngineResult;
use crate::models::run::is_terminal;
use crate::models::{ExecutorType, WorkflowRun};

const STALE_STATUSES: [&str; 4] = ["Starting", "Running", "STARTING", "RUNNING"];
const STATUS_MARKED_FAILED: &str = "Failed";
const MESSAGE_MARKED_FAILED: &str = "marked failed by job";

/// Run the sweeper loop forever. Spawned as a background tokio task.
pub async fn run_sweeper(ctx: CiContext) {
    tracing::info!(
        interval_secs = ctx.config.sweep_interval_secs,
        timeout_mins = ctx.config.run_failure_timeout_mins,
        "Stale run sweeper started"
    );

    loop {
        match sweep_stale_runs(&ctx).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(failed = n, "Stale runs marked failed"),
            Err(e) => tracing::error!("Sweeper error: {e}"),
        }
        tokio::time::sleep(Duration::from_secs(ctx.config.sweep_interval_secs.max(1))).await;
    }
}

/// Marks stale system runs failed when the executor no longer knows their
/// workflow. Returns how many runs were failed.
pub async fn sweep_stale_runs(ctx: &CiContext) -> EngineResult<usize> {
    let cutoff = Utc::now() - chrono::Duration::minutes(ctx.config.run_failure_timeout_mins);

    let mut uow = ctx.store.begin().await?;
    let result = uow
        .find_runs_in_status_started_before(&STALE_STATUSES, cutoff)
        .await
        .map_err(Into::into);
    let candidates: Vec<WorkflowRun> = finish(uow, result).await?;

    let mut lost = Vec::new();
    for run in candidates
        .into_iter()
        .filter(|r| r.executor_type == ExecutorType::System)
    {
        match ctx.executor.workflow_exists(&run.name, &run.namespace).await {
            Ok(true) => {}
            Ok(false) => lost.push(run.id),
            Err(e) => {
                tracing::warn!(run_id = run.id, error = %e, "executor lookup failed, skipping run");
            }
        }
    }
    if lost.is_empty() {
        return Ok(0);
    }

    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<usize> = async {
        let mut failed = 0;
        for run_id in &lost {
            let Some(mut run) = uow.find_run_for_update(*run_id).await? else {
                continue;
            };
            // An event may have landed since the scan. A terminal pod keeps
            // its own message and finish time.
            if !STALE_STATUSES.contains(&run.status.as_str()) || is_terminal(&run.pod_status) {
                continue;
            }
            run.status = STATUS_MARKED_FAILED.to_string();
            run.pod_status = STATUS_MARKED_FAILED.to_string();
            run.message = MESSAGE_MARKED_FAILED.to_string();
            run.finished_on = Some(Utc::now());
            uow.update_run(&run).await?;
            crate::metrics::workflow_status_updated(STATUS_MARKED_FAILED);
            failed += 1;
        }
        Ok(failed)
    }
    .await;
    finish(uow, result).await
}
