//! Pipeline configuration history.

use chrono::Utc;

use super::context::{finish, CiContext};
use crate::error::{EngineError, EngineResult};
use crate::models::{CiPipeline, HistoryTrigger, PipelineHistory};
use crate::store::UnitOfWork;

/// Snapshots `pipeline` with its current materials and stages.
pub async fn record(
    uow: &mut dyn UnitOfWork,
    pipeline: &CiPipeline,
    trigger: HistoryTrigger,
    user_id: i64,
) -> EngineResult<PipelineHistory> {
    let materials = uow.find_ci_materials_by_pipeline(pipeline.id).await?;
    let stages = uow.find_stages_by_pipeline(pipeline.id).await?;
    let snapshot = serde_json::json!({
        "pipeline": pipeline,
        "materials": materials,
        "stages": stages,
    });

    let entry = uow
        .insert_history(PipelineHistory {
            id: 0,
            ci_pipeline_id: pipeline.id,
            trigger,
            snapshot,
            created_by: user_id,
            created_on: Utc::now(),
        })
        .await?;
    tracing::debug!(ci_pipeline_id = pipeline.id, %trigger, "pipeline history recorded");
    Ok(entry)
}

/// History of a pipeline, newest first. Deleted pipelines keep theirs.
pub async fn list(ctx: &CiContext, ci_pipeline_id: i64) -> EngineResult<Vec<PipelineHistory>> {
    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        uow.find_ci_pipeline(ci_pipeline_id)
            .await?
            .ok_or_else(|| EngineError::not_found("ci pipeline", ci_pipeline_id))?;
        Ok(uow.find_history_by_pipeline(ci_pipeline_id).await?)
    }
    .await;
    finish(uow, result).await
}
