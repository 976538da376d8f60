//! Read side of an application's CI configuration.

use std::collections::BTreeMap;

use serde::Serialize;

use super::context::{finish, CiContext};
use crate::error::{EngineError, EngineResult};
use crate::models::custom_tag::ENTITY_KEY_CI_PIPELINE;
use crate::models::{CiMaterial, CiPipeline, CustomTag, PipelineStage};
use crate::store::UnitOfWork;

/// One pipeline with everything hanging off it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineView {
    #[serde(flatten)]
    pub pipeline: CiPipeline,
    pub materials: Vec<CiMaterial>,
    pub stages: Vec<PipelineStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ci_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_tag: Option<CustomTag>,
    /// Linked children in this app, grouped under their parent.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub linked: Vec<PipelineView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCiConfig {
    pub app_id: i64,
    pub ci_pipelines: Vec<PipelineView>,
}

async fn view(uow: &mut dyn UnitOfWork, pipeline: CiPipeline) -> EngineResult<PipelineView> {
    let materials = uow.find_ci_materials_by_pipeline(pipeline.id).await?;
    let stages = uow
        .find_stages_by_pipeline(pipeline.id)
        .await?
        .into_iter()
        .filter(|s| s.active)
        .collect();
    let external_ci_id = if pipeline.is_external() {
        uow.find_external_ci_by_pipeline(pipeline.id)
            .await?
            .map(|e| e.id)
    } else {
        None
    };
    let custom_tag = uow
        .find_custom_tag(ENTITY_KEY_CI_PIPELINE, &pipeline.id.to_string())
        .await?
        .filter(|t| t.active && t.enabled);
    Ok(PipelineView {
        pipeline,
        materials,
        stages,
        external_ci_id,
        custom_tag,
        linked: Vec::new(),
    })
}

/// Groups linked children under the parent they name. Children whose
/// parent lives in another app stay at the top level.
fn group_linked(views: Vec<PipelineView>) -> Vec<PipelineView> {
    let mut children: BTreeMap<i64, Vec<PipelineView>> = BTreeMap::new();
    let mut top = Vec::new();
    let ids: Vec<i64> = views.iter().map(|v| v.pipeline.id).collect();

    for v in views {
        match v.pipeline.parent_ci_id {
            Some(parent) if ids.contains(&parent) => children.entry(parent).or_default().push(v),
            _ => top.push(v),
        }
    }
    for parent in &mut top {
        if let Some(linked) = children.remove(&parent.pipeline.id) {
            parent.linked = linked;
        }
    }
    top
}

pub async fn get_app_ci_config(ctx: &CiContext, app_id: i64) -> EngineResult<AppCiConfig> {
    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        uow.find_app(app_id)
            .await?
            .filter(|a| a.active)
            .ok_or_else(|| EngineError::not_found("application", app_id))?;

        let mut views = Vec::new();
        for pipeline in uow.find_active_by_app_id(app_id).await? {
            views.push(view(uow.as_mut(), pipeline).await?);
        }
        Ok(group_linked(views))
    }
    .await;
    let ci_pipelines = finish(uow, result).await?;
    Ok(AppCiConfig {
        app_id,
        ci_pipelines,
    })
}

pub async fn get_pipeline(
    ctx: &CiContext,
    app_id: i64,
    ci_pipeline_id: i64,
) -> EngineResult<PipelineView> {
    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        let pipeline = uow
            .find_ci_pipeline(ci_pipeline_id)
            .await?
            .filter(|p| p.is_live() && p.app_id == app_id)
            .ok_or_else(|| EngineError::not_found("ci pipeline", ci_pipeline_id))?;
        view(uow.as_mut(), pipeline).await
    }
    .await;
    finish(uow, result).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PipelineKind;
    use chrono::Utc;

    fn pipeline_view(id: i64, parent: Option<i64>) -> PipelineView {
        PipelineView {
            pipeline: CiPipeline {
                id,
                app_id: 7,
                name: format!("p{id}"),
                kind: if parent.is_some() {
                    PipelineKind::Linked
                } else {
                    PipelineKind::Direct
                },
                manual_trigger: false,
                scan_enabled: false,
                docker_args: Default::default(),
                parent_ci_id: parent,
                active: true,
                deleted: false,
                docker_config_overridden: false,
                docker_config_override: None,
                updated_by: 1,
                updated_on: Utc::now(),
            },
            materials: vec![],
            stages: vec![],
            external_ci_id: None,
            custom_tag: None,
            linked: vec![],
        }
    }

    #[test]
    fn linked_children_nest_under_parent() {
        let grouped = group_linked(vec![
            pipeline_view(10, None),
            pipeline_view(11, Some(10)),
            pipeline_view(12, Some(10)),
            pipeline_view(13, None),
        ]);
        assert_eq!(grouped.len(), 2);
        let linked: Vec<i64> = grouped[0].linked.iter().map(|v| v.pipeline.id).collect();
        assert_eq!(linked, vec![11, 12]);
        assert!(grouped[1].linked.is_empty());
    }

    #[test]
    fn child_of_foreign_parent_stays_top_level() {
        let grouped = group_linked(vec![pipeline_view(20, Some(99))]);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].pipeline.id, 20);
    }
}
