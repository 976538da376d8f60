//! Pipeline patch engine: CREATE, UPDATE_SOURCE, DELETE and SWITCH.
//!
//! Each patch is one unit of work. Source Notifier calls are staged as
//! [`SideEffect`]s and only run once the unit of work has committed; a
//! transient storage failure retries the whole unit once.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::context::{finish, CiContext, SideEffect};
use super::custom_tag::{self, CustomTagRequest};
use super::external_ci::{self, IssuedEndpoint};
use super::graph::{self, Node};
use super::history;
use super::material::{self, MaterialRequest};
use crate::error::{ConflictKind, EngineError, EngineResult, Outcome, ValidationKind};
use crate::models::{
    string_enum, AppWorkflow, CiMaterial, CiPipeline, DockerConfigOverride, HistoryTrigger,
    PipelineKind, PipelineStage, StageStep, StageType, WorkflowNodeMapping,
};
use crate::store::UnitOfWork;

string_enum! {
    pub enum PatchAction {
        Create => "CREATE",
        UpdateSource => "UPDATE_SOURCE",
        Delete => "DELETE",
        Switch => "SWITCH",
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRequest {
    pub action: PatchAction,
    pub app_id: i64,
    /// Workflow to create the pipeline in; 0 creates a new one.
    #[serde(default)]
    pub app_workflow_id: i64,
    #[serde(default)]
    pub user_id: i64,
    pub ci_pipeline: PipelineRequest,
    /// Pipeline replaced by a SWITCH, or by a CREATE of an external pipeline.
    #[serde(default)]
    pub switch_from_ci_pipeline_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "pipelineType")]
    pub kind: Option<PipelineKind>,
    #[serde(default, rename = "isManual")]
    pub manual_trigger: bool,
    #[serde(default)]
    pub scan_enabled: bool,
    #[serde(default)]
    pub docker_args: BTreeMap<String, String>,
    #[serde(default, rename = "parentCiPipeline")]
    pub parent_ci_id: Option<i64>,
    #[serde(default)]
    pub docker_config_override: Option<DockerConfigOverride>,
    #[serde(default, rename = "ciMaterial")]
    pub materials: Vec<MaterialRequest>,
    #[serde(default)]
    pub pre_build_stage: Vec<StageStep>,
    #[serde(default)]
    pub post_build_stage: Vec<StageStep>,
    #[serde(default)]
    pub custom_tag: Option<CustomTagRequest>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchResponse {
    pub app_workflow_id: i64,
    pub ci_pipeline: CiPipeline,
    pub materials: Vec<CiMaterial>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ci: Option<IssuedEndpoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteMode {
    /// Removes the pipeline and all its edges.
    Full,
    /// Removes only the root edge; descendants wait to be reparented.
    Switch,
}

/// Applies one patch. Notifier failures after commit come back as warnings.
pub async fn patch(ctx: &CiContext, req: &PatchRequest) -> EngineResult<Outcome<PatchResponse>> {
    let action = req.action;
    let mut retried = false;
    let staged = loop {
        match patch_once(ctx, req).await {
            Err(e) if e.is_transient() && !retried => {
                tracing::warn!(%action, error = %e, "transient failure, retrying patch");
                retried = true;
            }
            other => break other,
        }
    };

    match staged {
        Ok((response, effects)) => {
            crate::metrics::pipeline_patched(action.as_str(), "ok");
            let warnings = ctx.flush(effects).await;
            Ok(Outcome::new(response, warnings))
        }
        Err(e) => {
            crate::metrics::pipeline_patched(action.as_str(), e.kind());
            tracing::info!(%action, app_id = req.app_id, error = %e, "patch rejected");
            Err(e)
        }
    }
}

async fn patch_once(
    ctx: &CiContext,
    req: &PatchRequest,
) -> EngineResult<(PatchResponse, Vec<SideEffect>)> {
    let mut uow = ctx.store.begin().await?;
    let mut effects = Vec::new();
    let result = apply(ctx, uow.as_mut(), req, &mut effects).await;
    let response = finish(uow, result).await?;
    Ok((response, effects))
}

async fn apply(
    ctx: &CiContext,
    uow: &mut dyn UnitOfWork,
    req: &PatchRequest,
    effects: &mut Vec<SideEffect>,
) -> EngineResult<PatchResponse> {
    match req.action {
        PatchAction::Create
            if req.ci_pipeline.kind == Some(PipelineKind::External)
                && req.switch_from_ci_pipeline_id != 0 =>
        {
            switch_in(ctx, uow, req, true, effects).await
        }
        PatchAction::Create => create_in(ctx, uow, req, None, effects).await,
        PatchAction::UpdateSource => update_source_in(uow, req, effects).await,
        PatchAction::Delete => {
            let (pipeline, _) = delete_in(
                uow,
                req.app_id,
                req.ci_pipeline.id,
                req.user_id,
                DeleteMode::Full,
                effects,
            )
            .await?;
            Ok(PatchResponse {
                app_workflow_id: req.app_workflow_id,
                ci_pipeline: pipeline,
                materials: Vec::new(),
                external_ci: None,
            })
        }
        PatchAction::Switch => switch_in(ctx, uow, req, false, effects).await,
    }
}

async fn live_pipeline(
    uow: &mut dyn UnitOfWork,
    app_id: i64,
    id: i64,
) -> EngineResult<CiPipeline> {
    uow.find_ci_pipeline(id)
        .await?
        .filter(|p| p.is_live() && p.app_id == app_id)
        .ok_or_else(|| EngineError::not_found("ci pipeline", id))
}

async fn resolve_workflow(
    uow: &mut dyn UnitOfWork,
    app_id: i64,
    workflow_id: i64,
    pipeline_name: &str,
) -> EngineResult<i64> {
    if workflow_id != 0 {
        let known = uow
            .find_workflow(workflow_id)
            .await?
            .is_some_and(|w| w.active && w.app_id == app_id);
        if !known {
            return Err(EngineError::not_found("app workflow", workflow_id));
        }
        return Ok(workflow_id);
    }
    let workflow = uow
        .insert_workflow(AppWorkflow {
            id: 0,
            app_id,
            name: format!("wf-{app_id}-{pipeline_name}"),
            active: true,
        })
        .await?;
    Ok(workflow.id)
}

async fn save_stages(
    uow: &mut dyn UnitOfWork,
    ci_pipeline_id: i64,
    req: &PipelineRequest,
) -> EngineResult<()> {
    for (stage_type, steps) in [
        (StageType::PreCi, &req.pre_build_stage),
        (StageType::PostCi, &req.post_build_stage),
    ] {
        if steps.is_empty() {
            continue;
        }
        for step in steps {
            step.resolve_inputs().map_err(|e| {
                EngineError::invalid(format!("{stage_type} step '{}': {e}", step.name))
            })?;
        }
        uow.insert_stage(PipelineStage {
            id: 0,
            ci_pipeline_id,
            stage_type,
            steps: steps.clone(),
            active: true,
        })
        .await?;
    }
    Ok(())
}

/// Materials of a new linked pipeline: the parent's, values included.
fn copy_parent_materials(parent: &[CiMaterial], ci_pipeline_id: i64) -> Vec<CiMaterial> {
    parent
        .iter()
        .map(|m| CiMaterial {
            id: 0,
            ci_pipeline_id,
            ..m.clone()
        })
        .collect()
}

async fn create_in(
    ctx: &CiContext,
    uow: &mut dyn UnitOfWork,
    req: &PatchRequest,
    workflow_id: Option<i64>,
    effects: &mut Vec<SideEffect>,
) -> EngineResult<PatchResponse> {
    let p = &req.ci_pipeline;
    let kind = p.kind.unwrap_or(PipelineKind::Direct);
    let name = p.name.trim();
    if name.is_empty() {
        return Err(EngineError::invalid("ci pipeline name is required"));
    }
    if uow
        .find_active_by_app_and_name(req.app_id, name)
        .await?
        .is_some()
    {
        return Err(EngineError::Conflict(ConflictKind::DuplicateName(
            name.to_string(),
        )));
    }
    uow.find_app(req.app_id)
        .await?
        .filter(|a| a.active)
        .ok_or_else(|| EngineError::not_found("application", req.app_id))?;

    let parent = if kind == PipelineKind::Linked {
        let parent_id = p
            .parent_ci_id
            .ok_or_else(|| EngineError::invalid("linked ci pipeline needs a parent"))?;
        let parent = uow
            .find_ci_pipeline(parent_id)
            .await?
            .filter(CiPipeline::is_live)
            .ok_or_else(|| EngineError::not_found("ci pipeline", parent_id))?;
        Some(parent)
    } else {
        None
    };

    let workflow_id = match workflow_id {
        Some(id) => id,
        None => resolve_workflow(uow, req.app_id, req.app_workflow_id, name).await?,
    };

    let (overridden, docker_override) = if kind == PipelineKind::Job {
        (true, Some(DockerConfigOverride::skip_build()))
    } else {
        (
            p.docker_config_override.is_some(),
            p.docker_config_override.clone(),
        )
    };
    let pipeline = uow
        .insert_ci_pipeline(CiPipeline {
            id: 0,
            app_id: req.app_id,
            name: name.to_string(),
            kind,
            manual_trigger: p.manual_trigger,
            scan_enabled: p.scan_enabled || ctx.config.force_security_scanning,
            docker_args: p.docker_args.clone(),
            parent_ci_id: parent.as_ref().map(|pp| pp.id),
            active: true,
            deleted: false,
            docker_config_overridden: overridden,
            docker_config_override: docker_override,
            updated_by: req.user_id,
            updated_on: Utc::now(),
        })
        .await?;

    let mut issued = None;
    let materials = match kind {
        PipelineKind::External => {
            let (endpoint, plain) = external_ci::issue_endpoint(ctx, uow, &pipeline).await?;
            graph::attach_external_ci(uow, workflow_id, endpoint.id).await?;
            issued = Some(plain);
            Vec::new()
        }
        PipelineKind::Linked => {
            let parent_id = pipeline.parent_ci_id.unwrap_or_default();
            let source = uow.find_ci_materials_by_pipeline(parent_id).await?;
            let materials = uow
                .insert_ci_materials(copy_parent_materials(&source, pipeline.id))
                .await?;
            graph::attach_ci(uow, workflow_id, pipeline.id).await?;
            materials
        }
        PipelineKind::Direct | PipelineKind::Job => {
            let materials =
                material::create_materials(uow, req.app_id, pipeline.id, &p.materials).await?;
            graph::attach_ci(uow, workflow_id, pipeline.id).await?;
            materials
        }
    };

    save_stages(uow, pipeline.id, p).await?;
    if let Some(tag) = &p.custom_tag {
        custom_tag::save(uow, pipeline.id, tag).await?;
    }
    history::record(uow, &pipeline, HistoryTrigger::Create, req.user_id).await?;
    graph::validate_workflow(uow, workflow_id).await?;

    effects.push(SideEffect::SavePipelineMaterials(material::sync_list(
        &materials,
    )));
    tracing::info!(
        ci_pipeline_id = pipeline.id,
        app_id = req.app_id,
        workflow_id,
        %kind,
        "ci pipeline created"
    );
    Ok(PatchResponse {
        app_workflow_id: workflow_id,
        ci_pipeline: pipeline,
        materials,
        external_ci: issued,
    })
}

async fn update_source_in(
    uow: &mut dyn UnitOfWork,
    req: &PatchRequest,
    effects: &mut Vec<SideEffect>,
) -> EngineResult<PatchResponse> {
    let mut pipeline = live_pipeline(uow, req.app_id, req.ci_pipeline.id).await?;
    match pipeline.kind {
        PipelineKind::External => {
            return Err(EngineError::invalid("external ci pipelines have no materials"))
        }
        PipelineKind::Linked => {
            return Err(EngineError::invalid(
                "linked ci pipelines take their materials from the parent",
            ))
        }
        PipelineKind::Direct | PipelineKind::Job => {}
    }

    let before = uow.find_ci_materials_by_pipeline(pipeline.id).await?;
    let bound: Vec<i64> = before
        .iter()
        .filter(|m| m.has_scm_binding())
        .map(|m| m.id)
        .collect();
    if !bound.is_empty() {
        return Err(EngineError::Conflict(ConflictKind::PluginScmUnsupported {
            material_ids: bound,
        }));
    }

    let after =
        material::apply_updates(uow, pipeline.app_id, pipeline.id, &req.ci_pipeline.materials)
            .await?;
    let mut synced = with_removed(&before, &after);

    for child in uow.find_by_parent_ci_id(pipeline.id).await? {
        let child_materials = uow.find_ci_materials_by_pipeline(child.id).await?;
        let updated = follow_parent(&child, &child_materials, &after)?;
        uow.update_ci_materials(&updated).await?;
        synced.extend(updated);
    }

    pipeline.updated_by = req.user_id;
    pipeline.updated_on = Utc::now();
    uow.update_ci_pipeline(&pipeline).await?;
    history::record(uow, &pipeline, HistoryTrigger::Update, req.user_id).await?;

    effects.push(SideEffect::SavePipelineMaterials(material::sync_list(
        &synced,
    )));
    tracing::info!(
        ci_pipeline_id = pipeline.id,
        materials = after.len(),
        "ci pipeline source updated"
    );
    Ok(PatchResponse {
        app_workflow_id: req.app_workflow_id,
        ci_pipeline: pipeline,
        materials: after,
        external_ci: None,
    })
}

/// `after` plus inactive copies of the materials it no longer holds.
fn with_removed(before: &[CiMaterial], after: &[CiMaterial]) -> Vec<CiMaterial> {
    let mut all = after.to_vec();
    all.extend(
        before
            .iter()
            .filter(|b| !after.iter().any(|a| a.id == b.id))
            .map(|b| CiMaterial {
                active: false,
                ..b.clone()
            }),
    );
    all
}

/// A linked child's materials re-pointed at its parent's new sources.
fn follow_parent(
    child: &CiPipeline,
    child_materials: &[CiMaterial],
    parent_materials: &[CiMaterial],
) -> EngineResult<Vec<CiMaterial>> {
    parent_materials
        .iter()
        .map(|source| {
            let mut mirror = child_materials
                .iter()
                .find(|m| m.git_material_id == source.git_material_id)
                .cloned()
                .ok_or(EngineError::Validation(
                    ValidationKind::LinkedMaterialMissing {
                        ci_pipeline_id: child.id,
                        git_material_id: source.git_material_id,
                    },
                ))?;
            mirror.source_type = source.source_type;
            mirror.value = source.value.clone();
            mirror.regex = source.regex.clone();
            Ok(mirror)
        })
        .collect()
}

async fn delete_in(
    uow: &mut dyn UnitOfWork,
    app_id: i64,
    ci_pipeline_id: i64,
    user_id: i64,
    mode: DeleteMode,
    effects: &mut Vec<SideEffect>,
) -> EngineResult<(CiPipeline, Option<WorkflowNodeMapping>)> {
    let mut pipeline = live_pipeline(uow, app_id, ci_pipeline_id).await?;
    let node = graph::node_of(uow, &pipeline).await?;

    history::record(uow, &pipeline, HistoryTrigger::Delete, user_id).await?;
    let root = match mode {
        DeleteMode::Full => graph::detach(uow, node).await?,
        DeleteMode::Switch => Some(graph::detach_root(uow, node).await?),
    };

    pipeline.active = false;
    pipeline.deleted = true;
    pipeline.updated_by = user_id;
    pipeline.updated_on = Utc::now();
    uow.update_ci_pipeline(&pipeline).await?;

    let materials: Vec<CiMaterial> = uow
        .find_ci_materials_by_pipeline(pipeline.id)
        .await?
        .into_iter()
        .map(|m| CiMaterial { active: false, ..m })
        .collect();
    uow.update_ci_materials(&materials).await?;

    for mut stage in uow.find_stages_by_pipeline(pipeline.id).await? {
        stage.active = false;
        uow.update_stage(&stage).await?;
    }

    if pipeline.is_external() {
        if let Some(mut endpoint) = uow.find_external_ci_by_pipeline(pipeline.id).await? {
            endpoint.active = false;
            uow.update_external_ci(&endpoint).await?;
        }
    }
    custom_tag::disable(uow, pipeline.id).await?;

    effects.push(SideEffect::SavePipelineMaterials(material::sync_list(
        &materials,
    )));
    tracing::info!(ci_pipeline_id = pipeline.id, ?mode, "ci pipeline deleted");
    Ok((pipeline, root))
}

async fn switch_in(
    ctx: &CiContext,
    uow: &mut dyn UnitOfWork,
    req: &PatchRequest,
    allow_external: bool,
    effects: &mut Vec<SideEffect>,
) -> EngineResult<PatchResponse> {
    let target = req
        .ci_pipeline
        .kind
        .ok_or_else(|| EngineError::invalid("target pipeline type is required"))?;
    if req.switch_from_ci_pipeline_id == 0 {
        return Err(EngineError::invalid("pipeline to switch from is required"));
    }
    let old = live_pipeline(uow, req.app_id, req.switch_from_ci_pipeline_id).await?;
    check_switch(uow, &old, target, allow_external, req.ci_pipeline.parent_ci_id).await?;

    let old_node = graph::node_of(uow, &old).await?;
    let descendants = graph::cd_descendants(uow, old_node).await?;
    let (_, root) = delete_in(
        uow,
        req.app_id,
        old.id,
        req.user_id,
        DeleteMode::Switch,
        effects,
    )
    .await?;
    let workflow_id = root
        .map(|r| r.workflow_id)
        .ok_or_else(|| EngineError::Internal(format!("ci pipeline {} lost its root", old.id)))?;

    let response = create_in(ctx, uow, req, Some(workflow_id), effects).await?;
    let new_node: Node = graph::node_of(uow, &response.ci_pipeline).await?;
    graph::reparent(uow, old_node, new_node).await?;

    let pointer = if target == PipelineKind::External {
        0
    } else {
        response.ci_pipeline.id
    };
    for cd_id in descendants {
        if let Some(mut cd) = uow.find_cd_pipeline(cd_id).await? {
            cd.ci_pipeline_id = pointer;
            uow.update_cd_pipeline(&cd).await?;
        }
    }
    graph::validate_workflow(uow, workflow_id).await?;

    tracing::info!(
        old_ci_pipeline_id = old.id,
        new_ci_pipeline_id = response.ci_pipeline.id,
        from = %old.kind,
        to = %target,
        "ci pipeline switched"
    );
    Ok(response)
}

/// Allow-table and preconditions of a kind switch.
async fn check_switch(
    uow: &mut dyn UnitOfWork,
    old: &CiPipeline,
    target: PipelineKind,
    allow_external: bool,
    new_parent: Option<i64>,
) -> EngineResult<()> {
    if old.kind == target {
        return Err(EngineError::Conflict(ConflictKind::SameKindSwitch));
    }
    if target == PipelineKind::External && !allow_external {
        return Err(EngineError::Conflict(ConflictKind::ToExternalForbidden));
    }
    if target == PipelineKind::Linked && new_parent == Some(old.id) {
        return Err(EngineError::Conflict(ConflictKind::SelfLinked));
    }
    if !uow.find_by_parent_ci_id(old.id).await?.is_empty() {
        return Err(EngineError::Conflict(ConflictKind::HasLinkedChildren));
    }
    if old.is_external() {
        return Ok(());
    }
    let building = uow
        .find_last_run_by_ci_id(old.id)
        .await?
        .is_some_and(|run| run.in_progress());
    if building {
        return Err(EngineError::Conflict(ConflictKind::BuildInProgress));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn material(id: i64, git_material_id: i64, value: &str) -> CiMaterial {
        CiMaterial {
            id,
            ci_pipeline_id: 1,
            git_material_id,
            source_type: SourceType::BranchFixed,
            value: value.into(),
            regex: String::new(),
            scm_id: None,
            active: true,
        }
    }

    fn linked_child(id: i64) -> CiPipeline {
        CiPipeline {
            id,
            app_id: 7,
            name: format!("child-{id}"),
            kind: PipelineKind::Linked,
            manual_trigger: false,
            scan_enabled: false,
            docker_args: BTreeMap::new(),
            parent_ci_id: Some(1),
            active: true,
            deleted: false,
            docker_config_overridden: false,
            docker_config_override: None,
            updated_by: 1,
            updated_on: Utc::now(),
        }
    }

    #[test]
    fn patch_request_reads_wire_names() {
        let req: PatchRequest = serde_json::from_value(serde_json::json!({
            "action": "SWITCH",
            "appId": 7,
            "switchFromCiPipelineId": 42,
            "ciPipeline": {
                "name": "build",
                "pipelineType": "LINKED",
                "parentCiPipeline": 10,
                "ciMaterial": []
            }
        }))
        .unwrap();
        assert_eq!(req.action, PatchAction::Switch);
        assert_eq!(req.ci_pipeline.kind, Some(PipelineKind::Linked));
        assert_eq!(req.ci_pipeline.parent_ci_id, Some(10));
        assert_eq!(req.switch_from_ci_pipeline_id, 42);
    }

    #[test]
    fn removed_materials_are_synced_inactive() {
        let before = vec![material(1, 9, "main"), material(2, 10, "dev")];
        let after = vec![material(1, 9, "release")];
        let all = with_removed(&before, &after);
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|m| m.id == 2 && !m.active));
    }

    #[test]
    fn linked_child_follows_parent_values() {
        let mut child_material = material(20, 9, "main");
        child_material.ci_pipeline_id = 5;
        let parent = vec![material(1, 9, "release/3")];
        let updated = follow_parent(&linked_child(5), &[child_material], &parent).unwrap();
        assert_eq!(updated[0].id, 20);
        assert_eq!(updated[0].value, "release/3");
    }

    #[test]
    fn linked_child_without_matching_git_material_is_rejected() {
        let parent = vec![material(1, 11, "main")];
        let err = follow_parent(&linked_child(5), &[material(20, 9, "main")], &parent).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationKind::LinkedMaterialMissing {
                ci_pipeline_id: 5,
                git_material_id: 11
            })
        ));
    }

    #[test]
    fn copied_materials_belong_to_the_child() {
        let copies = copy_parent_materials(&[material(1, 9, "main")], 73);
        assert_eq!(copies[0].id, 0);
        assert_eq!(copies[0].ci_pipeline_id, 73);
        assert_eq!(copies[0].value, "main");
    }
}
