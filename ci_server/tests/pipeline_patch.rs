//! Pipeline patch lifecycle: create, update source, delete and switch.

mod common;

use std::collections::BTreeSet;

use rstest::rstest;

use ci_lifecycle::clients::PipelineMaterialSync;
use ci_lifecycle::error::{ConflictKind, EngineError, ValidationKind};
use ci_lifecycle::models::{ExecutorType, HistoryTrigger, NodeKind, PipelineKind, SourceType};
use ci_lifecycle::services::graph;
use ci_lifecycle::services::material::MaterialRequest;
use ci_lifecycle::services::{history, patch, PatchAction};
use ci_lifecycle::store::UnitOfWork;

use common::*;

#[rstest]
#[tokio::test]
async fn create_direct_pipeline_roots_workflow_and_syncs_material(harness: Harness) {
    let h = harness.seeded().await;
    let mut req = direct_request("build", "main");
    req.app_workflow_id = WORKFLOW_ID;

    let outcome = patch(&h.ctx, &req).await.unwrap();
    assert!(!outcome.is_degraded());
    let created = outcome.result;
    assert_eq!(created.ci_pipeline.kind, PipelineKind::Direct);
    assert_eq!(created.app_workflow_id, WORKFLOW_ID);
    assert_eq!(created.materials.len(), 1);
    let material = &created.materials[0];

    let mut uow = h.uow().await;
    let live = uow.find_active_by_app_id(APP_ID).await.unwrap();
    assert_eq!(live.len(), 1);
    let mappings = uow.find_mappings_by_workflow(WORKFLOW_ID).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert!(mappings[0].is_root());
    assert_eq!(
        mappings[0].child(),
        (created.ci_pipeline.id, NodeKind::CiPipeline)
    );
    drop(uow);

    assert_eq!(
        h.notifier.saved_batches(),
        vec![vec![PipelineMaterialSync {
            id: material.id,
            git_material_id: GIT_MATERIAL_ID,
            source_type: SourceType::BranchFixed,
            value: "main".into(),
            active: true,
        }]]
    );
}

#[rstest]
#[tokio::test]
async fn regex_mismatch_rejects_update_without_side_effects(harness: Harness) {
    let h = harness.seeded().await;
    let created = h
        .create(create_request(
            "build",
            PipelineKind::Direct,
            vec![material(SourceType::BranchRegex, "", "release/.*")],
        ))
        .await;
    let material_id = created.materials[0].id;
    let calls_before = h.notifier.calls().len();

    let mut req = direct_request("build", "");
    req.action = PatchAction::UpdateSource;
    req.ci_pipeline.id = created.ci_pipeline.id;
    req.ci_pipeline.materials = vec![MaterialRequest {
        id: material_id,
        ..material(SourceType::BranchRegex, "hotfix/1", "")
    }];

    let err = patch(&h.ctx, &req).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationKind::RegexMismatch { ref material_ids })
            if material_ids == &vec![material_id]
    ));

    let stored = h
        .uow()
        .await
        .find_ci_material(material_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.value, "");
    assert_eq!(h.notifier.calls().len(), calls_before);
}

#[rstest]
#[tokio::test]
async fn matching_regex_value_is_pinned(harness: Harness) {
    let h = harness.seeded().await;
    let created = h
        .create(create_request(
            "build",
            PipelineKind::Direct,
            vec![material(SourceType::BranchRegex, "", "release/.*")],
        ))
        .await;
    let material_id = created.materials[0].id;

    let mut req = direct_request("build", "");
    req.action = PatchAction::UpdateSource;
    req.ci_pipeline.id = created.ci_pipeline.id;
    req.ci_pipeline.materials = vec![MaterialRequest {
        id: material_id,
        ..material(SourceType::BranchFixed, "release/2.4", "")
    }];
    let updated = h.create(req.clone()).await;

    assert_eq!(updated.materials[0].value, "release/2.4");
    assert_eq!(updated.materials[0].source_type, SourceType::BranchFixed);
    assert_eq!(updated.materials[0].regex, "release/.*");
    assert_eq!(
        h.notifier.saved_batches().last(),
        Some(&vec![PipelineMaterialSync {
            id: material_id,
            git_material_id: GIT_MATERIAL_ID,
            source_type: SourceType::BranchFixed,
            value: "release/2.4".into(),
            active: true,
        }])
    );

    req.ci_pipeline.materials[0].value = "main".into();
    let err = patch(&h.ctx, &req).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationKind::RegexMismatch { .. })
    ));
}

#[rstest]
#[tokio::test]
async fn switch_is_refused_while_a_build_runs(harness: Harness) {
    let h = harness.seeded().await;
    let base = h.create(direct_request("base", "main")).await;
    let build = h.create(direct_request("build", "main")).await;
    h.insert_run(run(900, build.ci_pipeline.id, "RUNNING", ExecutorType::System))
        .await;

    let mut req = linked_request("build", base.ci_pipeline.id);
    req.action = PatchAction::Switch;
    req.switch_from_ci_pipeline_id = build.ci_pipeline.id;

    let err = patch(&h.ctx, &req).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict(ConflictKind::BuildInProgress)
    ));

    let mut uow = h.uow().await;
    let still = uow
        .find_ci_pipeline(build.ci_pipeline.id)
        .await
        .unwrap()
        .unwrap();
    assert!(still.is_live());
    assert_eq!(uow.find_active_by_app_id(APP_ID).await.unwrap().len(), 2);
}

#[rstest]
#[tokio::test]
async fn switch_direct_to_linked_repoints_cd_descendants(harness: Harness) {
    let h = harness.seeded().await;
    let base = h.create(direct_request("base", "main")).await;
    let build = h.create(direct_request("build", "main")).await;
    let old_id = build.ci_pipeline.id;
    let workflow_id = build.app_workflow_id;
    h.attach_cd(workflow_id, (old_id, NodeKind::CiPipeline), 501, old_id)
        .await;
    h.attach_cd(workflow_id, (old_id, NodeKind::CiPipeline), 502, old_id)
        .await;
    h.insert_run(run(900, old_id, "Succeeded", ExecutorType::System))
        .await;

    let before: BTreeSet<i64> = {
        let mut uow = h.uow().await;
        graph::cd_descendants(uow.as_mut(), (old_id, NodeKind::CiPipeline))
            .await
            .unwrap()
            .into_iter()
            .collect()
    };

    let mut req = linked_request("build", base.ci_pipeline.id);
    req.action = PatchAction::Switch;
    req.switch_from_ci_pipeline_id = old_id;
    let switched = h.create(req).await;
    let new_id = switched.ci_pipeline.id;

    assert_ne!(new_id, old_id);
    assert_eq!(switched.ci_pipeline.kind, PipelineKind::Linked);
    assert_eq!(switched.app_workflow_id, workflow_id);

    let mut uow = h.uow().await;
    let old = uow.find_ci_pipeline(old_id).await.unwrap().unwrap();
    assert!(old.deleted && !old.active);

    for cd_id in [501, 502] {
        let edges = uow
            .find_mappings_by_child(cd_id, NodeKind::CdPipeline)
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].parent(), Some((new_id, NodeKind::CiPipeline)));
        let cd = uow.find_cd_pipeline(cd_id).await.unwrap().unwrap();
        assert_eq!(cd.ci_pipeline_id, new_id);
    }

    let after: BTreeSet<i64> = graph::cd_descendants(uow.as_mut(), (new_id, NodeKind::CiPipeline))
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(before, after);
    graph::validate_workflow(uow.as_mut(), workflow_id)
        .await
        .unwrap();

    let materials = uow.find_ci_materials_by_pipeline(new_id).await.unwrap();
    assert_eq!(materials.len(), 1);
    assert_eq!(materials[0].value, "main");
}

#[rstest]
#[case(PipelineKind::Direct, ConflictKind::SameKindSwitch)]
#[case(PipelineKind::External, ConflictKind::ToExternalForbidden)]
#[tokio::test]
async fn switch_allow_table(
    harness: Harness,
    #[case] target: PipelineKind,
    #[case] expected: ConflictKind,
) {
    let h = harness.seeded().await;
    let build = h.create(direct_request("build", "main")).await;

    let mut req = create_request("build-2", target, vec![]);
    req.action = PatchAction::Switch;
    req.switch_from_ci_pipeline_id = build.ci_pipeline.id;

    match patch(&h.ctx, &req).await {
        Err(EngineError::Conflict(kind)) => assert_eq!(kind, expected),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[rstest]
#[tokio::test]
async fn switch_is_refused_while_linked_children_exist(harness: Harness) {
    let h = harness.seeded().await;
    let base = h.create(direct_request("base", "main")).await;
    h.create(linked_request("mirror", base.ci_pipeline.id)).await;

    let mut req = create_request("base-job", PipelineKind::Job, vec![
        material(SourceType::BranchFixed, "main", ""),
    ]);
    req.action = PatchAction::Switch;
    req.switch_from_ci_pipeline_id = base.ci_pipeline.id;

    let err = patch(&h.ctx, &req).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict(ConflictKind::HasLinkedChildren)
    ));
}

#[rstest]
#[tokio::test]
async fn external_parent_with_linked_children_cannot_be_switched(harness: Harness) {
    let h = harness.seeded().await;
    let vendor = h
        .create(create_request("vendor-ci", PipelineKind::External, vec![]))
        .await;
    let mirror = h
        .create(linked_request("mirror", vendor.ci_pipeline.id))
        .await;

    let mut req = direct_request("vendor-build", "main");
    req.action = PatchAction::Switch;
    req.switch_from_ci_pipeline_id = vendor.ci_pipeline.id;

    let err = patch(&h.ctx, &req).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict(ConflictKind::HasLinkedChildren)
    ));

    let mut uow = h.uow().await;
    let parent = uow
        .find_ci_pipeline(vendor.ci_pipeline.id)
        .await
        .unwrap()
        .unwrap();
    assert!(parent.is_live());
    let children = uow.find_by_parent_ci_id(vendor.ci_pipeline.id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, mirror.ci_pipeline.id);
}

#[rstest]
#[tokio::test]
async fn external_create_replaces_pipeline_and_clears_cd_pointer(harness: Harness) {
    let h = harness.seeded().await;
    let build = h.create(direct_request("build", "main")).await;
    let old_id = build.ci_pipeline.id;
    h.attach_cd(build.app_workflow_id, (old_id, NodeKind::CiPipeline), 601, old_id)
        .await;

    let mut req = create_request("build-ext", PipelineKind::External, vec![]);
    req.switch_from_ci_pipeline_id = old_id;
    let created = h.create(req).await;

    let issued = created.external_ci.expect("access key issued");
    assert!(issued.access_key.contains('.'));

    let mut uow = h.uow().await;
    let edges = uow
        .find_mappings_by_child(601, NodeKind::CdPipeline)
        .await
        .unwrap();
    assert_eq!(
        edges[0].parent(),
        Some((issued.external_ci_id, NodeKind::Webhook))
    );
    assert_eq!(
        uow.find_cd_pipeline(601).await.unwrap().unwrap().ci_pipeline_id,
        0
    );
    let roots: Vec<_> = uow
        .find_mappings_by_workflow(build.app_workflow_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.is_root())
        .collect();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].child(), (issued.external_ci_id, NodeKind::Webhook));
}

#[rstest]
#[tokio::test]
async fn names_are_unique_per_app(harness: Harness) {
    let h = harness.seeded().await;
    h.create(direct_request("build", "main")).await;

    let err = patch(&h.ctx, &direct_request("build", "dev"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict(ConflictKind::DuplicateName(ref name)) if name == "build"
    ));
}

#[rstest]
#[tokio::test]
async fn second_root_in_a_workflow_rolls_back(harness: Harness) {
    let h = harness.seeded().await;
    let mut first = direct_request("build", "main");
    first.app_workflow_id = WORKFLOW_ID;
    h.create(first).await;

    let mut second = direct_request("other", "main");
    second.app_workflow_id = WORKFLOW_ID;
    let err = patch(&h.ctx, &second).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict(ConflictKind::GraphConflict(_))
    ));

    let mut uow = h.uow().await;
    assert!(uow
        .find_active_by_app_and_name(APP_ID, "other")
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        uow.find_mappings_by_workflow(WORKFLOW_ID)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[rstest]
#[tokio::test]
async fn transient_commit_failure_is_retried_once(harness: Harness) {
    let h = harness.seeded().await;
    h.store.fail_next_commits(1);

    let created = h.create(direct_request("build", "main")).await;

    let live = h.uow().await.find_active_by_app_id(APP_ID).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, created.ci_pipeline.id);
}

#[rstest]
#[tokio::test]
async fn second_transient_failure_surfaces(harness: Harness) {
    let h = harness.seeded().await;
    h.store.fail_next_commits(2);

    let err = patch(&h.ctx, &direct_request("build", "main"))
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(h
        .uow()
        .await
        .find_active_by_app_id(APP_ID)
        .await
        .unwrap()
        .is_empty());
}

#[rstest]
#[tokio::test]
async fn notifier_failure_degrades_but_keeps_the_commit(harness: Harness) {
    let h = harness.seeded().await;
    h.notifier.set_failing(true);

    let outcome = patch(&h.ctx, &direct_request("build", "main"))
        .await
        .unwrap();
    assert!(outcome.is_degraded());
    assert!(h
        .uow()
        .await
        .find_ci_pipeline(outcome.result.ci_pipeline.id)
        .await
        .unwrap()
        .is_some_and(|p| p.is_live()));
}

#[rstest]
#[tokio::test]
async fn delete_with_cd_dependents_is_refused(harness: Harness) {
    let h = harness.seeded().await;
    let build = h.create(direct_request("build", "main")).await;
    let id = build.ci_pipeline.id;
    h.attach_cd(build.app_workflow_id, (id, NodeKind::CiPipeline), 701, id)
        .await;

    let mut req = direct_request("build", "main");
    req.action = PatchAction::Delete;
    req.ci_pipeline.id = id;
    let err = patch(&h.ctx, &req).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ConflictKind::HasDependents)));
}

#[rstest]
#[tokio::test]
async fn delete_soft_deletes_and_deactivates_materials(harness: Harness) {
    let h = harness.seeded().await;
    let build = h.create(direct_request("build", "main")).await;
    let id = build.ci_pipeline.id;
    let material_id = build.materials[0].id;

    let mut req = direct_request("build", "main");
    req.action = PatchAction::Delete;
    req.ci_pipeline.id = id;
    let deleted = h.create(req).await;
    assert!(deleted.ci_pipeline.deleted);

    let mut uow = h.uow().await;
    assert!(uow.find_ci_materials_by_pipeline(id).await.unwrap().is_empty());
    assert!(uow
        .find_mappings_by_child(id, NodeKind::CiPipeline)
        .await
        .unwrap()
        .is_empty());
    drop(uow);

    assert!(!h.notifier.tracked()[&material_id].active);

    let entries = history::list(&h.ctx, id).await.unwrap();
    let triggers: Vec<HistoryTrigger> = entries.iter().map(|e| e.trigger).collect();
    assert_eq!(triggers, vec![HistoryTrigger::Delete, HistoryTrigger::Create]);
}

#[rstest]
#[tokio::test]
async fn linked_children_follow_parent_source_updates(harness: Harness) {
    let h = harness.seeded().await;
    let base = h.create(direct_request("base", "main")).await;
    let child = h.create(linked_request("mirror", base.ci_pipeline.id)).await;
    assert_eq!(child.materials.len(), 1);
    assert_eq!(child.materials[0].value, "main");

    let mut req = direct_request("base", "");
    req.action = PatchAction::UpdateSource;
    req.ci_pipeline.id = base.ci_pipeline.id;
    req.ci_pipeline.materials = vec![MaterialRequest {
        id: base.materials[0].id,
        ..material(SourceType::BranchFixed, "develop", "")
    }];
    h.create(req).await;

    let mirrored = h
        .uow()
        .await
        .find_ci_materials_by_pipeline(child.ci_pipeline.id)
        .await
        .unwrap();
    assert_eq!(mirrored[0].value, "develop");
    let tracked = h.notifier.tracked();
    assert_eq!(tracked[&child.materials[0].id].value, "develop");
    assert_eq!(tracked[&base.materials[0].id].value, "develop");
}

#[rstest]
#[tokio::test]
async fn replaying_an_update_leaves_notifier_state_unchanged(harness: Harness) {
    let h = harness.seeded().await;
    let base = h.create(direct_request("base", "main")).await;

    let mut req = direct_request("base", "");
    req.action = PatchAction::UpdateSource;
    req.ci_pipeline.id = base.ci_pipeline.id;
    req.ci_pipeline.materials = vec![MaterialRequest {
        id: base.materials[0].id,
        ..material(SourceType::BranchFixed, "release", "")
    }];

    h.create(req.clone()).await;
    let first = h.notifier.tracked();
    h.create(req).await;
    assert_eq!(h.notifier.tracked(), first);
}

#[rstest]
#[tokio::test]
async fn job_pipelines_skip_the_docker_build(harness: Harness) {
    let h = harness.seeded().await;
    let job = h
        .create(create_request(
            "nightly",
            PipelineKind::Job,
            vec![material(SourceType::BranchFixed, "main", "")],
        ))
        .await;
    let over = job.ci_pipeline.docker_config_override.expect("override set");
    assert_eq!(over.build_type, ci_lifecycle::models::BuildType::SkipBuild);
    assert!(job.ci_pipeline.docker_config_overridden);
}

#[rstest]
#[tokio::test]
async fn plugin_scm_materials_refuse_source_updates(harness: Harness) {
    let h = harness.seeded().await;
    let build = h.create(direct_request("build", "main")).await;
    let mut bound = build.materials[0].clone();
    bound.scm_id = Some("scm-7".into());
    let mut uow = h.uow().await;
    uow.update_ci_materials(&[bound.clone()]).await.unwrap();
    uow.commit().await.unwrap();
    let calls_before = h.notifier.calls().len();

    let mut req = direct_request("build", "develop");
    req.action = PatchAction::UpdateSource;
    req.ci_pipeline.id = build.ci_pipeline.id;
    req.ci_pipeline.materials[0].id = bound.id;

    let err = patch(&h.ctx, &req).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict(ConflictKind::PluginScmUnsupported { ref material_ids })
            if material_ids == &vec![bound.id]
    ));
    let stored = h
        .uow()
        .await
        .find_ci_material(bound.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.value, "main");
    assert_eq!(h.notifier.calls().len(), calls_before);
}
