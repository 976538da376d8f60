//! Git materials of an app and runtime values of regex-backed CI materials.

mod common;

use rstest::rstest;

use ci_lifecycle::clients::{GitCommit, MaterialChanges, NotifierCall};
use ci_lifecycle::error::{ConflictKind, EngineError, ValidationKind};
use ci_lifecycle::models::{PipelineKind, SourceType};
use ci_lifecycle::services::git_material::{
    self, CreateMaterialsRequest, GitMaterialRequest, RegexValue, UpdateMaterialRequest,
};
use ci_lifecycle::services::PatchAction;
use ci_lifecycle::store::UnitOfWork;

use common::*;

fn repo(url: &str, checkout_path: &str) -> GitMaterialRequest {
    GitMaterialRequest {
        id: 0,
        url: url.into(),
        provider_id: 1,
        checkout_path: checkout_path.into(),
        fetch_submodules: false,
    }
}

fn add(materials: Vec<GitMaterialRequest>) -> CreateMaterialsRequest {
    CreateMaterialsRequest {
        app_id: APP_ID,
        materials,
    }
}

fn pin(id: i64, value: &str) -> RegexValue {
    RegexValue {
        id,
        value: value.into(),
        source_type: SourceType::BranchFixed,
    }
}

#[rstest]
#[case("", ValidationKind::BadCheckoutPath(String::new()))]
#[case("lib", ValidationKind::BadCheckoutPath(String::new()))]
#[case("./", ValidationKind::DuplicateCheckoutPath("./".into()))]
#[tokio::test]
async fn second_material_needs_its_own_checkout_path(
    harness: Harness,
    #[case] checkout_path: &str,
    #[case] expected: ValidationKind,
) {
    let h = harness.seeded().await;
    let err = git_material::create_materials(
        &h.ctx,
        &add(vec![repo("https://git.example/lib.git", checkout_path)]),
    )
    .await
    .unwrap_err();

    match (err, expected) {
        (
            EngineError::Validation(ValidationKind::BadCheckoutPath(_)),
            ValidationKind::BadCheckoutPath(_),
        ) => {}
        (EngineError::Validation(got), want) => assert_eq!(got, want),
        (other, _) => panic!("expected validation error, got {other:?}"),
    }
    assert!(h.notifier.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn new_materials_are_registered_with_the_notifier(harness: Harness) {
    let h = harness.seeded().await;
    let outcome = git_material::create_materials(
        &h.ctx,
        &add(vec![repo("https://git.example/lib.git", "./lib")]),
    )
    .await
    .unwrap();
    let created = &outcome.result[0];
    assert_eq!(created.checkout_path, "./lib");

    let calls = h.notifier.calls();
    assert!(matches!(
        calls.as_slice(),
        [NotifierCall::AddRepos(repos)] if repos.len() == 1 && repos[0].id == created.id
    ));
}

#[rstest]
#[tokio::test]
async fn update_rewrites_the_repo_and_notifies(harness: Harness) {
    let h = harness.seeded().await;
    let mut material = repo("https://git.example/payments-v2.git", "./src");
    material.id = GIT_MATERIAL_ID;

    let outcome = git_material::update_material(
        &h.ctx,
        &UpdateMaterialRequest {
            app_id: APP_ID,
            material,
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome.result.url, "https://git.example/payments-v2.git");
    assert_eq!(outcome.result.checkout_path, "./src");
    assert!(matches!(
        h.notifier.calls().as_slice(),
        [NotifierCall::UpdateRepo(r)] if r.id == GIT_MATERIAL_ID && !r.deleted
    ));
}

#[rstest]
#[tokio::test]
async fn material_in_use_cannot_be_deleted_until_the_pipeline_goes(harness: Harness) {
    let h = harness.seeded().await;
    let build = h.create(direct_request("build", "main")).await;

    let err = git_material::delete_material(&h.ctx, APP_ID, GIT_MATERIAL_ID)
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict(ConflictKind::MaterialInUse {
            git_material_id,
            ci_pipeline_ids,
        }) => {
            assert_eq!(git_material_id, GIT_MATERIAL_ID);
            assert_eq!(ci_pipeline_ids, vec![build.ci_pipeline.id]);
        }
        other => panic!("expected MaterialInUse, got {other:?}"),
    }

    let mut req = direct_request("build", "main");
    req.action = PatchAction::Delete;
    req.ci_pipeline.id = build.ci_pipeline.id;
    h.create(req).await;

    let deleted = git_material::delete_material(&h.ctx, APP_ID, GIT_MATERIAL_ID)
        .await
        .unwrap()
        .result;
    assert!(!deleted.active);
    assert!(matches!(
        h.notifier.calls().last(),
        Some(NotifierCall::UpdateRepo(r)) if r.id == GIT_MATERIAL_ID && r.deleted
    ));
    assert!(h
        .uow()
        .await
        .find_git_materials_by_app(APP_ID)
        .await
        .unwrap()
        .is_empty());
}

#[rstest]
#[tokio::test]
async fn regex_values_are_checked_before_anything_is_written(harness: Harness) {
    let h = harness.seeded().await;
    let build = h
        .create(create_request(
            "build",
            PipelineKind::Direct,
            vec![material(SourceType::BranchRegex, "", "release/.*")],
        ))
        .await;
    let id = build.materials[0].id;

    let err = git_material::patch_regex(&h.ctx, &[pin(id, "feature/x")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationKind::RegexMismatch { ref material_ids })
            if material_ids == &vec![id]
    ));
    let stored = h.uow().await.find_ci_material(id).await.unwrap().unwrap();
    assert_eq!(stored.value, "");
    assert!(!h.notifier.tracked().contains_key(&id));
}

#[rstest]
#[tokio::test]
async fn pinned_regex_value_becomes_a_tracked_branch(harness: Harness) {
    let h = harness.seeded().await;
    let build = h
        .create(create_request(
            "build",
            PipelineKind::Direct,
            vec![material(SourceType::BranchRegex, "", "release/.*")],
        ))
        .await;
    let id = build.materials[0].id;

    let patched = git_material::patch_regex(&h.ctx, &[pin(id, "release/2.0")])
        .await
        .unwrap()
        .result;
    assert_eq!(patched[0].source_type, SourceType::BranchFixed);
    assert_eq!(patched[0].regex, "release/.*");

    let tracked = h.notifier.tracked();
    assert_eq!(tracked[&id].value, "release/2.0");
    assert_eq!(tracked[&id].source_type, SourceType::BranchFixed);

    let err = git_material::patch_regex(&h.ctx, &[pin(id, "main")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationKind::RegexMismatch { .. })
    ));
}

#[rstest]
#[tokio::test]
async fn plain_materials_cannot_be_regex_patched(harness: Harness) {
    let h = harness.seeded().await;
    let build = h.create(direct_request("build", "main")).await;

    let err = git_material::patch_regex(&h.ctx, &[pin(build.materials[0].id, "main")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationKind::InvalidRequest(_))
    ));
}

#[rstest]
#[tokio::test]
async fn changes_are_read_through_the_pipeline_material(harness: Harness) {
    let h = harness.seeded().await;
    let build = h.create(direct_request("build", "main")).await;
    let changes = MaterialChanges {
        commits: vec![GitCommit {
            commit: "f00d".into(),
            author: "dev".into(),
            date: None,
            message: "fix".into(),
            changes: Vec::new(),
        }],
        ..MaterialChanges::default()
    };
    h.notifier.set_changes(build.materials[0].id, changes.clone());

    let got = git_material::fetch_material_changes(
        &h.ctx,
        build.ci_pipeline.id,
        GIT_MATERIAL_ID,
        false,
    )
    .await
    .unwrap();
    assert_eq!(got, changes);

    let err = git_material::fetch_material_changes(&h.ctx, build.ci_pipeline.id, 999, false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[rstest]
#[tokio::test]
async fn refresh_requires_an_active_material(harness: Harness) {
    let h = harness.seeded().await;
    let refreshed = git_material::refresh_git_material(&h.ctx, GIT_MATERIAL_ID)
        .await
        .unwrap();
    assert!(refreshed.error_msg.is_empty());

    let err = git_material::refresh_git_material(&h.ctx, 404)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}
