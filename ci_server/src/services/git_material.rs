//! Git materials of an application and the Source Notifier proxies.

use std::collections::BTreeSet;

use serde::Deserialize;

use super::context::{finish, CiContext, SideEffect};
use super::material::{full_match, sync_list};
use crate::clients::{MaterialChanges, RefreshResult, RepoMaterial};
use crate::error::{ConflictKind, EngineError, EngineResult, Outcome, ValidationKind};
use crate::models::{CiMaterial, GitMaterial, SourceType};
use crate::store::UnitOfWork;

pub const DEFAULT_CHECKOUT_PATH: &str = "./";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitMaterialRequest {
    #[serde(default)]
    pub id: i64,
    pub url: String,
    #[serde(rename = "gitProviderId")]
    pub provider_id: i64,
    #[serde(default)]
    pub checkout_path: String,
    #[serde(default)]
    pub fetch_submodules: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMaterialsRequest {
    pub app_id: i64,
    pub materials: Vec<GitMaterialRequest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMaterialRequest {
    pub app_id: i64,
    pub material: GitMaterialRequest,
}

/// Checkout paths of the app after applying `requested` on top of
/// `existing`. `existing` excludes the material being replaced.
fn check_checkout_paths(existing: &[GitMaterial], requested: &[&str]) -> EngineResult<Vec<String>> {
    let total = existing.len() + requested.len();
    let mut seen: BTreeSet<String> = existing.iter().map(|m| m.checkout_path.clone()).collect();
    let mut paths = Vec::with_capacity(requested.len());

    for path in requested {
        let path = path.trim();
        let path = if path.is_empty() {
            if total > 1 {
                return Err(EngineError::Validation(ValidationKind::BadCheckoutPath(
                    "checkout path is required when an app has more than one git material".into(),
                )));
            }
            DEFAULT_CHECKOUT_PATH
        } else {
            path
        };
        if !path.starts_with("./") {
            return Err(EngineError::Validation(ValidationKind::BadCheckoutPath(
                format!("checkout path '{path}' must start with ./"),
            )));
        }
        if !seen.insert(path.to_string()) {
            return Err(EngineError::Validation(
                ValidationKind::DuplicateCheckoutPath(path.to_string()),
            ));
        }
        paths.push(path.to_string());
    }
    Ok(paths)
}

async fn active_app(uow: &mut dyn UnitOfWork, app_id: i64) -> EngineResult<()> {
    uow.find_app(app_id)
        .await?
        .filter(|a| a.active)
        .map(|_| ())
        .ok_or_else(|| EngineError::not_found("application", app_id))
}

async fn owned_material(
    uow: &mut dyn UnitOfWork,
    app_id: i64,
    id: i64,
) -> EngineResult<GitMaterial> {
    uow.find_git_material(id)
        .await?
        .filter(|m| m.active && m.app_id == app_id)
        .ok_or_else(|| EngineError::not_found("git material", id))
}

pub async fn create_materials(
    ctx: &CiContext,
    req: &CreateMaterialsRequest,
) -> EngineResult<Outcome<Vec<GitMaterial>>> {
    if req.materials.is_empty() {
        return Err(EngineError::invalid("at least one git material is required"));
    }

    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        active_app(uow.as_mut(), req.app_id).await?;
        let existing = uow.find_git_materials_by_app(req.app_id).await?;
        let requested: Vec<&str> = req
            .materials
            .iter()
            .map(|m| m.checkout_path.as_str())
            .collect();
        let paths = check_checkout_paths(&existing, &requested)?;

        let mut created = Vec::with_capacity(paths.len());
        for (m, checkout_path) in req.materials.iter().zip(paths) {
            let material = uow
                .insert_git_material(GitMaterial {
                    id: 0,
                    app_id: req.app_id,
                    name: GitMaterial::derive_name(m.provider_id, &m.url),
                    url: m.url.clone(),
                    checkout_path,
                    provider_id: m.provider_id,
                    fetch_submodules: m.fetch_submodules,
                    active: true,
                })
                .await?;
            created.push(material);
        }
        Ok(created)
    }
    .await;
    let created = finish(uow, result).await?;

    tracing::info!(app_id = req.app_id, count = created.len(), "git materials created");
    let repos = created.iter().map(RepoMaterial::from).collect();
    let warnings = ctx.flush(vec![SideEffect::AddRepos(repos)]).await;
    Ok(Outcome::new(created, warnings))
}

pub async fn update_material(
    ctx: &CiContext,
    req: &UpdateMaterialRequest,
) -> EngineResult<Outcome<GitMaterial>> {
    let m = &req.material;
    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        let mut material = owned_material(uow.as_mut(), req.app_id, m.id).await?;
        let others: Vec<GitMaterial> = uow
            .find_git_materials_by_app(req.app_id)
            .await?
            .into_iter()
            .filter(|o| o.id != material.id)
            .collect();
        let mut paths = check_checkout_paths(&others, &[m.checkout_path.as_str()])?;

        material.url = m.url.clone();
        material.provider_id = m.provider_id;
        material.name = GitMaterial::derive_name(m.provider_id, &m.url);
        material.checkout_path = paths.remove(0);
        material.fetch_submodules = m.fetch_submodules;
        uow.update_git_material(&material).await?;
        Ok(material)
    }
    .await;
    let material = finish(uow, result).await?;

    tracing::info!(git_material_id = material.id, "git material updated");
    let warnings = ctx
        .flush(vec![SideEffect::UpdateRepo(RepoMaterial::from(&material))])
        .await;
    Ok(Outcome::new(material, warnings))
}

/// Deactivates a git material no live build pipeline uses any more.
pub async fn delete_material(
    ctx: &CiContext,
    app_id: i64,
    git_material_id: i64,
) -> EngineResult<Outcome<GitMaterial>> {
    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        let mut material = owned_material(uow.as_mut(), app_id, git_material_id).await?;

        let bound = uow.find_ci_materials_by_git_material(git_material_id).await?;
        let mut blocking = Vec::new();
        for ci_material in &bound {
            let pipeline = uow.find_ci_pipeline(ci_material.ci_pipeline_id).await?;
            if pipeline.is_some_and(|p| p.is_live() && !p.is_external()) {
                blocking.push(ci_material.ci_pipeline_id);
            }
        }
        if !blocking.is_empty() {
            blocking.sort_unstable();
            blocking.dedup();
            return Err(EngineError::Conflict(ConflictKind::MaterialInUse {
                git_material_id,
                ci_pipeline_ids: blocking,
            }));
        }

        let released: Vec<CiMaterial> = bound
            .into_iter()
            .map(|m| CiMaterial { active: false, ..m })
            .collect();
        uow.update_ci_materials(&released).await?;

        material.active = false;
        uow.update_git_material(&material).await?;
        Ok(material)
    }
    .await;
    let material = finish(uow, result).await?;

    tracing::info!(git_material_id, app_id, "git material deleted");
    let warnings = ctx
        .flush(vec![SideEffect::UpdateRepo(RepoMaterial::from(&material))])
        .await;
    Ok(Outcome::new(material, warnings))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexValue {
    pub id: i64,
    pub value: String,
    /// Source type after pinning. The regex itself is kept.
    #[serde(rename = "type", default = "pinned_type")]
    pub source_type: SourceType,
}

fn pinned_type() -> SourceType {
    SourceType::BranchFixed
}

/// Pins runtime values on regex-backed materials. Each value must match its
/// material's regex in full.
pub async fn patch_regex(
    ctx: &CiContext,
    values: &[RegexValue],
) -> EngineResult<Outcome<Vec<CiMaterial>>> {
    if values.is_empty() {
        return Err(EngineError::invalid("no materials to patch"));
    }

    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        let mut patched = Vec::with_capacity(values.len());
        let mut mismatched = Vec::new();
        for v in values {
            let mut material = uow
                .find_ci_material(v.id)
                .await?
                .filter(|m| m.active)
                .ok_or_else(|| EngineError::not_found("ci material", v.id))?;
            if material.regex.is_empty() {
                return Err(EngineError::invalid(format!(
                    "ci material {} is not regex based",
                    v.id
                )));
            }
            if !full_match(&material.regex, &v.value)? {
                mismatched.push(v.id);
                continue;
            }
            material.value = v.value.clone();
            material.source_type = v.source_type;
            patched.push(material);
        }
        if !mismatched.is_empty() {
            return Err(EngineError::Validation(ValidationKind::RegexMismatch {
                material_ids: mismatched,
            }));
        }
        uow.update_ci_materials(&patched).await?;
        Ok(patched)
    }
    .await;
    let patched = finish(uow, result).await?;

    tracing::info!(count = patched.len(), "regex material values pinned");
    let warnings = ctx
        .flush(vec![SideEffect::SavePipelineMaterials(sync_list(&patched))])
        .await;
    Ok(Outcome::new(patched, warnings))
}

/// Recent commits of the CI material a pipeline builds from `git_material_id`.
pub async fn fetch_material_changes(
    ctx: &CiContext,
    ci_pipeline_id: i64,
    git_material_id: i64,
    show_all: bool,
) -> EngineResult<MaterialChanges> {
    let mut uow = ctx.store.begin().await?;
    let result = uow
        .find_ci_materials_by_pipeline(ci_pipeline_id)
        .await
        .map_err(EngineError::from)
        .and_then(|materials| {
            materials
                .into_iter()
                .find(|m| m.git_material_id == git_material_id)
                .ok_or_else(|| {
                    EngineError::not_found(
                        "ci material",
                        format!("{ci_pipeline_id}/{git_material_id}"),
                    )
                })
        });
    let material = finish(uow, result).await?;
    Ok(ctx.notifier.fetch_changes(material.id, show_all).await?)
}

pub async fn refresh_git_material(
    ctx: &CiContext,
    git_material_id: i64,
) -> EngineResult<RefreshResult> {
    let mut uow = ctx.store.begin().await?;
    let result = uow
        .find_git_material(git_material_id)
        .await
        .map_err(EngineError::from)
        .and_then(|m| {
            m.filter(|m| m.active)
                .ok_or_else(|| EngineError::not_found("git material", git_material_id))
        });
    finish(uow, result).await?;
    let refreshed = ctx.notifier.refresh_git_material(git_material_id).await?;
    tracing::info!(git_material_id, "git material refreshed");
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn material(id: i64, path: &str) -> GitMaterial {
        GitMaterial {
            id,
            app_id: 7,
            name: format!("1-repo{id}"),
            url: format!("https://git.example/repo{id}.git"),
            checkout_path: path.into(),
            provider_id: 1,
            fetch_submodules: false,
            active: true,
        }
    }

    #[test]
    fn single_material_defaults_to_root_path() {
        assert_eq!(check_checkout_paths(&[], &[""]).unwrap(), vec!["./"]);
    }

    #[test]
    fn second_material_needs_explicit_path() {
        let err = check_checkout_paths(&[material(1, "./")], &[""]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationKind::BadCheckoutPath(_))
        ));
    }

    #[rstest]
    #[case("src")]
    #[case("/abs")]
    #[case("../up")]
    fn path_must_start_with_dot_slash(#[case] path: &str) {
        assert!(matches!(
            check_checkout_paths(&[], &[path]),
            Err(EngineError::Validation(ValidationKind::BadCheckoutPath(_)))
        ));
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let err = check_checkout_paths(&[material(1, "./api")], &["./api"]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationKind::DuplicateCheckoutPath(ref p)) if p == "./api"
        ));
        assert!(check_checkout_paths(&[], &["./a", "./a"]).is_err());
    }
}
