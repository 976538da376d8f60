//! Material coordination: the CI materials of a pipeline and their sync
//! with the Source Notifier.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::clients::PipelineMaterialSync;
use crate::error::{ConflictKind, EngineError, EngineResult, ValidationKind};
use crate::models::{CiMaterial, SourceType};
use crate::store::UnitOfWork;

/// Desired state of one CI material. `id == 0` creates a new material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRequest {
    #[serde(default)]
    pub id: i64,
    pub git_material_id: i64,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub regex: String,
    /// Deactivates an existing material.
    #[serde(default)]
    pub deleted: bool,
}

/// Whether `value` matches all of `pattern`.
pub fn full_match(pattern: &str, value: &str) -> EngineResult<bool> {
    let anchored = Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|_| EngineError::Validation(ValidationKind::InvalidRegex(pattern.to_string())))?;
    Ok(anchored.is_match(value))
}

/// Notifier payload for `materials`, leaving out regex materials, which
/// the notifier resolves on demand.
pub fn sync_list(materials: &[CiMaterial]) -> Vec<PipelineMaterialSync> {
    materials
        .iter()
        .filter(|m| !m.is_regex())
        .map(PipelineMaterialSync::from)
        .collect()
}

/// Checks a request for a brand new material against the app's git
/// materials and the regex rules.
async fn check_new(
    uow: &mut dyn UnitOfWork,
    app_id: i64,
    req: &MaterialRequest,
) -> EngineResult<()> {
    let known = uow
        .find_git_material(req.git_material_id)
        .await?
        .is_some_and(|g| g.active && g.app_id == app_id);
    if !known {
        return Err(EngineError::not_found("git material", req.git_material_id));
    }

    if req.source_type == SourceType::BranchRegex {
        if req.regex.is_empty() {
            return Err(EngineError::Validation(ValidationKind::InvalidRegex(
                String::new(),
            )));
        }
        if !req.value.is_empty() && !full_match(&req.regex, &req.value)? {
            return Err(EngineError::Validation(ValidationKind::RegexMismatch {
                material_ids: vec![req.id],
            }));
        }
    }
    Ok(())
}

fn new_material(ci_pipeline_id: i64, req: &MaterialRequest) -> CiMaterial {
    let regex = if req.source_type == SourceType::BranchRegex {
        req.regex.clone()
    } else {
        String::new()
    };
    CiMaterial {
        id: 0,
        ci_pipeline_id,
        git_material_id: req.git_material_id,
        source_type: req.source_type,
        value: req.value.clone(),
        regex,
        scm_id: None,
        active: true,
    }
}

/// Validates and inserts the materials of a new pipeline.
pub async fn create_materials(
    uow: &mut dyn UnitOfWork,
    app_id: i64,
    ci_pipeline_id: i64,
    requests: &[MaterialRequest],
) -> EngineResult<Vec<CiMaterial>> {
    if requests.is_empty() {
        return Err(EngineError::invalid("ci pipeline needs at least one material"));
    }
    let mut seen = BTreeSet::new();
    for req in requests {
        if !seen.insert(req.git_material_id) {
            return Err(EngineError::invalid(format!(
                "git material {} used twice",
                req.git_material_id
            )));
        }
        check_new(uow, app_id, req).await?;
    }

    let materials = requests
        .iter()
        .map(|req| new_material(ci_pipeline_id, req))
        .collect();
    Ok(uow.insert_ci_materials(materials).await?)
}

/// Applies desired material states to an existing pipeline and returns its
/// resulting active materials.
///
/// Nothing is written unless every request passes: existing materials bound
/// to a plugin SCM are immutable, and values set on regex-backed materials
/// must match the regex in full.
pub async fn apply_updates(
    uow: &mut dyn UnitOfWork,
    app_id: i64,
    ci_pipeline_id: i64,
    requests: &[MaterialRequest],
) -> EngineResult<Vec<CiMaterial>> {
    let (creates, updates): (Vec<_>, Vec<_>) = requests.iter().partition(|r| r.id == 0);

    let current: BTreeMap<i64, CiMaterial> = uow
        .find_ci_materials_by_pipeline(ci_pipeline_id)
        .await?
        .into_iter()
        .map(|m| (m.id, m))
        .collect();

    let mut pairs = Vec::with_capacity(updates.len());
    for req in &updates {
        let existing = current
            .get(&req.id)
            .ok_or_else(|| EngineError::not_found("ci material", req.id))?;
        pairs.push((*req, existing));
    }

    let bound: Vec<i64> = pairs
        .iter()
        .filter(|(_, existing)| existing.has_scm_binding())
        .map(|(req, _)| req.id)
        .collect();
    if !bound.is_empty() {
        return Err(EngineError::Conflict(ConflictKind::PluginScmUnsupported {
            material_ids: bound,
        }));
    }

    let mut mismatched = Vec::new();
    let mut changed = Vec::with_capacity(pairs.len());
    for (req, existing) in pairs {
        let guard = guard_regex(existing, req);
        if !req.deleted
            && !guard.is_empty()
            && !req.value.is_empty()
            && !full_match(guard, &req.value)?
        {
            mismatched.push(req.id);
            continue;
        }
        changed.push(merge(existing, req));
    }
    if !mismatched.is_empty() {
        return Err(EngineError::Validation(ValidationKind::RegexMismatch {
            material_ids: mismatched,
        }));
    }

    let mut taken: BTreeSet<i64> = current
        .values()
        .filter(|m| !changed.iter().any(|c| c.id == m.id && !c.active))
        .map(|m| m.git_material_id)
        .collect();
    for req in &creates {
        if !taken.insert(req.git_material_id) {
            return Err(EngineError::invalid(format!(
                "git material {} used twice",
                req.git_material_id
            )));
        }
        check_new(uow, app_id, req).await?;
    }

    uow.update_ci_materials(&changed).await?;
    let fresh: Vec<CiMaterial> = creates
        .iter()
        .map(|req| new_material(ci_pipeline_id, req))
        .collect();
    uow.insert_ci_materials(fresh).await?;

    let result = uow.find_ci_materials_by_pipeline(ci_pipeline_id).await?;
    if result.is_empty() {
        return Err(EngineError::invalid("ci pipeline needs at least one material"));
    }
    Ok(result)
}

/// Regex a new value must satisfy: the one the request installs, or the
/// one already stored.
fn guard_regex<'a>(existing: &'a CiMaterial, req: &'a MaterialRequest) -> &'a str {
    if req.source_type == SourceType::BranchRegex && !req.regex.is_empty() {
        &req.regex
    } else {
        &existing.regex
    }
}

/// Desired state of `existing` after `req`.
///
/// A fixed value sent for a regex-backed material pins the value under the
/// requested type and keeps the regex as its guard; any other request
/// replaces type, value and regex.
fn merge(existing: &CiMaterial, req: &MaterialRequest) -> CiMaterial {
    let mut next = existing.clone();
    if req.deleted {
        next.active = false;
        return next;
    }
    next.value = req.value.clone();
    next.source_type = req.source_type;
    if !existing.regex.is_empty() && req.source_type == SourceType::BranchFixed {
        return next;
    }
    next.regex = match req.source_type {
        SourceType::BranchRegex if req.regex.is_empty() => existing.regex.clone(),
        SourceType::BranchRegex => req.regex.clone(),
        _ => String::new(),
    };
    next
}
