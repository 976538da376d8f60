//! Engine error taxonomy.
//!
//! Every service returns [`EngineError`]. Storage failures enter through
//! `From<StoreError>`; the Postgres adapter is the only place that looks at
//! driver errors.

use std::fmt;

use thiserror::Error;

use crate::clients::ClientError;
use crate::store::StoreError;

pub type EngineResult<T> = Result<T, EngineError>;

/// State-machine and uniqueness violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    SameKindSwitch,
    ToExternalForbidden,
    HasLinkedChildren,
    BuildInProgress,
    HasDependents,
    GraphConflict(String),
    PluginScmUnsupported { material_ids: Vec<i64> },
    DuplicateName(String),
    SelfLinked,
    RunCancelled(i64),
    RunNotCancellable { run_id: i64, status: String },
    MaterialInUse { git_material_id: i64, ci_pipeline_ids: Vec<i64> },
    Unique(String),
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SameKindSwitch => write!(f, "cannot convert this pipeline to same type"),
            Self::ToExternalForbidden => write!(
                f,
                "current ci-pipeline cannot be converted to external-webhook type"
            ),
            Self::HasLinkedChildren => write!(
                f,
                "cannot convert this ci-pipeline as it contains some linked ci-pipeline's"
            ),
            Self::BuildInProgress => write!(
                f,
                "cannot convert this ci-pipeline as recent build of this ci-pipeline is in progressing state"
            ),
            Self::HasDependents => write!(f, "cd pipeline exists for this CI"),
            Self::GraphConflict(msg) => write!(f, "workflow graph conflict: {msg}"),
            Self::PluginScmUnsupported { material_ids } => write!(
                f,
                "materials bound to a plugin SCM cannot be updated: {material_ids:?}"
            ),
            Self::DuplicateName(name) => {
                write!(f, "ci pipeline with name '{name}' already exists in this app")
            }
            Self::SelfLinked => write!(f, "cannot create linked ci pipeline from the same source"),
            Self::RunCancelled(id) => write!(f, "workflow run {id} is already cancelled"),
            Self::RunNotCancellable { run_id, status } => {
                write!(f, "workflow run {run_id} cannot be cancelled in status {status}")
            }
            Self::MaterialInUse {
                git_material_id,
                ci_pipeline_ids,
            } => write!(
                f,
                "git material {git_material_id} is used by ci pipelines {ci_pipeline_ids:?}"
            ),
            Self::Unique(what) => write!(f, "unique constraint violated: {what}"),
        }
    }
}

/// Input rejected before any write happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationKind {
    RegexMismatch { material_ids: Vec<i64> },
    InvalidRegex(String),
    BadCheckoutPath(String),
    DuplicateCheckoutPath(String),
    MalformedEvent(String),
    LinkedMaterialMissing { ci_pipeline_id: i64, git_material_id: i64 },
    InvalidRequest(String),
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegexMismatch { material_ids } => {
                write!(f, "branch value does not match regex for materials {material_ids:?}")
            }
            Self::InvalidRegex(pattern) => write!(f, "invalid regex '{pattern}'"),
            Self::BadCheckoutPath(msg) => write!(f, "{msg}"),
            Self::DuplicateCheckoutPath(path) => write!(f, "duplicate checkout path '{path}'"),
            Self::MalformedEvent(msg) => write!(f, "malformed workflow event: {msg}"),
            Self::LinkedMaterialMissing {
                ci_pipeline_id,
                git_material_id,
            } => write!(
                f,
                "linked ci pipeline {ci_pipeline_id} has no material for git material {git_material_id}"
            ),
            Self::InvalidRequest(msg) => write!(f, "{msg}"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(ConflictKind),

    #[error("{0}")]
    Validation(ValidationKind),

    #[error("authentication failed")]
    AuthFailed,

    #[error("transient storage failure: {0}")]
    Transient(String),

    /// A collaborator call made on the caller's behalf failed.
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Validation(ValidationKind::InvalidRequest(msg.into()))
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Validation(ValidationKind::MalformedEvent(msg.into()))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short machine-readable label, used in metrics and API envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::Validation(_) => "Validation",
            Self::AuthFailed => "AuthFailed",
            Self::Transient(_) => "Transient",
            Self::Upstream(_) => "Upstream",
            Self::Internal(_) => "Internal",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound {
                entity,
                id: id.to_string(),
            },
            StoreError::Conflict(what) => Self::Conflict(ConflictKind::Unique(what)),
            StoreError::Transient(msg) => Self::Transient(msg),
            StoreError::Backend(err) => Self::Internal(err.to_string()),
        }
    }
}

impl From<ClientError> for EngineError {
    fn from(err: ClientError) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("json: {err}"))
    }
}

/// Non-fatal outcome attached to a successful result.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", content = "message")]
pub enum Warning {
    NotifierDegraded(String),
}

/// A successful result plus the warnings collected after commit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Outcome<T> {
    pub result: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl<T> Outcome<T> {
    pub fn new(result: T, warnings: Vec<Warning>) -> Self {
        Self { result, warnings }
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_maps_to_unique_conflict() {
        let err: EngineError = StoreError::Conflict("ci_pipeline name".into()).into();
        assert!(matches!(
            err,
            EngineError::Conflict(ConflictKind::Unique(ref what)) if what == "ci_pipeline name"
        ));
    }

    #[test]
    fn store_transient_stays_retryable() {
        let err: EngineError = StoreError::Transient("serialization failure".into()).into();
        assert!(err.is_transient());
        assert_eq!(err.kind(), "Transient");
    }

    #[test]
    fn switch_messages_are_user_facing() {
        assert_eq!(
            EngineError::Conflict(ConflictKind::SameKindSwitch).to_string(),
            "cannot convert this pipeline to same type"
        );
        assert_eq!(
            EngineError::Conflict(ConflictKind::HasDependents).to_string(),
            "cd pipeline exists for this CI"
        );
    }
}
