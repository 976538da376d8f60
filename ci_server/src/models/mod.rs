//! CI lifecycle data models.
//!
//! Plain domain types. Entities reference each other by id only; reverse
//! lookups go through store queries.

/// Unknown value for a string-backed enum column.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares an enum that is stored and transmitted as a fixed string.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[derive(serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::models::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use string_enum;

pub mod app;
pub mod artifact;
pub mod config_value;
pub mod custom_tag;
pub mod history;
pub mod pipeline;
pub mod run;
pub mod stage;
pub mod workflow;

pub use app::{AppWorkflow, Application, Attribute, GitMaterial};
pub use artifact::Artifact;
pub use config_value::{ConfigValue, PatchOp};
pub use custom_tag::CustomTag;
pub use history::{HistoryTrigger, PipelineHistory};
pub use pipeline::{
    BuildType, CdPipeline, CiMaterial, CiPipeline, DockerConfigOverride, ExternalCiEndpoint,
    PipelineKind, SourceType,
};
pub use run::{ArtifactUploaded, ExecutorType, GitTrigger, WorkflowRun};
pub use stage::{PipelineStage, StageStep, StageType};
pub use workflow::{NodeKind, WorkflowNodeMapping};
