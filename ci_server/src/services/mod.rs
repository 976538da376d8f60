//! CI lifecycle services: free functions over a [`CiContext`].
//!
//! Each public operation runs in one unit of work and returns after commit;
//! Source Notifier calls staged during the unit of work run afterwards and
//! degrade to warnings.

pub mod app_config;
pub mod context;
pub mod custom_tag;
pub mod external_ci;
pub mod git_material;
pub mod graph;
pub mod history;
pub mod material;
pub mod pipeline_patch;
pub mod sweeper;
pub mod workflow_status;

pub use context::{CiContext, SideEffect};
pub use pipeline_patch::{patch, PatchAction, PatchRequest, PatchResponse, PipelineRequest};
