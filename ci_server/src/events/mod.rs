//! Event shapes crossing the engine boundary.
//!
//! Inbound: workflow status events from the executor. Outbound: notification
//! events written to the notification bus.

pub mod notification;
pub mod workflow_status;

pub use notification::{NotificationEvent, NotificationKind};
pub use workflow_status::{CiNodeStatus, NodeStatus, WorkflowStatusEvent};
