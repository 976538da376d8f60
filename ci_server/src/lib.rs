//! CI pipeline lifecycle engine.
//!
//! Keeps CI pipelines, their source materials and their place in the
//! deployment workflow graph consistent; reconciles build status events
//! from the workflow executor; and ingests artifacts announced by external
//! CI systems.

pub mod clients;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

pub use config::CiConfig;
pub use error::{EngineError, EngineResult, Outcome, Warning};
pub use services::CiContext;
