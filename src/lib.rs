pub mod adapters;
pub mod api;
pub mod config;
pub mod core;
pub mod domain;
pub mod server;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use crate::config::{ProjectConfig, ServerConfig, WorkflowConfig};
pub use crate::core::{engine::RegressionEngine, pipeline::RegressionPipeline, tracker::Tracker};
pub use domain::model::{Job, JobState, ProjectId};
pub use server::Server;
pub use utils::error::{Result, TrackerError};
