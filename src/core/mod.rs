pub mod dispatcher;
pub mod engine;
pub mod history;
pub mod pipeline;
pub mod report;
pub mod toolchain;
pub mod tracker;
pub mod webhook;

pub use crate::domain::ports::{JobPipeline, Notifier, ResultStore};
pub use crate::utils::error::Result;
