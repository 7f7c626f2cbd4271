use crate::core::tracker::Tracker;
use crate::domain::ports::ResultStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
    pub store: Arc<dyn ResultStore>,
    pub version: String,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(tracker: Arc<Tracker>) -> Self {
        Self {
            store: tracker.store().clone(),
            tracker,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
        }
    }

    pub fn uptime(&self) -> String {
        let secs = (Utc::now() - self.started_at).num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
