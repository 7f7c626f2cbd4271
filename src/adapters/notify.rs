use crate::adapters::github::{GithubEndpoint, StatusUpdate};
use crate::adapters::http::ApiEndpoint;
use crate::core::report::{describe, render_email, should_email};
use crate::domain::model::Job;
use crate::domain::ports::Notifier;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Mirrors job state into GitHub commit statuses.
pub struct GithubStatusNotifier {
    github: Arc<GithubEndpoint>,
    public_url: String,
}

impl GithubStatusNotifier {
    pub fn new(github: Arc<GithubEndpoint>, public_url: &str) -> Self {
        Self {
            github,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn status_for(&self, job: &Job) -> StatusUpdate {
        StatusUpdate {
            state: job.state.commit_state(),
            target_url: Some(format!("{}/api/v1/jobs/{}", self.public_url, job.id)),
            description: describe(job),
            context: job.context(),
        }
    }
}

#[async_trait]
impl Notifier for GithubStatusNotifier {
    fn name(&self) -> &'static str {
        "github-status"
    }

    async fn job_updated(&self, job: &Job, _previous: Option<&Job>) -> Result<()> {
        if !job.notify.github_status {
            return Ok(());
        }
        let status = self.status_for(job);
        self.github
            .create_status(&job.project.owner, &job.project.repo, &job.commit.sha, &status)
            .await?;
        tracing::debug!(
            job_id = %job.id,
            context = %status.context,
            "Posted {:?} status",
            status.state
        );
        Ok(())
    }
}

/// Sends result emails through an HTTP mail relay accepting
/// `{from, to, subject, text}` JSON.
pub struct EmailNotifier {
    relay: ApiEndpoint,
    from: String,
    public_url: String,
}

impl EmailNotifier {
    pub fn new(relay_url: &str, from: &str, public_url: &str) -> Self {
        Self {
            relay: ApiEndpoint::new(relay_url, "application/json", None),
            from: from.to_string(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn job_updated(&self, job: &Job, previous: Option<&Job>) -> Result<()> {
        if job.notify.email.is_empty() || !should_email(job.notify.on, job, previous) {
            return Ok(());
        }

        let job_url = format!("{}/api/v1/jobs/{}", self.public_url, job.id);
        let message = render_email(job, &self.from, &job.notify.email, &job_url);
        let payload = serde_json::to_value(&message)?;

        self.relay
            .post("", &payload)
            .await?
            .expect(&[200, 201, 202, 204])?;
        tracing::info!(
            job_id = %job.id,
            "📧 Sent '{}' to {} recipient(s)",
            message.subject,
            message.to.len()
        );
        Ok(())
    }
}
