use crate::adapters::github::{GithubEndpoint, GithubRepo, StatusUpdate};
use crate::config::project_config::{ProjectConfig, PROJECT_CONFIG_FILE};
use crate::core::dispatcher::JobQueue;
use crate::core::pipeline::broadcast;
use crate::domain::model::{
    Commit, CommitState, Job, JobState, Project, ProjectId, PushEvent, RunResult,
};
use crate::domain::ports::{Notifier, ResultStore};
use crate::utils::error::{Result, TrackerError};
use chrono::Utc;
use std::sync::Arc;

pub const CONFIG_CONTEXT: &str = "opencorps/config";

#[derive(Debug, Clone)]
pub enum PushOutcome {
    Queued(Vec<Job>),
    Ignored(String),
}

/// Turns pushes and manual triggers into queued jobs.
pub struct Tracker {
    github: Arc<GithubEndpoint>,
    store: Arc<dyn ResultStore>,
    notifiers: Vec<Arc<dyn Notifier>>,
    queue: Arc<dyn JobQueue>,
    webhook_url: String,
    webhook_secret: Option<String>,
}

impl Tracker {
    pub fn new(
        github: Arc<GithubEndpoint>,
        store: Arc<dyn ResultStore>,
        notifiers: Vec<Arc<dyn Notifier>>,
        queue: Arc<dyn JobQueue>,
        webhook_url: String,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            github,
            store,
            notifiers,
            queue,
            webhook_url,
            webhook_secret,
        }
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }

    pub async fn handle_push(&self, event: PushEvent) -> Result<PushOutcome> {
        let PushEvent {
            project,
            clone_url,
            default_branch,
            commit,
            pusher,
        } = event;
        tracing::info!(
            "📥 Push to {}@{} ({}) by {}",
            project,
            commit.branch,
            commit.short_sha(),
            if pusher.is_empty() { "unknown" } else { pusher.as_str() }
        );

        if self.store.get_project(&project).await?.is_none() {
            self.store
                .upsert_project(Project {
                    id: project.clone(),
                    clone_url: clone_url.clone(),
                    default_branch,
                    registered_at: Utc::now(),
                    webhook_installed: true,
                })
                .await?;
        }

        let Some(raw) = self
            .github
            .get_file(&project.owner, &project.repo, PROJECT_CONFIG_FILE, &commit.sha)
            .await?
        else {
            return Ok(PushOutcome::Ignored(format!("no {}", PROJECT_CONFIG_FILE)));
        };

        let config = match parse_project_config(&raw) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "Invalid {} in {}@{}: {}",
                    PROJECT_CONFIG_FILE,
                    project,
                    commit.short_sha(),
                    e
                );
                self.report_config_error(&project, &commit.sha, &e).await;
                return Ok(PushOutcome::Ignored(format!(
                    "invalid {}: {}",
                    PROJECT_CONFIG_FILE, e
                )));
            }
        };

        let workflows = config.workflows_for_branch(&commit.branch);
        if workflows.is_empty() {
            return Ok(PushOutcome::Ignored(format!(
                "branch '{}' is not configured",
                commit.branch
            )));
        }

        let jobs: Vec<Job> = workflows
            .into_iter()
            .map(|workflow| {
                Job::new(project.clone(), clone_url.clone(), commit.clone(), workflow.clone())
                    .with_notify(config.notify.clone())
            })
            .collect();

        for job in &jobs {
            self.store.upsert_job(job.clone()).await?;
            broadcast(&self.notifiers, job, None).await;
        }

        for (i, job) in jobs.iter().enumerate() {
            if let Err(e) = self.queue.enqueue(job.clone()) {
                tracing::warn!("Rejecting {} job(s) for {}: {}", jobs.len() - i, project, e);
                for rejected in &jobs[i..] {
                    self.reject(rejected.clone(), &e).await;
                }
                return Err(e);
            }
        }

        tracing::info!("Queued {} job(s) for {}@{}", jobs.len(), project, commit.short_sha());
        Ok(PushOutcome::Queued(jobs))
    }

    /// Looks up `id` on GitHub, installs the push webhook when authenticated
    /// and records the project.
    pub async fn register_project(&self, id: &ProjectId) -> Result<Project> {
        let repo = self.github.get_repo(&id.owner, &id.repo).await?;

        let webhook_installed = if self.github.is_authenticated() {
            self.github
                .create_webhook(
                    &id.owner,
                    &id.repo,
                    &self.webhook_url,
                    self.webhook_secret.as_deref(),
                )
                .await?;
            true
        } else {
            tracing::warn!("No GitHub token configured; {} registered without a webhook", id);
            false
        };

        let registered_at = match self.store.get_project(id).await? {
            Some(existing) => existing.registered_at,
            None => Utc::now(),
        };
        let project = Project {
            id: id.clone(),
            clone_url: repo.clone_url,
            default_branch: repo.default_branch,
            registered_at,
            webhook_installed,
        };
        self.store.upsert_project(project.clone()).await?;
        tracing::info!("📁 Registered {}", id);
        Ok(project)
    }

    /// Repositories of the token's user, for picking what to register.
    pub async fn registrable_repos(&self) -> Result<Vec<GithubRepo>> {
        if !self.github.is_authenticated() {
            return Err(TrackerError::MissingConfigError {
                field: "github.token".to_string(),
            });
        }
        self.github.get_repos().await
    }

    /// Builds the head of `branch` (default branch when `None`) as if it had
    /// just been pushed.
    pub async fn trigger_build(&self, id: &ProjectId, branch: Option<&str>) -> Result<PushOutcome> {
        let project = self
            .store
            .get_project(id)
            .await?
            .ok_or_else(|| TrackerError::not_found(format!("project {}", id)))?;
        let branch = branch.unwrap_or(&project.default_branch).to_string();

        let sha = self
            .github
            .get_head(&id.owner, &id.repo, &branch)
            .await?
            .ok_or_else(|| TrackerError::not_found(format!("branch '{}' of {}", branch, id)))?;

        self.handle_push(PushEvent {
            project: project.id,
            clone_url: project.clone_url,
            default_branch: project.default_branch,
            commit: Commit {
                sha,
                branch,
                message: String::new(),
                author: String::new(),
                timestamp: Utc::now(),
            },
            pusher: "manual".to_string(),
        })
        .await
    }

    async fn report_config_error(&self, project: &ProjectId, sha: &str, error: &TrackerError) {
        if !self.github.is_authenticated() {
            return;
        }
        let status = StatusUpdate {
            state: CommitState::Error,
            target_url: None,
            description: format!("invalid {}: {}", PROJECT_CONFIG_FILE, error),
            context: CONFIG_CONTEXT.to_string(),
        };
        if let Err(e) = self
            .github
            .create_status(&project.owner, &project.repo, sha, &status)
            .await
        {
            tracing::warn!("Failed to report config error on {}: {}", project, e);
        }
    }

    async fn reject(&self, mut job: Job, error: &TrackerError) {
        job.finish(JobState::Errored, RunResult::errored(error.to_string()));
        if let Err(e) = self.store.upsert_job(job.clone()).await {
            tracing::error!(job_id = %job.id, "Failed to store rejected job: {}", e);
        }
        broadcast(&self.notifiers, &job, None).await;
    }
}

fn parse_project_config(raw: &[u8]) -> Result<ProjectConfig> {
    let content = std::str::from_utf8(raw).map_err(|e| TrackerError::ConfigValidationError {
        field: PROJECT_CONFIG_FILE.to_string(),
        message: format!("not valid UTF-8: {}", e),
    })?;
    let config = ProjectConfig::from_yaml_str(content)?;
    config.validate_config()?;
    Ok(config)
}
