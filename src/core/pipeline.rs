use crate::adapters::runner::git_checkout;
use crate::adapters::storage::bundle_artifacts;
use crate::core::toolchain;
use crate::domain::model::{Job, JobState};
use crate::domain::ports::{
    CommandRunner, CommandSpec, Execution, JobPipeline, Notifier, ResultStore, Workspace,
};
use crate::utils::error::{Result, TrackerError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where job sources come from.
#[derive(Debug, Clone)]
pub enum Source {
    /// Fresh clone of the job's repository per job.
    Git,
    /// An existing checkout, used as-is and never deleted.
    Local(PathBuf),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workspace_root: PathBuf,
    pub default_timeout_minutes: u64,
    pub keep_workspaces: bool,
    pub checkout_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("./work"),
            default_timeout_minutes: 60,
            keep_workspaces: false,
            checkout_timeout: Duration::from_secs(600),
        }
    }
}

pub struct RegressionPipeline<R: CommandRunner> {
    store: Arc<dyn ResultStore>,
    notifiers: Vec<Arc<dyn Notifier>>,
    runner: R,
    settings: PipelineSettings,
    source: Source,
}

impl<R: CommandRunner> RegressionPipeline<R> {
    pub fn new(
        store: Arc<dyn ResultStore>,
        notifiers: Vec<Arc<dyn Notifier>>,
        runner: R,
        settings: PipelineSettings,
        source: Source,
    ) -> Self {
        Self {
            store,
            notifiers,
            runner,
            settings,
            source,
        }
    }
}

/// Delivers `job` to every notifier. Failures are logged, never returned.
pub async fn broadcast(notifiers: &[Arc<dyn Notifier>], job: &Job, previous: Option<&Job>) {
    for notifier in notifiers {
        if let Err(e) = notifier.job_updated(job, previous).await {
            tracing::warn!(
                job_id = %job.id,
                notifier = notifier.name(),
                "Notification failed: {}",
                e
            );
        }
    }
}

fn workflow_env(job: &Job) -> Vec<(String, String)> {
    vec![
        ("OPENCORPS_SHA".to_string(), job.commit.sha.clone()),
        ("OPENCORPS_BRANCH".to_string(), job.commit.branch.clone()),
        ("OPENCORPS_WORKFLOW".to_string(), job.workflow.name.clone()),
        ("OPENCORPS_PROJECT".to_string(), job.project.to_string()),
    ]
}

#[async_trait::async_trait]
impl<R: CommandRunner> JobPipeline for RegressionPipeline<R> {
    async fn prepare(&self, job: &mut Job) -> Result<Workspace> {
        job.mark_running();
        self.store.upsert_job(job.clone()).await?;
        broadcast(&self.notifiers, job, None).await;

        match &self.source {
            Source::Local(path) => Ok(Workspace {
                root: path.clone(),
                checkout: path.clone(),
                ephemeral: false,
            }),
            Source::Git => {
                let root = self.settings.workspace_root.join(&job.id);
                tokio::fs::create_dir_all(&root).await?;
                let root = tokio::fs::canonicalize(&root).await?;
                let checkout = root.join("src");

                tracing::debug!(
                    job_id = %job.id,
                    "Cloning {} @ {} into {:?}",
                    job.clone_url,
                    job.commit.short_sha(),
                    checkout
                );
                let workspace = Workspace {
                    root,
                    checkout,
                    ephemeral: !self.settings.keep_workspaces,
                };
                if let Err(e) = git_checkout(
                    &self.runner,
                    &job.clone_url,
                    &job.commit.sha,
                    &workspace.checkout,
                    self.settings.checkout_timeout,
                )
                .await
                {
                    remove_workspace(&workspace).await;
                    return Err(e);
                }
                Ok(workspace)
            }
        }
    }

    async fn execute(&self, job: &Job, workspace: &Workspace) -> Result<Execution> {
        let workflow = &job.workflow;
        let command = workflow.resolved_command()?;
        let cwd = match &workflow.workdir {
            Some(dir) => workspace.checkout.join(dir),
            None => workspace.checkout.clone(),
        };
        if !tokio::fs::try_exists(&cwd).await? {
            return Err(TrackerError::toolchain(format!(
                "working directory {:?} does not exist",
                workflow.workdir.as_deref().unwrap_or(".")
            )));
        }

        let minutes = workflow.timeout_minutes_or(self.settings.default_timeout_minutes);
        let mut spec = CommandSpec::shell(&command, &cwd, Duration::from_secs(minutes * 60));
        spec.env
            .extend(workflow.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        spec.env.extend(workflow_env(job));

        tracing::info!(
            job_id = %job.id,
            "▶️ {} {}: `{}`",
            job.project,
            workflow.name,
            command
        );

        let output = match self.runner.run(&spec).await {
            Ok(output) => output,
            Err(TrackerError::TimeoutError { minutes }) => {
                let mut execution =
                    Execution::errored(format!("timed out after {} minutes", minutes));
                execution.result.duration_secs = minutes * 60;
                return Ok(execution);
            }
            Err(e) => return Err(e),
        };

        let results_file = match workflow.results_file() {
            Some(name) => match tokio::fs::read(cwd.join(&name)).await {
                Ok(data) => Some((name, data)),
                Err(_) => {
                    tracing::debug!(job_id = %job.id, "No results file at {}", name);
                    None
                }
            },
            None => None,
        };
        let results_xml = results_file
            .as_ref()
            .map(|(_, data)| String::from_utf8_lossy(data).into_owned());

        let (state, result) = toolchain::analyze(
            workflow,
            output.exit_code,
            &output.output,
            results_xml.as_deref(),
            output.duration.as_secs(),
        );

        Ok(Execution {
            state,
            result,
            output: output.output,
            results_file,
        })
    }

    async fn publish(
        &self,
        mut job: Job,
        execution: Execution,
        workspace: Option<&Workspace>,
    ) -> Result<Job> {
        let Execution {
            state,
            result,
            output,
            results_file,
        } = execution;
        job.finish(state, result);

        let bundle = bundle_artifacts(
            &output,
            results_file
                .as_ref()
                .map(|(name, data)| (name.as_str(), data.as_slice())),
        );
        match bundle {
            Ok(bundle) => {
                if let Err(e) = self.store.put_artifact(&job.id, bundle).await {
                    tracing::warn!(job_id = %job.id, "Failed to store artifacts: {}", e);
                }
            }
            Err(e) => tracing::warn!(job_id = %job.id, "Failed to bundle artifacts: {}", e),
        }

        if let Some(workspace) = workspace {
            if workspace.ephemeral {
                remove_workspace(workspace).await;
            }
        }

        let previous = self.store.previous_terminal(&job).await?;
        self.store.upsert_job(job.clone()).await?;
        broadcast(&self.notifiers, &job, previous.as_ref()).await;

        match job.state {
            JobState::Passed => tracing::info!(job_id = %job.id, "✅ {} {} passed", job.project, job.workflow.name),
            state => tracing::warn!(job_id = %job.id, "❌ {} {} {}", job.project, job.workflow.name, state),
        }
        Ok(job)
    }
}

async fn remove_workspace(workspace: &Workspace) {
    if let Err(e) = tokio::fs::remove_dir_all(&workspace.root).await {
        tracing::warn!("Failed to remove workspace {:?}: {}", workspace.root, e);
    }
}
