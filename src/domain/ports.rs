use crate::domain::model::{Job, JobId, JobState, Project, ProjectId, RunResult};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Persistence for projects, jobs and their artifact bundles.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn upsert_project(&self, project: Project) -> Result<()>;

    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>>;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    async fn upsert_job(&self, job: Job) -> Result<()>;

    async fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// Newest first.
    async fn list_jobs(&self, project: &ProjectId, limit: usize) -> Result<Vec<Job>>;

    async fn put_artifact(&self, job_id: &str, data: Vec<u8>) -> Result<()>;

    async fn get_artifact(&self, job_id: &str) -> Result<Option<Vec<u8>>>;

    async fn jobs_for_commit(&self, project: &ProjectId, sha: &str) -> Result<Vec<Job>> {
        let jobs = self.list_jobs(project, usize::MAX).await?;
        Ok(jobs.into_iter().filter(|j| j.commit.sha == sha).collect())
    }

    /// Most recent job of every workflow on `branch`, ordered by workflow name.
    async fn latest_for_branch(
        &self,
        project: &ProjectId,
        branch: &str,
        workflow: Option<&str>,
    ) -> Result<Vec<Job>> {
        let jobs = self.list_jobs(project, usize::MAX).await?;
        let mut latest: BTreeMap<String, Job> = BTreeMap::new();
        for job in jobs {
            if job.commit.branch != branch {
                continue;
            }
            if workflow.is_some_and(|w| w != job.workflow.name) {
                continue;
            }
            latest.entry(job.workflow.name.clone()).or_insert(job);
        }
        Ok(latest.into_values().collect())
    }

    /// Last finished job of the same branch and workflow, excluding `job` itself.
    async fn previous_terminal(&self, job: &Job) -> Result<Option<Job>> {
        let jobs = self.list_jobs(&job.project, usize::MAX).await?;
        Ok(jobs.into_iter().find(|j| {
            j.id != job.id
                && j.state.is_terminal()
                && j.commit.branch == job.commit.branch
                && j.workflow.name == job.workflow.name
                && j.created_at <= job.created_at
        }))
    }
}

/// Reacts to job state changes (commit statuses, email).
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn job_updated(&self, job: &Job, previous: Option<&Job>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl CommandSpec {
    /// `sh -c <script>` in `cwd`.
    pub fn shell(script: &str, cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: cwd.into(),
            env: BTreeMap::new(),
            timeout,
        }
    }

    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// stdout followed by stderr.
    pub output: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs to completion. Exceeding `spec.timeout` yields `TimeoutError`.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub checkout: PathBuf,
    /// Removed after publishing.
    pub ephemeral: bool,
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub state: JobState,
    pub result: RunResult,
    pub output: String,
    pub results_file: Option<(String, Vec<u8>)>,
}

impl Execution {
    pub fn errored(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            state: JobState::Errored,
            result: RunResult::errored(message.clone()),
            output: message,
            results_file: None,
        }
    }
}

/// The three stages every job goes through.
#[async_trait]
pub trait JobPipeline: Send + Sync {
    async fn prepare(&self, job: &mut Job) -> Result<Workspace>;
    async fn execute(&self, job: &Job, workspace: &Workspace) -> Result<Execution>;
    async fn publish(
        &self,
        job: Job,
        execution: Execution,
        workspace: Option<&Workspace>,
    ) -> Result<Job>;
}

pub fn job_ids(jobs: &[Job]) -> Vec<JobId> {
    jobs.iter().map(|j| j.id.clone()).collect()
}
