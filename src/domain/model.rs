use crate::config::project_config::{NotifyConfig, WorkflowConfig};
use crate::utils::error::{Result, TrackerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId {
    pub owner: String,
    pub repo: String,
}

/// GitHub account and repository names: `[A-Za-z0-9_.-]+`, never `.` or `..`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Full 40 character hex commit id.
pub fn is_commit_sha(sha: &str) -> bool {
    sha.len() == 40 && sha.chars().all(|c| c.is_ascii_hexdigit())
}

impl ProjectId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Builds an id from untrusted names, rejecting anything GitHub wouldn't accept.
    pub fn checked(owner: &str, repo: &str) -> Result<Self> {
        for (kind, name) in [("owner", owner), ("repository", repo)] {
            if !is_valid_name(name) {
                return Err(TrackerError::ValidationError {
                    message: format!("'{}' is not a valid {} name", name, kind),
                });
            }
        }
        Ok(Self::new(owner, repo))
    }

    pub fn is_valid(&self) -> bool {
        is_valid_name(&self.owner) && is_valid_name(&self.repo)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for ProjectId {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() => {
                Self::checked(owner, repo)
            }
            _ => Err(TrackerError::ValidationError {
                message: format!("'{}' is not of the form owner/repo", s),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub clone_url: String,
    pub default_branch: String,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub webhook_installed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub branch: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

impl Commit {
    pub fn short_sha(&self) -> &str {
        let end = self
            .sha
            .char_indices()
            .nth(7)
            .map_or(self.sha.len(), |(i, _)| i);
        &self.sha[..end]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub project: ProjectId,
    pub clone_url: String,
    pub default_branch: String,
    pub commit: Commit,
    pub pusher: String,
}

pub type JobId = String;

pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Passed,
    Failed,
    Errored,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Errored)
    }

    pub fn commit_state(&self) -> CommitState {
        match self {
            Self::Queued | Self::Running => CommitState::Pending,
            Self::Passed => CommitState::Success,
            Self::Failed => CommitState::Failure,
            Self::Errored => CommitState::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// GitHub commit status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestSummary {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub exit_code: Option<i32>,
    pub duration_secs: u64,
    pub tests: Option<TestSummary>,
    pub coverage: Option<f64>,
    #[serde(default)]
    pub utilization: BTreeMap<String, u64>,
    #[serde(default)]
    pub log_tail: String,
    pub error: Option<String>,
}

impl RunResult {
    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project: ProjectId,
    pub clone_url: String,
    pub commit: Commit,
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<RunResult>,
}

impl Job {
    pub fn new(
        project: ProjectId,
        clone_url: impl Into<String>,
        commit: Commit,
        workflow: WorkflowConfig,
    ) -> Self {
        Self {
            id: new_job_id(),
            project,
            clone_url: clone_url.into(),
            commit,
            workflow,
            notify: NotifyConfig::default(),
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
        }
    }

    pub fn with_notify(mut self, notify: NotifyConfig) -> Self {
        self.notify = notify;
        self
    }

    pub fn mark_running(&mut self) {
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
    }

    /// Terminal transition. `state` must be terminal.
    pub fn finish(&mut self, state: JobState, result: RunResult) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn context(&self) -> String {
        format!("opencorps/{}", self.workflow.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeStatus {
    Passing,
    Failing,
    Error,
    Running,
    Unknown,
}

impl BadgeStatus {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Passing => "passing",
            Self::Failing => "failing",
            Self::Error => "error",
            Self::Running => "running",
            Self::Unknown => "unknown",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::Passing => "brightgreen",
            Self::Failing => "red",
            Self::Error => "orange",
            Self::Running => "yellow",
            Self::Unknown => "lightgrey",
        }
    }
}
