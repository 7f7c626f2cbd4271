use crate::domain::model::Job;
use crate::utils::error::{Result, TrackerError};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct HistoryRow<'a> {
    job_id: &'a str,
    sha: &'a str,
    branch: &'a str,
    workflow: &'a str,
    state: &'static str,
    tests_total: Option<u32>,
    tests_failed: Option<u32>,
    coverage: Option<f64>,
    duration_secs: Option<u64>,
    created_at: String,
}

impl<'a> From<&'a Job> for HistoryRow<'a> {
    fn from(job: &'a Job) -> Self {
        let result = job.result.as_ref();
        let tests = result.and_then(|r| r.tests);
        Self {
            job_id: &job.id,
            sha: &job.commit.sha,
            branch: &job.commit.branch,
            workflow: &job.workflow.name,
            state: job.state.as_str(),
            tests_total: tests.map(|t| t.total),
            tests_failed: tests.map(|t| t.failed),
            coverage: result.and_then(|r| r.coverage),
            duration_secs: result.map(|r| r.duration_secs),
            created_at: job.created_at.to_rfc3339(),
        }
    }
}

/// One CSV row per job, in the order given, with a header line.
pub fn history_csv(jobs: &[Job]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if jobs.is_empty() {
        writer.write_record([
            "job_id",
            "sha",
            "branch",
            "workflow",
            "state",
            "tests_total",
            "tests_failed",
            "coverage",
            "duration_secs",
            "created_at",
        ])?;
    }
    for job in jobs {
        writer.serialize(HistoryRow::from(job))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| TrackerError::StoreError {
            message: format!("failed to flush CSV: {}", e),
        })?;
    String::from_utf8(bytes).map_err(|e| TrackerError::StoreError {
        message: format!("CSV is not UTF-8: {}", e),
    })
}
