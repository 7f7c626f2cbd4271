use crate::domain::model::Job;
use crate::domain::ports::{Execution, JobPipeline};
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;
use std::time::Instant;

/// Drives one job through prepare, execute and publish.
pub struct RegressionEngine<P: JobPipeline> {
    pipeline: P,
    monitor: Option<SystemMonitor>,
}

impl<P: JobPipeline> RegressionEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self {
            pipeline,
            monitor: None,
        }
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: Some(SystemMonitor::new(monitor_enabled)),
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// Runs `job` to a terminal state. Failures in preparing or executing
    /// are recorded on the job as `errored`; only a failure to publish
    /// is returned.
    pub async fn run(&self, mut job: Job) -> Result<Job> {
        tracing::info!(
            job_id = %job.id,
            "🚀 {}@{} {}",
            job.project,
            job.commit.short_sha(),
            job.workflow.name
        );
        let started = Instant::now();
        if let Some(monitor) = &self.monitor {
            monitor.job_started(&job.id);
        }

        let (execution, workspace) = match self.pipeline.prepare(&mut job).await {
            Ok(workspace) => {
                let execution = match self.pipeline.execute(&job, &workspace).await {
                    Ok(execution) => execution,
                    Err(e) => {
                        tracing::error!(job_id = %job.id, "Execution failed: {}", e);
                        Execution::errored(e.to_string())
                    }
                };
                (execution, Some(workspace))
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, "Preparation failed: {}", e);
                (Execution::errored(e.to_string()), None)
            }
        };

        let job = self
            .pipeline
            .publish(job, execution, workspace.as_ref())
            .await?;

        if let Some(monitor) = &self.monitor {
            monitor.job_finished(&job.id, started.elapsed());
        }
        Ok(job)
    }
}
