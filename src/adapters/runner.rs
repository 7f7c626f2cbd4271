use crate::domain::ports::{CommandOutput, CommandRunner, CommandSpec};
use crate::utils::error::{Result, TrackerError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Runs commands as local child processes.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!("Running `{}` in {:?}", spec.display(), spec.cwd);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = command.spawn().map_err(|e| {
            TrackerError::toolchain(format!("failed to start `{}`: {}", spec.program, e))
        })?;

        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                // Dropping the future kills the child.
                return Err(TrackerError::TimeoutError {
                    minutes: spec.timeout.as_secs().div_ceil(60),
                });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        Ok(CommandOutput {
            exit_code: output.status.code(),
            output: combined,
            duration: started.elapsed(),
        })
    }
}

/// Clones `clone_url` into `dest` and checks out `sha`.
pub async fn git_checkout(
    runner: &dyn CommandRunner,
    clone_url: &str,
    sha: &str,
    dest: &Path,
    timeout: Duration,
) -> Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| TrackerError::config(format!("invalid checkout path {:?}", dest)))?;

    let clone = CommandSpec {
        program: "git".to_string(),
        args: vec![
            "clone".to_string(),
            "--quiet".to_string(),
            clone_url.to_string(),
            dest.to_string_lossy().into_owned(),
        ],
        cwd: parent.to_path_buf(),
        env: [("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())].into(),
        timeout,
    };
    let output = runner.run(&clone).await?;
    if !output.success() {
        return Err(TrackerError::toolchain(format!(
            "git clone {} failed: {}",
            clone_url,
            output.output.trim()
        )));
    }

    let checkout = CommandSpec {
        program: "git".to_string(),
        args: vec![
            "checkout".to_string(),
            "--quiet".to_string(),
            "--detach".to_string(),
            sha.to_string(),
        ],
        cwd: dest.to_path_buf(),
        env: Default::default(),
        timeout,
    };
    let output = runner.run(&checkout).await?;
    if !output.success() {
        return Err(TrackerError::toolchain(format!(
            "git checkout {} failed: {}",
            sha,
            output.output.trim()
        )));
    }
    Ok(())
}
