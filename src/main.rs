use clap::Parser;
use opencorps::adapters::runner::ShellRunner;
use opencorps::adapters::storage::InMemoryStore;
use opencorps::config::project_config::{ProjectConfig, WorkflowConfig};
use opencorps::config::{CliConfig, Command};
use opencorps::core::pipeline::{PipelineSettings, Source};
use opencorps::core::report::describe;
use opencorps::domain::model::{Commit, Job, JobState, ProjectId};
use opencorps::domain::ports::{CommandRunner, CommandSpec};
use opencorps::utils::error::{ErrorSeverity, TrackerError};
use opencorps::utils::{logger, validation::Validate};
use opencorps::{RegressionEngine, RegressionPipeline, Result, Server, ServerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    let outcome = match cli.command.clone() {
        Command::Serve { config, listen } => serve(&config, listen.as_deref()).await.map(|_| 0),
        Command::Run {
            project_config,
            workdir,
            workflow,
            timeout_minutes,
            monitor,
        } => {
            logger::init_cli_logger(cli.verbose);
            run_local(
                &project_config,
                &workdir,
                workflow.as_deref(),
                timeout_minutes,
                monitor,
                cli.verbose,
            )
            .await
        }
        Command::Check { project_config } => {
            logger::init_cli_logger(cli.verbose);
            check(&project_config).map(|_| 0)
        }
    };

    match outcome {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(
                "❌ {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());
            std::process::exit(exit_code(&e));
        }
    }
}

/// Every error fails the process; severity only picks the code.
fn exit_code(error: &TrackerError) -> i32 {
    match error.severity() {
        ErrorSeverity::Low | ErrorSeverity::High => 1,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::Critical => 3,
    }
}

async fn serve(path: &Path, listen: Option<&str>) -> Result<()> {
    let mut config = ServerConfig::from_file(path)?;
    if let Some(listen) = listen {
        config.server.listen_addr =
            listen
                .parse()
                .map_err(|e: std::net::AddrParseError| TrackerError::InvalidConfigValueError {
                    field: "--listen".to_string(),
                    value: listen.to_string(),
                    reason: e.to_string(),
                })?;
    }
    logger::init_server_logger(&config.monitoring.log_level, config.monitoring.json);
    config.validate()?;

    tracing::info!("Starting opencorps {}", env!("CARGO_PKG_VERSION"));
    Server::new(config).await?.run().await
}

fn load_project_config(path: &Path) -> Result<ProjectConfig> {
    let config = ProjectConfig::from_file(path)?;
    config.validate()?;
    Ok(config)
}

fn check(path: &Path) -> Result<()> {
    let config = load_project_config(path)?;

    println!("✅ {} is valid", path.display());
    if !config.branches.is_empty() {
        println!("   branches: {}", config.branches.join(", "));
    }
    for workflow in &config.workflows {
        println!(
            "   {:<16} {:?}: {}",
            workflow.name,
            workflow.tool,
            workflow.resolved_command()?
        );
    }
    Ok(())
}

async fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let spec = CommandSpec {
        program: "git".to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        cwd: dir.to_path_buf(),
        env: Default::default(),
        timeout: Duration::from_secs(10),
    };
    match ShellRunner::new().run(&spec).await {
        Ok(output) if output.success() => Some(output.output.trim().to_string()),
        _ => None,
    }
}

/// Best effort commit of the checkout in `dir`.
async fn local_commit(dir: &Path) -> Commit {
    let sha = git_output(dir, &["rev-parse", "HEAD"]).await;
    let branch = git_output(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await;
    Commit {
        sha: sha.unwrap_or_else(|| "local".to_string()),
        branch: branch.unwrap_or_else(|| "local".to_string()),
        message: String::new(),
        author: String::new(),
        timestamp: chrono::Utc::now(),
    }
}

async fn run_local(
    project_config: &Path,
    workdir: &Path,
    only: Option<&str>,
    timeout_minutes: u64,
    monitor: bool,
    verbose: bool,
) -> Result<i32> {
    let workdir: PathBuf = std::fs::canonicalize(workdir)?;
    let config_path = if project_config.is_relative() && !project_config.exists() {
        workdir.join(project_config)
    } else {
        project_config.to_path_buf()
    };
    let config = load_project_config(&config_path)?;

    let workflows: Vec<WorkflowConfig> = match only {
        Some(name) => vec![config.workflow(name).cloned().ok_or_else(|| {
            TrackerError::InvalidConfigValueError {
                field: "--workflow".to_string(),
                value: name.to_string(),
                reason: format!(
                    "{} defines {}",
                    config_path.display(),
                    config
                        .workflows
                        .iter()
                        .map(|w| w.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }
        })?],
        None => config.workflows.clone(),
    };

    let project = ProjectId::new(
        "local",
        workdir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkout".to_string()),
    );
    let commit = local_commit(&workdir).await;
    tracing::info!(
        "Running {} workflow(s) on {} @ {}",
        workflows.len(),
        commit.branch,
        commit.short_sha()
    );

    let store = Arc::new(InMemoryStore::new());
    let pipeline = RegressionPipeline::new(
        store,
        Vec::new(),
        ShellRunner::new(),
        PipelineSettings {
            default_timeout_minutes: timeout_minutes,
            ..Default::default()
        },
        Source::Local(workdir.clone()),
    );
    let engine = RegressionEngine::new_with_monitoring(pipeline, monitor);
    if monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    let mut finished: Vec<Job> = Vec::with_capacity(workflows.len());
    for workflow in workflows {
        let job = Job::new(
            project.clone(),
            workdir.to_string_lossy(),
            commit.clone(),
            workflow,
        );
        finished.push(engine.run(job).await?);
    }

    println!();
    println!("{:<20} {:<8} {}", "WORKFLOW", "STATE", "SUMMARY");
    for job in &finished {
        println!(
            "{:<20} {:<8} {}",
            job.workflow.name,
            job.state.as_str(),
            describe(job)
        );
        if verbose && job.state != JobState::Passed {
            if let Some(result) = &job.result {
                println!("--- {} log tail ---\n{}", job.workflow.name, result.log_tail);
            }
        }
    }

    let failed = finished
        .iter()
        .filter(|j| j.state != JobState::Passed)
        .count();
    if failed > 0 {
        println!("\n❌ {} of {} workflow(s) did not pass", failed, finished.len());
        Ok(1)
    } else {
        println!("\n✅ All {} workflow(s) passed", finished.len());
        Ok(0)
    }
}
