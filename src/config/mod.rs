pub mod project_config;
pub mod server_config;

pub use project_config::{ProjectConfig, WorkflowConfig};
pub use server_config::ServerConfig;

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "opencorps")]
#[command(about = "Regression-as-a-service tracker for RTL projects")]
#[command(version)]
pub struct CliConfig {
    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the webhook/API service and job dispatcher
    Serve {
        #[arg(short, long, env = "OPENCORPS_CONFIG", default_value = "opencorps.toml")]
        config: PathBuf,

        /// Override `server.listen_addr`
        #[arg(short, long, env = "OPENCORPS_LISTEN_ADDR")]
        listen: Option<String>,
    },

    /// Run the workflows of a local checkout once and print the results
    Run {
        #[arg(long, default_value = ".opencorps.yml")]
        project_config: PathBuf,

        #[arg(long, default_value = ".")]
        workdir: PathBuf,

        /// Only run the named workflow
        #[arg(long)]
        workflow: Option<String>,

        #[arg(long, default_value = "60")]
        timeout_minutes: u64,

        #[arg(long, help = "Log process CPU and memory while running")]
        monitor: bool,
    },

    /// Validate a .opencorps.yml file
    Check {
        #[arg(long, default_value = ".opencorps.yml")]
        project_config: PathBuf,
    },
}
