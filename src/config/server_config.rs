use crate::utils::error::{Result, TrackerError};
use crate::utils::validation::{
    validate_path, validate_range, validate_required_field, validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: HttpConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub notify: NotifySettings,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_github_api")]
    pub api_url: String,
    pub token: Option<String>,
    pub webhook_secret: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api(),
            token: None,
            webhook_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default = "default_timeout_minutes")]
    pub default_timeout_minutes: u64,
    #[serde(default)]
    pub keep_workspaces: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            workspace_root: default_workspace_root(),
            default_timeout_minutes: default_timeout_minutes(),
            keep_workspaces: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default, rename = "type")]
    pub kind: StoreKind,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySettings {
    #[serde(default = "default_true")]
    pub github_status: bool,
    pub mail_relay_url: Option<String>,
    pub mail_from: Option<String>,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            github_status: true,
            mail_relay_url: None,
            mail_from: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub system_stats: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
            system_stats: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_github_api() -> String {
    DEFAULT_GITHUB_API.to_string()
}

fn default_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    100
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./work")
}

fn default_timeout_minutes() -> u64 {
    60
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./results")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    /// Minimal configuration for local use and tests.
    pub fn local(public_url: &str) -> Self {
        Self {
            server: HttpConfig {
                listen_addr: default_listen_addr(),
                public_url: public_url.to_string(),
            },
            github: GithubConfig::default(),
            dispatcher: DispatcherConfig::default(),
            store: StoreConfig {
                kind: StoreKind::Memory,
                path: default_store_path(),
            },
            notify: NotifySettings::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(TrackerError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| TrackerError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables stay verbatim.
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| TrackerError::config(e.to_string()))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validate_url("server.public_url", &self.server.public_url)?;
        validate_url("github.api_url", &self.github.api_url)?;

        validate_range("dispatcher.workers", self.dispatcher.workers, 1, 64)?;
        validate_range(
            "dispatcher.queue_capacity",
            self.dispatcher.queue_capacity,
            1,
            100_000,
        )?;
        validate_range(
            "dispatcher.default_timeout_minutes",
            self.dispatcher.default_timeout_minutes,
            1,
            24 * 60,
        )?;
        validate_path(
            "dispatcher.workspace_root",
            &self.dispatcher.workspace_root.to_string_lossy(),
        )?;

        if self.store.kind == StoreKind::File {
            validate_path("store.path", &self.store.path.to_string_lossy())?;
        }

        if let Some(relay) = &self.notify.mail_relay_url {
            validate_url("notify.mail_relay_url", relay)?;
            validate_required_field("notify.mail_from", &self.notify.mail_from)?;
        }

        if let Some(secret) = &self.github.webhook_secret {
            if secret.starts_with("${") {
                return Err(TrackerError::InvalidConfigValueError {
                    field: "github.webhook_secret".to_string(),
                    value: secret.clone(),
                    reason: "environment variable is not set".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn github_token(&self) -> Option<&str> {
        self.github
            .token
            .as_deref()
            .filter(|t| !t.is_empty() && !t.starts_with("${"))
    }

    pub fn webhook_url(&self) -> String {
        format!(
            "{}/webhooks/github",
            self.server.public_url.trim_end_matches('/')
        )
    }

    pub fn job_url(&self, job_id: &str) -> String {
        format!(
            "{}/api/v1/jobs/{}",
            self.server.public_url.trim_end_matches('/'),
            job_id
        )
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
