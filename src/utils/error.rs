use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("{endpoint} returned HTTP {status}: {body}")]
    HttpStatusError {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Webhook error: {message}")]
    WebhookError { message: String },

    #[error("Webhook signature rejected: {message}")]
    SignatureError { message: String },

    #[error("Toolchain error: {message}")]
    ToolchainError { message: String },

    #[error("Job timed out after {minutes} minutes")]
    TimeoutError { minutes: u64 },

    #[error("Job queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Storage error: {message}")]
    StoreError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Configuration,
    Validation,
    Webhook,
    Toolchain,
    Storage,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl TrackerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn toolchain(message: impl Into<String>) -> Self {
        Self::ToolchainError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ApiError(_) | Self::HttpStatusError { .. } => ErrorCategory::Network,
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. }
            | Self::YamlError(_) => ErrorCategory::Configuration,
            Self::ValidationError { .. } | Self::SerializationError(_) | Self::NotFound { .. } => {
                ErrorCategory::Validation
            }
            Self::WebhookError { .. } | Self::SignatureError { .. } => ErrorCategory::Webhook,
            Self::ToolchainError { .. } | Self::TimeoutError { .. } | Self::QueueFull { .. } => {
                ErrorCategory::Toolchain
            }
            Self::ZipError(_) | Self::CsvError(_) | Self::StoreError { .. } => {
                ErrorCategory::Storage
            }
            Self::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound { .. } | Self::WebhookError { .. } => ErrorSeverity::Low,
            Self::ApiError(_)
            | Self::HttpStatusError { .. }
            | Self::TimeoutError { .. }
            | Self::QueueFull { .. } => ErrorSeverity::Medium,
            Self::IoError(_) | Self::StoreError { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Medium)
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => {
                "Check network connectivity and that the GitHub token has repo and admin:repo_hook scopes"
            }
            ErrorCategory::Configuration => {
                "Review the configuration file against the documented schema"
            }
            ErrorCategory::Validation => "Check the request parameters and try again",
            ErrorCategory::Webhook => {
                "Make sure the webhook secret configured on GitHub matches the server configuration"
            }
            ErrorCategory::Toolchain => {
                "Make sure the simulation/synthesis tools are installed and on PATH, or raise the timeout"
            }
            ErrorCategory::Storage => "Check the results store path and its permissions",
            ErrorCategory::System => "Check disk space and file permissions",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::ApiError(e) => format!("Could not reach the remote API: {}", e),
            Self::HttpStatusError { endpoint, status, .. } => {
                format!("{} answered with HTTP {}", endpoint, status)
            }
            Self::MissingConfigError { field } => {
                format!("The setting '{}' is required but was not provided", field)
            }
            Self::TimeoutError { minutes } => {
                format!("The job did not finish within {} minutes", minutes)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
