use crate::utils::error::{Result, TrackerError};
use crate::utils::validation::{
    validate_identifier, validate_positive_number, validate_relative_path, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

pub const PROJECT_CONFIG_FILE: &str = ".opencorps.yml";

/// Contents of a repository's `.opencorps.yml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: Option<String>,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub workflows: Vec<WorkflowConfig>,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Cocotb,
    Vunit,
    Fusesoc,
    Iverilog,
    Verilator,
    Yosys,
    Quartus,
    Custom,
}

impl Tool {
    pub fn is_synthesis(&self) -> bool {
        matches!(self, Self::Yosys | Self::Quartus)
    }

    pub fn default_results_file(&self) -> Option<&'static str> {
        match self {
            Self::Cocotb => Some("results.xml"),
            Self::Vunit => Some("vunit_out/results.xml"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: String,
    pub tool: Tool,
    pub command: Option<String>,
    pub target: Option<String>,
    pub workdir: Option<String>,
    pub timeout_minutes: Option<u64>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub results: Option<String>,
    pub coverage_regex: Option<String>,
}

impl WorkflowConfig {
    /// Shell command run for this workflow.
    pub fn resolved_command(&self) -> Result<String> {
        if let Some(command) = &self.command {
            return Ok(command.clone());
        }

        let target = || {
            self.target
                .clone()
                .ok_or_else(|| TrackerError::MissingConfigError {
                    field: format!("workflows.{}.target", self.name),
                })
        };

        Ok(match self.tool {
            Tool::Cocotb | Tool::Iverilog | Tool::Verilator => "make".to_string(),
            Tool::Vunit => "python run.py --xunit-xml vunit_out/results.xml".to_string(),
            Tool::Fusesoc => format!("fusesoc run --target=sim {}", target()?),
            Tool::Yosys => format!(
                "yosys -s {}",
                self.target.as_deref().unwrap_or("synth.ys")
            ),
            Tool::Quartus => format!("quartus_sh --flow compile {}", target()?),
            Tool::Custom => {
                return Err(TrackerError::MissingConfigError {
                    field: format!("workflows.{}.command", self.name),
                })
            }
        })
    }

    pub fn results_file(&self) -> Option<String> {
        self.results
            .clone()
            .or_else(|| self.tool.default_results_file().map(str::to_string))
    }

    pub fn timeout_minutes_or(&self, default: u64) -> u64 {
        self.timeout_minutes.unwrap_or(default)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyOn {
    Always,
    #[default]
    Failure,
    Change,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub email: Vec<String>,
    #[serde(default)]
    pub on: NotifyOn,
    #[serde(default = "default_true")]
    pub github_status: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            email: Vec::new(),
            on: NotifyOn::default(),
            github_status: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl ProjectConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| TrackerError::ConfigValidationError {
            field: PROJECT_CONFIG_FILE.to_string(),
            message: format!("YAML parsing error: {}", e),
        })
    }

    /// Workflows that run for a push to `branch`.
    pub fn workflows_for_branch(&self, branch: &str) -> Vec<&WorkflowConfig> {
        if !self.branches.is_empty() && !self.branches.iter().any(|b| b == branch) {
            return Vec::new();
        }
        self.workflows.iter().collect()
    }

    pub fn workflow(&self, name: &str) -> Option<&WorkflowConfig> {
        self.workflows.iter().find(|w| w.name == name)
    }

    pub fn validate_config(&self) -> Result<()> {
        if self.workflows.is_empty() {
            return Err(TrackerError::ConfigValidationError {
                field: "workflows".to_string(),
                message: "at least one workflow must be defined".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for (i, workflow) in self.workflows.iter().enumerate() {
            let field = |name: &str| format!("workflows[{}].{}", i, name);

            validate_identifier(&field("name"), &workflow.name)?;
            if !seen.insert(workflow.name.as_str()) {
                return Err(TrackerError::ConfigValidationError {
                    field: field("name"),
                    message: format!("duplicate workflow name '{}'", workflow.name),
                });
            }

            workflow.resolved_command()?;

            if let Some(workdir) = &workflow.workdir {
                validate_relative_path(&field("workdir"), workdir)?;
            }
            if let Some(results) = &workflow.results {
                validate_relative_path(&field("results"), results)?;
            }
            if let Some(timeout) = workflow.timeout_minutes {
                validate_positive_number(&field("timeout_minutes"), timeout as usize, 1)?;
            }
            if let Some(pattern) = &workflow.coverage_regex {
                let re = Regex::new(pattern).map_err(|e| TrackerError::InvalidConfigValueError {
                    field: field("coverage_regex"),
                    value: pattern.clone(),
                    reason: e.to_string(),
                })?;
                if re.captures_len() < 2 {
                    return Err(TrackerError::InvalidConfigValueError {
                        field: field("coverage_regex"),
                        value: pattern.clone(),
                        reason: "pattern needs a capture group for the percentage".to_string(),
                    });
                }
            }
        }

        for address in &self.notify.email {
            if !address.contains('@') {
                return Err(TrackerError::InvalidConfigValueError {
                    field: "notify.email".to_string(),
                    value: address.clone(),
                    reason: "not an email address".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl Validate for ProjectConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
