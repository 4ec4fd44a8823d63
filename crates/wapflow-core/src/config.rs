//! Configuration structures for wapflow.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use crate::audit::QualityCheck;
use crate::lakehouse::MergeMode;
use crate::model::BranchName;
use crate::wap::SchemaPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Lakehouse configuration
    #[serde(default)]
    pub lakehouse: LakehouseConfig,

    /// Staging configuration
    #[serde(default)]
    pub staging: StagingConfig,

    /// Audit configuration
    #[serde(default)]
    pub audit: AuditConfig,

    /// Run journal configuration
    #[serde(default)]
    pub journal: JournalConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Lakehouse configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LakehouseConfig {
    /// Directory holding the lakehouse catalog
    #[serde(default = "default_warehouse_dir")]
    pub warehouse_dir: PathBuf,

    /// Branch that receives published data
    #[serde(default = "default_main_branch")]
    pub main_branch: BranchName,

    /// Prefix of generated staging branch names
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Merge conflict policy
    #[serde(default)]
    pub merge_mode: MergeMode,
}

impl Default for LakehouseConfig {
    fn default() -> Self {
        Self {
            warehouse_dir: default_warehouse_dir(),
            main_branch: default_main_branch(),
            branch_prefix: default_branch_prefix(),
            merge_mode: MergeMode::default(),
        }
    }
}

/// Staging configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StagingConfig {
    /// Create the destination table from the batch columns when missing
    #[serde(default)]
    pub auto_create_table: bool,

    /// How batch columns must match the destination table
    #[serde(default)]
    pub schema_policy: SchemaPolicy,
}

/// Audit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    /// Quality checks every batch must pass
    #[serde(default = "default_checks")]
    pub checks: Vec<QualityCheck>,

    /// Audit timeout in seconds (0 = no timeout)
    #[serde(default)]
    pub timeout_seconds: u64,
}

impl AuditConfig {
    /// Audit timeout, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            checks: default_checks(),
            timeout_seconds: 0,
        }
    }
}

/// Run journal configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JournalConfig {
    /// Enable the run journal
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Journal directory
    #[serde(default = "default_journal_dir")]
    pub dir: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            dir: default_journal_dir(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive usable in an `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_warehouse_dir() -> PathBuf {
    PathBuf::from("./warehouse")
}
fn default_main_branch() -> BranchName {
    BranchName::main()
}
fn default_branch_prefix() -> String {
    "wap_".to_string()
}
fn default_checks() -> Vec<QualityCheck> {
    vec![QualityCheck::not_null("pickup_datetime")]
}
fn default_enabled() -> bool {
    true
}
fn default_journal_dir() -> PathBuf {
    PathBuf::from("./run_journal")
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.lakehouse.warehouse_dir.as_os_str().is_empty() {
            return Err(crate::Error::Config("Warehouse directory is required".into()));
        }

        if BranchName::new(format!("{}0", self.lakehouse.branch_prefix)).is_err() {
            return Err(crate::Error::Config(format!(
                "Branch prefix '{}' does not form valid branch names",
                self.lakehouse.branch_prefix
            )));
        }

        if self.audit.checks.is_empty() {
            return Err(crate::Error::Config(
                "At least one quality check is required".into(),
            ));
        }

        if self.journal.enabled && self.journal.dir.as_os_str().is_empty() {
            return Err(crate::Error::Config(
                "Journal directory is required when the journal is enabled".into(),
            ));
        }

        if self.lakehouse.merge_mode == MergeMode::FastForwardOnly {
            tracing::warn!("Fast-forward-only merges reject any run that overlaps another publish");
        }

        Ok(())
    }
}
