//! Runtime configuration.
//!
//! Built once at startup from an optional TOML file plus environment
//! overrides, validated, then passed by reference to the components.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::DoctorError;
use crate::escalate::TRUNCATION_MARKER;

/// Environment variable naming the only cluster this tool may run against.
pub const ENV_EXPECTED_CLUSTER: &str = "POD_DOCTOR_EXPECTED_CLUSTER";

/// Environment variable overriding the kubeconfig path.
pub const ENV_KUBECONFIG: &str = "POD_DOCTOR_KUBECONFIG";

/// Environment variable overriding the reasoning model.
pub const ENV_MODEL: &str = "POD_DOCTOR_MODEL";

/// Environment variable holding the reasoning service API key.
pub const ENV_API_KEY: &str = "ANTHROPIC_API_KEY";

/// Default reasoning model
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorConfig {
    /// Cluster name the active kubeconfig context must point at
    pub expected_cluster: String,
    /// Kubeconfig path; the standard lookup is used when unset
    pub kubeconfig: Option<PathBuf>,
    /// Per-read timeout for cluster calls
    pub fetch_timeout_secs: u64,
    /// Lines to read from the crashed container's log
    pub log_tail_lines: i64,
    /// Unhealthy pods investigated at once
    pub max_concurrency: usize,
    pub escalation: EscalationConfig,
}

impl Default for DoctorConfig {
    fn default() -> Self {
        Self {
            expected_cluster: String::new(),
            kubeconfig: None,
            fetch_timeout_secs: 10,
            log_tail_lines: 50,
            max_concurrency: 8,
            escalation: EscalationConfig::default(),
        }
    }
}

/// Reasoning service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// When false, unmatched bundles go straight to the fallback diagnosis
    pub enabled: bool,
    pub model: String,
    /// Never read from or written to the config file
    #[serde(skip)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Most recent events included in the prompt
    pub max_events: usize,
    /// Trailing log characters included in the prompt
    pub max_log_chars: usize,
    /// Hard cap on the whole prompt
    pub max_prompt_chars: usize,
    /// Upper bound on the length of the service's answer
    pub max_tokens: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout_secs: 30,
            max_attempts: 2,
            retry_backoff_ms: 500,
            max_events: 20,
            max_log_chars: 4000,
            max_prompt_chars: 12_000,
            max_tokens: 1024,
        }
    }
}

impl EscalationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl DoctorConfig {
    /// Load from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, DoctorError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| DoctorError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, DoctorError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(cluster) = get(ENV_EXPECTED_CLUSTER) {
            self.expected_cluster = cluster;
        }
        if let Some(path) = get(ENV_KUBECONFIG) {
            self.kubeconfig = Some(PathBuf::from(path));
        }
        if let Some(model) = get(ENV_MODEL) {
            self.escalation.model = model;
        }
        if let Some(key) = get(ENV_API_KEY) {
            self.escalation.api_key = Some(key);
        }
    }

    /// Check everything that must hold before touching the cluster.
    pub fn validate(&self) -> Result<(), DoctorError> {
        if self.expected_cluster.trim().is_empty() {
            return Err(DoctorError::InvalidConfig(format!(
                "expected_cluster must be set (config file or {ENV_EXPECTED_CLUSTER})"
            )));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(DoctorError::InvalidConfig(
                "fetch_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.log_tail_lines <= 0 {
            return Err(DoctorError::InvalidConfig(
                "log_tail_lines must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(DoctorError::InvalidConfig(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }

        let esc = &self.escalation;
        if esc.enabled {
            if esc.api_key.is_none() {
                return Err(DoctorError::MissingCredentials(ENV_API_KEY));
            }
            if esc.timeout_secs == 0 || esc.max_attempts == 0 {
                return Err(DoctorError::InvalidConfig(
                    "escalation timeout_secs and max_attempts must be greater than zero"
                        .to_string(),
                ));
            }
            if esc.max_prompt_chars <= TRUNCATION_MARKER.len() {
                return Err(DoctorError::InvalidConfig(format!(
                    "escalation max_prompt_chars must be greater than {}",
                    TRUNCATION_MARKER.len()
                )));
            }
            if esc.max_tokens == 0 {
                return Err(DoctorError::InvalidConfig(
                    "escalation max_tokens must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Kubeconfig path with a leading `~/` expanded against `$HOME`.
    pub fn kubeconfig_path(&self) -> Option<PathBuf> {
        let path = self.kubeconfig.as_ref()?;
        match (path.strip_prefix("~"), std::env::var_os("HOME")) {
            (Ok(rest), Some(home)) => Some(PathBuf::from(home).join(rest)),
            _ => Some(path.clone()),
        }
    }
}
