use std::{env, fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, eval::rubric::RubricKind};

pub const DEFAULT_API_VERSION: &str = "2024-08-01-preview";
const DEFAULT_MAX_CONCURRENCY: usize = 8;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Settings the harness needs before any scoring call is attempted.
///
/// Required settings default to empty strings so that a partially filled
/// YAML file deserializes and [`EvalConfig::validate`] can name the first gap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub project_connection: String,
    #[serde(default)]
    pub thresholds: ThresholdOverrides,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Per-run overrides of the rubric default thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_resolution: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_adherence: Option<f64>,
}

impl ThresholdOverrides {
    pub fn for_kind(&self, kind: RubricKind) -> Option<f64> {
        match kind {
            RubricKind::IntentResolution => self.intent_resolution,
            RubricKind::ToolCallAccuracy => self.tool_call_accuracy,
            RubricKind::TaskAdherence => self.task_adherence,
        }
    }
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl EvalConfig {
    pub fn new(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        deployment: impl Into<String>,
        project_connection: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            deployment: deployment.into(),
            project_connection: project_connection.into(),
            thresholds: ThresholdOverrides::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdOverrides) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout_ms = request_timeout.as_millis() as u64;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reads settings from the process environment. Library code should take
    /// an explicit [`EvalConfig`]; this is meant for binaries.
    pub fn from_env() -> Result<Self, ConfigError> {
        let read = |name: &str| env::var(name).unwrap_or_default();

        let mut config = Self::new(
            read("AZURE_AI_ENDPOINT"),
            read("AZURE_AI_API_KEY"),
            read("AZURE_AI_DEPLOYMENT"),
            read("AZURE_AI_PROJECT_CONNECTION"),
        );
        if let Ok(version) = env::var("AZURE_AI_API_VERSION") {
            config.api_version = version;
        }
        if let Ok(value) = env::var("RUBRICWERK_MAX_CONCURRENCY") {
            config.max_concurrency = value.parse().map_err(|_| ConfigError::Invalid {
                setting: "max_concurrency",
                message: format!("'{value}' is not a positive integer"),
            })?;
        }
        if let Ok(value) = env::var("RUBRICWERK_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = value.parse().map_err(|_| ConfigError::Invalid {
                setting: "request_timeout_ms",
                message: format!("'{value}' is not a number of milliseconds"),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Fails on the first required setting that is missing or blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required: [(&'static str, &str); 5] = [
            ("endpoint", &self.endpoint),
            ("access_key", &self.access_key),
            ("api_version", &self.api_version),
            ("deployment", &self.deployment),
            ("project_connection", &self.project_connection),
        ];
        for (setting, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(setting));
            }
        }

        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                setting: "max_concurrency",
                message: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                setting: "request_timeout_ms",
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
