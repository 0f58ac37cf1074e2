//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::InterpError;

const DEFAULT_MODEL: &str = "gpt-4";
const DEFAULT_TEMPERATURE: f64 = 0.001;
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Top-level Rusty Interpreter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Run code without asking for confirmation.
    #[serde(default)]
    pub auto_run: bool,

    /// The model runs locally and may emit arguments that are not JSON.
    #[serde(default)]
    pub local: bool,

    /// Dump prompts and backend traffic at debug level.
    #[serde(default)]
    pub debug: bool,

    /// Maximum model requests per user turn (0 = unbounded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,

    /// Replaces the built-in system message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
}

/// Configuration for the model provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        let env = self
            .api_key_env
            .clone()
            .or_else(|| Some(DEFAULT_API_KEY_ENV.to_string()));
        resolve_secret_field(&self.api_key, &env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Per-submission timeout. Unset means backends run until the code finishes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Working directory for spawned interpreters (supports `~`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            max_output_bytes: default_max_output_bytes(),
            working_dir: None,
        }
    }
}

fn default_max_output_bytes() -> usize {
    100_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "rusty_interp_agent=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(InterpError::Io)?;

        // Substitute ${ENV_VAR} references before parsing
        let substituted = substitute_env_vars(&raw);

        let config: Config =
            json5::from_str(&substituted).map_err(|e| InterpError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn model(&self) -> String {
        self.agent
            .as_ref()
            .and_then(|a| a.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn temperature(&self) -> f64 {
        self.agent
            .as_ref()
            .and_then(|a| a.temperature)
            .unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn auto_run(&self) -> bool {
        self.agent.as_ref().is_some_and(|a| a.auto_run)
    }

    pub fn local(&self) -> bool {
        self.agent.as_ref().is_some_and(|a| a.local)
    }

    pub fn debug(&self) -> bool {
        self.agent.as_ref().is_some_and(|a| a.debug)
    }

    /// Maximum model requests per user turn. Unset or 0 means unbounded.
    pub fn max_iterations(&self) -> Option<u32> {
        self.agent
            .as_ref()
            .and_then(|a| a.max_iterations)
            .filter(|&n| n > 0)
    }

    pub fn system_message(&self) -> Option<&str> {
        self.agent.as_ref().and_then(|a| a.system_message.as_deref())
    }

    pub fn exec(&self) -> ExecConfig {
        self.exec.clone().unwrap_or_default()
    }

    /// Working directory for interpreters, defaulting to the current directory.
    pub fn working_dir(&self) -> PathBuf {
        self.exec
            .as_ref()
            .and_then(|e| e.working_dir.as_ref())
            .map(|w| PathBuf::from(shellexpand::tilde(w).as_ref()))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn provider(&self) -> ProviderConfig {
        self.provider.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Mutable agent section, created on first use.
    pub fn agent_mut(&mut self) -> &mut AgentConfig {
        self.agent.get_or_insert_with(AgentConfig::default)
    }

    /// Get a config value by dotted path (e.g. "agent.model", "exec.timeout_secs").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Set a config value by dotted path.
    pub fn set_path(&mut self, path: &str, value: serde_json::Value) -> anyhow::Result<()> {
        let mut json = serde_json::to_value(&*self)
            .map_err(|e| anyhow::anyhow!("Config serialization error: {e}"))?;

        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            anyhow::bail!("Empty path");
        };

        // Navigate to the parent of the target key
        let mut current = &mut json;
        for segment in parents {
            let Some(object) = current.as_object_mut() else {
                anyhow::bail!("'{segment}' is not inside an object");
            };
            current = object
                .entry(segment.to_string())
                .or_insert_with(|| serde_json::json!({}));
        }

        let Some(object) = current.as_object_mut() else {
            anyhow::bail!("Cannot set '{path}': parent is not an object");
        };
        object.insert(last.to_string(), value);

        *self = serde_json::from_value(json)
            .map_err(|e| anyhow::anyhow!("Config deserialization error: {e}"))?;
        Ok(())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if !self.local() && self.provider().resolve_api_key().is_none() {
            warnings.push("No API key configured for the model provider".to_string());
        }

        let temperature = self.temperature();
        if !(0.0..=2.0).contains(&temperature) {
            errors.push(format!("Temperature {temperature} is outside 0.0..=2.0"));
        }

        let exec = self.exec();
        if exec.max_output_bytes == 0 {
            errors.push("exec.max_output_bytes cannot be 0".to_string());
        }
        if exec.timeout_secs == Some(0) {
            errors.push("exec.timeout_secs cannot be 0".to_string());
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for Rusty Interpreter data: `~/.rusty_interp/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rusty_interp")
}
