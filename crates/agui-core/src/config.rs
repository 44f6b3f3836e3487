//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Known agent profiles.
pub const PROFILES: &[&str] = &["document", "frontend_tools"];

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_PROVIDER_ID: &str = "google";
const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Permissive development CORS (any origin, credentials allowed).
    #[serde(default = "default_true")]
    pub cors: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent profile: "document" (default) or "frontend_tools".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Base instructions; overrides the profile default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_iterations: Option<u32>,

    /// Seconds to wait for the next provider chunk before failing the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<ProviderConfig>>,
}

/// Configuration for a single LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    /// The built-in Gemini provider, keyed from `GEMINI_API_KEY`.
    pub fn gemini_default() -> Self {
        Self {
            id: DEFAULT_PROVIDER_ID.into(),
            api_key_env: Some(DEFAULT_API_KEY_ENV.into()),
            api_key: None,
            base_url: None,
            default_model: None,
        }
    }

    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Endpoint queried by `get_weather` (`GET {url}?location=...`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_api_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "agui_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
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
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::AguiError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the default config.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::AguiError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Apply command-line overrides for the listen address.
    pub fn override_gateway(&mut self, port: Option<u16>, bind: Option<String>) {
        if port.is_none() && bind.is_none() {
            return;
        }
        let gateway = self.gateway.get_or_insert_with(|| GatewayConfig {
            port: DEFAULT_PORT,
            bind: None,
            cors: true,
        });
        if let Some(port) = port {
            gateway.port = port;
        }
        if bind.is_some() {
            gateway.bind = bind;
        }
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(DEFAULT_PORT)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn cors_enabled(&self) -> bool {
        self.gateway.as_ref().map(|g| g.cors).unwrap_or(true)
    }

    pub fn agent_profile(&self) -> String {
        self.agent
            .as_ref()
            .and_then(|a| a.profile.clone())
            .unwrap_or_else(|| PROFILES[0].to_string())
    }

    /// Model name: agent setting, then the provider default, then the built-in default.
    pub fn model(&self) -> String {
        self.agent
            .as_ref()
            .and_then(|a| a.model.clone())
            .or_else(|| self.provider().default_model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn instructions(&self) -> Option<&str> {
        self.agent.as_ref().and_then(|a| a.instructions.as_deref())
    }

    pub fn max_tokens(&self) -> u32 {
        self.agent
            .as_ref()
            .and_then(|a| a.max_tokens)
            .unwrap_or(4096)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.agent.as_ref().and_then(|a| a.temperature)
    }

    pub fn max_tool_iterations(&self) -> u32 {
        self.agent
            .as_ref()
            .and_then(|a| a.max_tool_iterations)
            .unwrap_or(10)
    }

    pub fn idle_timeout_secs(&self) -> u64 {
        self.agent
            .as_ref()
            .and_then(|a| a.idle_timeout_secs)
            .unwrap_or(120)
    }

    /// The first configured provider, or the built-in Gemini provider.
    pub fn provider(&self) -> ProviderConfig {
        self.models
            .as_ref()
            .and_then(|m| m.providers.as_ref())
            .and_then(|p| p.first())
            .cloned()
            .unwrap_or_else(ProviderConfig::gemini_default)
    }

    pub fn weather_api_url(&self) -> Option<&str> {
        self.tools
            .as_ref()
            .and_then(|t| t.weather_api_url.as_deref())
            .filter(|u| !u.is_empty())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let provider = self.provider();
        if provider.resolve_api_key().is_none() {
            warnings.push(format!(
                "Provider '{}' has no API key configured (set {})",
                provider.id,
                provider.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV)
            ));
        }
        if provider.id != DEFAULT_PROVIDER_ID {
            errors.push(format!("Unsupported provider '{}'", provider.id));
        }

        let profile = self.agent_profile();
        if !PROFILES.contains(&profile.as_str()) {
            errors.push(format!(
                "Unknown agent profile '{profile}' (expected one of: {})",
                PROFILES.join(", ")
            ));
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        if self.max_tool_iterations() == 0 {
            errors.push("agent.max_tool_iterations must be at least 1".to_string());
        }

        (warnings, errors)
    }
}

/// Base directory for gateway data: `~/.agui_gateway/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agui_gateway")
}
