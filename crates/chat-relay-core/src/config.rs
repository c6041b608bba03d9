//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Chat Relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles: Option<ProfilesConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    3030
}

/// Which upstream agent engine implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Http,
    #[default]
    Echo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub kind: EngineKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Echo engine only: pause between streamed words, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo_delay_ms: Option<u64>,
}

impl EngineConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant: Option<ProfileConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub research: Option<ProfileConfig>,
}

/// Per-endpoint overrides. Unset fields fall back to the built-in profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Models a request may pick via `modelOverride`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selectable_models: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_preset: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_partial_messages: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "chat_relay_stream=debug").
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
        .map_err(|e| crate::error::RelayError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::RelayError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or(3030)
    }

    pub fn bind(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn cors_origins(&self) -> &[String] {
        self.server
            .as_ref()
            .map(|s| s.cors_origins.as_slice())
            .unwrap_or_default()
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.engine.as_ref().map(|e| e.kind).unwrap_or_default()
    }

    pub fn assistant_profile(&self) -> Option<&ProfileConfig> {
        self.profiles.as_ref().and_then(|p| p.assistant.as_ref())
    }

    pub fn research_profile(&self) -> Option<&ProfileConfig> {
        self.profiles.as_ref().and_then(|p| p.research.as_ref())
    }

    /// Get a config value by dotted path (e.g. "server.port", "engine.kind").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(engine) = &self.engine {
            if engine.kind == EngineKind::Http {
                match engine.base_url.as_deref() {
                    None | Some("") => {
                        errors.push("HTTP engine requires engine.base_url".to_string())
                    }
                    Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                        errors.push(format!("engine.base_url is not an http(s) URL: {url}"))
                    }
                    Some(_) => {}
                }
                if engine.resolve_api_key().is_none() {
                    warnings.push("HTTP engine has no API key configured".to_string());
                }
            }
        }

        if let Some(server) = &self.server {
            if server.port == 0 {
                errors.push("Server port cannot be 0".to_string());
            }
        }

        for (name, profile) in [
            ("assistant", self.assistant_profile()),
            ("research", self.research_profile()),
        ] {
            let Some(profile) = profile else { continue };
            if profile.max_turns == Some(0) {
                errors.push(format!("profiles.{name}.max_turns cannot be 0"));
            }
            if let (Some(model), Some(selectable)) = (&profile.model, &profile.selectable_models)
            {
                if !selectable.is_empty() && !selectable.contains(model) {
                    warnings.push(format!(
                        "profiles.{name}.model '{model}' is not in selectable_models"
                    ));
                }
            }
        }

        (warnings, errors)
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Base directory for Chat Relay data: `~/.chat_relay/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chat_relay")
}
