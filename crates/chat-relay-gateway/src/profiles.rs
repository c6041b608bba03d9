//! Endpoint profiles: what distinguishes the assistant and research endpoints.

use std::path::PathBuf;

use tracing::warn;

use chat_relay_core::config::{Config, ProfileConfig, expand_path};
use chat_relay_engine::QueryOptions;
use chat_relay_stream::{ASSISTANT_SYSTEM_PROMPT, RESEARCH_SYSTEM_PROMPT};

pub const DEFAULT_ASSISTANT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_RESEARCH_MODEL: &str = "claude-opus-4-1";

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointProfile {
    /// Telemetry tag for the endpoint.
    pub name: &'static str,
    pub system_prompt: String,
    pub default_model: String,
    /// Models a request may select with `modelOverride`.
    pub selectable_models: Vec<String>,
    pub max_turns: u32,
    pub tool_preset: String,
    pub permission_mode: String,
    pub include_partial_messages: bool,
    pub working_directory: Option<PathBuf>,
}

impl EndpointProfile {
    /// Built-in general assistant profile.
    pub fn assistant() -> Self {
        let defaults = QueryOptions::default();
        Self {
            name: "assistant",
            system_prompt: ASSISTANT_SYSTEM_PROMPT.to_string(),
            default_model: DEFAULT_ASSISTANT_MODEL.to_string(),
            selectable_models: Vec::new(),
            max_turns: 10,
            tool_preset: defaults.tool_preset,
            permission_mode: defaults.permission_mode,
            include_partial_messages: true,
            working_directory: None,
        }
    }

    /// Built-in competitive research profile.
    pub fn research() -> Self {
        Self {
            name: "research",
            system_prompt: RESEARCH_SYSTEM_PROMPT.to_string(),
            default_model: DEFAULT_RESEARCH_MODEL.to_string(),
            selectable_models: vec![
                DEFAULT_RESEARCH_MODEL.to_string(),
                DEFAULT_ASSISTANT_MODEL.to_string(),
            ],
            max_turns: 25,
            ..Self::assistant()
        }
    }

    /// Assistant profile with config overrides applied.
    pub fn assistant_from(config: &Config) -> Self {
        Self::assistant().with_overrides(config.assistant_profile())
    }

    /// Research profile with config overrides applied.
    pub fn research_from(config: &Config) -> Self {
        Self::research().with_overrides(config.research_profile())
    }

    fn with_overrides(mut self, overrides: Option<&ProfileConfig>) -> Self {
        let Some(o) = overrides else {
            return self;
        };
        if let Some(prompt) = &o.system_prompt {
            self.system_prompt = prompt.clone();
        }
        if let Some(model) = &o.model {
            self.default_model = model.clone();
        }
        if let Some(models) = &o.selectable_models {
            self.selectable_models = models.clone();
        }
        if let Some(max_turns) = o.max_turns {
            self.max_turns = max_turns;
        }
        if let Some(preset) = &o.tool_preset {
            self.tool_preset = preset.clone();
        }
        if let Some(mode) = &o.permission_mode {
            self.permission_mode = mode.clone();
        }
        if let Some(partial) = o.include_partial_messages {
            self.include_partial_messages = partial;
        }
        if let Some(dir) = &o.working_directory {
            self.working_directory = Some(expand_path(dir));
        }
        self
    }

    /// Pick the model for a request. An override is honored only when it is
    /// one of the selectable models.
    pub fn resolve_model(&self, requested: Option<&str>, request_id: &str) -> &str {
        match requested {
            None => &self.default_model,
            Some(model) if model == self.default_model => &self.default_model,
            Some(model) => match self.selectable_models.iter().find(|m| *m == model) {
                Some(allowed) => allowed,
                None => {
                    warn!(
                        request_id,
                        endpoint = self.name,
                        requested = model,
                        "Ignoring model override not in selectable models"
                    );
                    &self.default_model
                }
            },
        }
    }

    pub fn query_options(&self, model: &str) -> QueryOptions {
        QueryOptions {
            model: model.to_string(),
            max_turns: self.max_turns,
            tool_preset: self.tool_preset.clone(),
            permission_mode: self.permission_mode.clone(),
            include_partial_messages: self.include_partial_messages,
            working_directory: self.working_directory.clone(),
        }
    }
}
