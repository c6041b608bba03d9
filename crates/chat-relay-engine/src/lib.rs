//! Upstream agent engine abstraction.
//!
//! An engine executes one prompt, optionally invoking tools, and produces an
//! ordered stream of [`UpstreamEvent`]s. Each implementation decodes its own
//! wire format into that closed event type so the relay never inspects raw
//! engine messages.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use chat_relay_core::config::{Config, EngineKind};

pub mod echo;
pub mod event;
pub mod http;
pub mod scripted;
pub mod sse;

pub use echo::EchoEngine;
pub use event::UpstreamEvent;
pub use http::HttpEngine;
pub use scripted::{ScriptStep, ScriptedEngine};

/// Ordered, fallible sequence of upstream events for one query.
pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<UpstreamEvent>> + Send>>;

/// Options recognized by every engine for a single query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub model: String,
    /// Upper bound on agent turns; the only limit on a run's length.
    pub max_turns: u32,
    pub tool_preset: String,
    pub permission_mode: String,
    /// Emit partial text deltas instead of whole messages.
    pub include_partial_messages: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".into(),
            max_turns: 10,
            tool_preset: "claude_code".into(),
            permission_mode: "bypassPermissions".into(),
            include_partial_messages: true,
            working_directory: None,
        }
    }
}

/// The upstream agent engine trait.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Engine identifier (e.g., "http", "echo").
    fn id(&self) -> &str;

    /// Start a query. Errors returned here, and errors yielded by the
    /// stream, are both upstream failures from the relay's point of view.
    async fn query(&self, prompt: &str, options: &QueryOptions) -> anyhow::Result<EventStream>;
}

/// Build the engine selected by the config.
pub fn build_engine(config: &Config) -> anyhow::Result<Arc<dyn AgentEngine>> {
    match config.engine_kind() {
        EngineKind::Echo => {
            let delay = config
                .engine
                .as_ref()
                .and_then(|e| e.echo_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or_default();
            Ok(Arc::new(EchoEngine::new().with_delay(delay)))
        }
        EngineKind::Http => {
            let engine_config = config
                .engine
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("engine section is required for the http engine"))?;
            Ok(Arc::new(HttpEngine::from_config(engine_config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_relay_core::config::EngineConfig;

    #[test]
    fn test_build_default_engine_is_echo() {
        let engine = build_engine(&Config::default()).unwrap();
        assert_eq!(engine.id(), "echo");
    }

    #[test]
    fn test_build_http_engine_requires_url() {
        let config = Config {
            engine: Some(EngineConfig {
                kind: EngineKind::Http,
                ..EngineConfig::default()
            }),
            ..Config::default()
        };
        assert!(build_engine(&config).is_err());
    }

    #[test]
    fn test_build_http_engine() {
        let config = Config {
            engine: Some(EngineConfig {
                kind: EngineKind::Http,
                base_url: Some("http://127.0.0.1:9/".into()),
                ..EngineConfig::default()
            }),
            ..Config::default()
        };
        let engine = build_engine(&config).unwrap();
        assert_eq!(engine.id(), "http");
    }

    #[tokio::test]
    async fn test_build_echo_engine_with_delay() {
        use tokio_stream::StreamExt;

        let config = Config {
            engine: Some(EngineConfig {
                echo_delay_ms: Some(20),
                ..EngineConfig::default()
            }),
            ..Config::default()
        };
        let engine = build_engine(&config).unwrap();
        assert_eq!(engine.id(), "echo");

        let started = std::time::Instant::now();
        let events: Vec<_> = engine
            .query("User: one two", &QueryOptions::default())
            .await
            .unwrap()
            .collect()
            .await;
        // Two words plus the success event, each delayed.
        assert_eq!(events.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
