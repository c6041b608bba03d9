//! Scripted engine: replays a fixed sequence of events.
//!
//! Used by tests to drive the relay deterministically, including mid-stream
//! failures, and to inspect the prompts the relay sent.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::event::UpstreamEvent;
use crate::{AgentEngine, EventStream, QueryOptions};

/// One step of a script.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Event(UpstreamEvent),
    /// The stream yields an error with this message.
    Fail(String),
}

impl From<UpstreamEvent> for ScriptStep {
    fn from(event: UpstreamEvent) -> Self {
        Self::Event(event)
    }
}

#[derive(Debug, Default)]
pub struct ScriptedEngine {
    steps: Vec<ScriptStep>,
    query_error: Option<String>,
    queries: Mutex<Vec<(String, QueryOptions)>>,
}

impl ScriptedEngine {
    pub fn new(steps: impl IntoIterator<Item = impl Into<ScriptStep>>) -> Self {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// An engine whose `query` call itself fails.
    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            query_error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Every `(prompt, options)` pair received so far.
    pub fn queries(&self) -> Vec<(String, QueryOptions)> {
        self.queries
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AgentEngine for ScriptedEngine {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn query(&self, prompt: &str, options: &QueryOptions) -> anyhow::Result<EventStream> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push((prompt.to_string(), options.clone()));
        }
        if let Some(message) = &self.query_error {
            anyhow::bail!("{message}");
        }

        let items: Vec<anyhow::Result<UpstreamEvent>> = self
            .steps
            .iter()
            .cloned()
            .map(|step| match step {
                ScriptStep::Event(event) => Ok(event),
                ScriptStep::Fail(message) => Err(anyhow::anyhow!(message)),
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}
