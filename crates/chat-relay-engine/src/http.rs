//! HTTP agent engine client.
//!
//! Posts the prompt to `<base_url>/v1/query` and reads the engine's messages
//! back as a `text/event-stream`, one JSON message per `data:` field.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use chat_relay_core::config::EngineConfig;

use crate::event::UpstreamEvent;
use crate::sse::{SseEvent, parse_sse_response};
use crate::{AgentEngine, EventStream, QueryOptions};

pub struct HttpEngine {
    pub base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpEngine {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow::anyhow!("engine.base_url is required for the http engine"))?;
        Ok(Self::new(base_url, config.resolve_api_key()))
    }
}

// --- Engine request types ---

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    options: QueryRequestOptions<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequestOptions<'a> {
    max_turns: u32,
    tool_preset: &'a str,
    permission_mode: &'a str,
    include_partial_messages: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<String>,
}

impl<'a> QueryRequest<'a> {
    fn new(prompt: &'a str, options: &'a QueryOptions) -> Self {
        Self {
            prompt,
            model: &options.model,
            options: QueryRequestOptions {
                max_turns: options.max_turns,
                tool_preset: &options.tool_preset,
                permission_mode: &options.permission_mode,
                include_partial_messages: options.include_partial_messages,
                cwd: options
                    .working_directory
                    .as_ref()
                    .map(|p| p.display().to_string()),
            },
        }
    }
}

#[async_trait]
impl AgentEngine for HttpEngine {
    fn id(&self) -> &str {
        "http"
    }

    async fn query(&self, prompt: &str, options: &QueryOptions) -> anyhow::Result<EventStream> {
        let body = QueryRequest::new(prompt, options);

        debug!(model = %options.model, base_url = %self.base_url, "Querying agent engine");

        let mut req_builder = self
            .client
            .post(format!("{}/v1/query", self.base_url))
            .header("accept", "text/event-stream")
            .json(&body);
        if let Some(key) = &self.api_key {
            req_builder = req_builder.bearer_auth(key);
        }

        let response = req_builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Agent engine error {status}: {body}");
        }

        Ok(Box::pin(decode_sse_events(parse_sse_response(response))))
    }
}

/// Flatten SSE payloads into upstream events. `[DONE]` ends the stream.
pub fn decode_sse_events<S>(sse: S) -> impl Stream<Item = anyhow::Result<UpstreamEvent>> + Send
where
    S: Stream<Item = anyhow::Result<SseEvent>> + Send + 'static,
{
    futures::stream::unfold(
        DecodeState {
            sse: Box::pin(sse),
            pending: VecDeque::new(),
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((Ok(event), state));
                }
                if state.finished {
                    return None;
                }
                match state.sse.next().await {
                    Some(Ok(sse_event)) => {
                        let data = sse_event.data.trim();
                        if data == "[DONE]" {
                            state.finished = true;
                            continue;
                        }
                        trace!(data, "Engine message");
                        state.pending.extend(UpstreamEvent::decode_str(data));
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                    None => return None,
                }
            }
        },
    )
}

struct DecodeState {
    sse: Pin<Box<dyn Stream<Item = anyhow::Result<SseEvent>> + Send>>,
    pending: VecDeque<UpstreamEvent>,
    finished: bool,
}
