//! Closed upstream event type and the decoder that narrows raw engine
//! messages into it.

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

/// The subset of engine output the relay understands.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// A text fragment of the in-progress assistant turn.
    StreamDelta { text: String },

    /// The engine invoked a tool. May repeat for the same tool.
    ToolInvocation { name: String },

    /// A tool is still running after `elapsed_seconds`.
    ToolProgress { tool: String, elapsed_seconds: f64 },

    CompletionSuccess,

    CompletionFailure { subtype: String },

    /// Anything else. Carries the message type for diagnostics.
    Unrecognized { kind: String },
}

impl UpstreamEvent {
    /// Short label for logs.
    pub fn kind(&self) -> &str {
        match self {
            Self::StreamDelta { .. } => "stream_delta",
            Self::ToolInvocation { .. } => "tool_invocation",
            Self::ToolProgress { .. } => "tool_progress",
            Self::CompletionSuccess => "completion_success",
            Self::CompletionFailure { .. } => "completion_failure",
            Self::Unrecognized { kind } => kind,
        }
    }

    /// Decode one raw engine message. A message may carry several tool
    /// invocations, so the result is a list; it is never empty.
    pub fn decode(message: &Value) -> Vec<UpstreamEvent> {
        let kind = message
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let parsed = match EngineMessage::deserialize(message) {
            Ok(m) => m,
            Err(e) => {
                trace!(%e, kind, "Malformed engine message");
                return vec![Self::Unrecognized { kind }];
            }
        };

        let events = match parsed {
            EngineMessage::StreamEvent { event } => match event.delta {
                Some(Delta {
                    kind: ref delta_kind,
                    text: Some(text),
                }) if event.kind == "content_block_delta" && delta_kind == "text_delta" => {
                    vec![Self::StreamDelta { text }]
                }
                _ => vec![],
            },
            EngineMessage::Assistant { message } => message
                .content
                .into_iter()
                .filter(|block| block.kind == "tool_use")
                .filter_map(|block| block.name)
                .map(|name| Self::ToolInvocation { name })
                .collect(),
            EngineMessage::ToolProgress {
                tool_name,
                elapsed_time_seconds,
            } => vec![Self::ToolProgress {
                tool: tool_name,
                elapsed_seconds: elapsed_time_seconds,
            }],
            EngineMessage::Result { subtype } if subtype == "success" => {
                vec![Self::CompletionSuccess]
            }
            EngineMessage::Result { subtype } => vec![Self::CompletionFailure { subtype }],
            EngineMessage::Other => vec![],
        };

        if events.is_empty() {
            vec![Self::Unrecognized { kind }]
        } else {
            events
        }
    }

    /// Decode a raw JSON payload, e.g. one SSE `data:` field.
    pub fn decode_str(data: &str) -> Vec<UpstreamEvent> {
        match serde_json::from_str::<Value>(data) {
            Ok(value) => Self::decode(&value),
            Err(e) => {
                trace!(%e, data, "Engine payload is not JSON");
                vec![Self::Unrecognized {
                    kind: "malformed".into(),
                }]
            }
        }
    }
}

// --- Engine wire types ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EngineMessage {
    StreamEvent {
        event: StreamEventBody,
    },
    Assistant {
        message: AssistantMessage,
    },
    ToolProgress {
        tool_name: String,
        elapsed_time_seconds: f64,
    },
    Result {
        subtype: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamEventBody {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
}
