//! Event translator: maps upstream events to outbound frames and records
//! per-request lifecycle telemetry.

use std::time::{Duration, Instant};

use serde_json::json;
use tracing::debug;

use chat_relay_core::protocol::OutboundFrame;
use chat_relay_engine::UpstreamEvent;

use crate::telemetry::{LogLevel, SharedTelemetry};

/// Failure subtype recorded when iterating the upstream sequence raised.
pub const STREAM_EXCEPTION: &str = "stream-exception";

pub const METRIC_TOOL_USAGE: &str = "relay_tool_usage_total";
pub const METRIC_TOOL_ELAPSED: &str = "relay_tool_elapsed_seconds";
pub const METRIC_QUERY_DURATION: &str = "relay_query_duration_seconds";
pub const METRIC_RESPONSE_CHUNKS: &str = "relay_response_chunks";
pub const METRIC_TOOLS_USED: &str = "relay_tools_used";
pub const METRIC_QUERY_ERRORS: &str = "relay_query_errors_total";

/// Per-request mutable state. Built fresh for every request and owned by one
/// translator.
#[derive(Debug)]
pub struct RelayState {
    tools_seen: Vec<String>,
    chunk_count: u64,
    started_at: Instant,
}

impl RelayState {
    pub fn new() -> Self {
        Self {
            tools_seen: Vec::new(),
            chunk_count: 0,
            started_at: Instant::now(),
        }
    }

    /// Record a tool name. Returns false if it was already seen.
    fn record_tool(&mut self, name: &str) -> bool {
        if self.tools_seen.iter().any(|t| t == name) {
            return false;
        }
        self.tools_seen.push(name.to_string());
        true
    }

    /// Distinct tools in order of first invocation.
    pub fn tools_seen(&self) -> &[String] {
        &self.tools_seen
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

/// How a relayed request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed,
    Failed { subtype: String },
    /// Upstream ended without reporting completion.
    Incomplete,
    /// The client went away first.
    Cancelled,
}

pub struct EventTranslator {
    endpoint: String,
    request_id: String,
    telemetry: SharedTelemetry,
    state: RelayState,
    outcome: Option<RelayOutcome>,
}

impl EventTranslator {
    pub fn new(
        endpoint: impl Into<String>,
        request_id: impl Into<String>,
        telemetry: SharedTelemetry,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_id: request_id.into(),
            telemetry,
            state: RelayState::new(),
            outcome: None,
        }
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Set once a terminal frame was produced or the request was abandoned.
    pub fn outcome(&self) -> Option<&RelayOutcome> {
        self.outcome.as_ref()
    }

    /// Map one upstream event to at most one frame.
    pub fn translate(&mut self, event: UpstreamEvent) -> Option<OutboundFrame> {
        if self.outcome.is_some() {
            debug!(kind = event.kind(), "Ignoring upstream event after completion");
            return None;
        }

        match event {
            UpstreamEvent::StreamDelta { text } => {
                self.state.chunk_count += 1;
                Some(OutboundFrame::TextDelta { text })
            }
            UpstreamEvent::ToolInvocation { name } => {
                if !self.state.record_tool(&name) {
                    return None;
                }
                self.telemetry
                    .increment(METRIC_TOOL_USAGE, 1, &self.tags(&[("tool", name.as_str())]));
                self.telemetry.log(
                    LogLevel::Info,
                    "Tool started",
                    &json!({
                        "request_id": self.request_id,
                        "endpoint": self.endpoint,
                        "tool": name,
                    }),
                );
                Some(OutboundFrame::ToolStart { tool: name })
            }
            UpstreamEvent::ToolProgress {
                tool,
                elapsed_seconds,
            } => {
                self.telemetry.gauge(
                    METRIC_TOOL_ELAPSED,
                    elapsed_seconds,
                    &self.tags(&[("tool", tool.as_str())]),
                );
                Some(OutboundFrame::ToolProgress {
                    tool,
                    elapsed: elapsed_seconds,
                })
            }
            UpstreamEvent::CompletionSuccess => {
                self.record_success();
                Some(OutboundFrame::Done)
            }
            UpstreamEvent::CompletionFailure { subtype } => {
                self.record_failure(&subtype, None);
                Some(OutboundFrame::error())
            }
            UpstreamEvent::Unrecognized { kind } => {
                debug!(kind, request_id = %self.request_id, "Ignoring unrecognized upstream event");
                None
            }
        }
    }

    /// Handle a failure of the upstream sequence itself.
    pub fn fail(&mut self, error: &anyhow::Error) -> Option<OutboundFrame> {
        if self.outcome.is_some() {
            return None;
        }
        self.record_failure(STREAM_EXCEPTION, Some(error));
        Some(OutboundFrame::error())
    }

    /// The upstream sequence ended without a completion event.
    pub fn finish_incomplete(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        self.record_duration("incomplete");
        self.telemetry.log(
            LogLevel::Warn,
            "Upstream ended without a result",
            &self.context(),
        );
        self.outcome = Some(RelayOutcome::Incomplete);
    }

    /// The client disconnected before completion.
    pub fn cancelled(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        self.record_duration("cancelled");
        self.telemetry
            .log(LogLevel::Info, "Client disconnected", &self.context());
        self.outcome = Some(RelayOutcome::Cancelled);
    }

    fn record_success(&mut self) {
        self.record_duration("success");
        let tags = self.tags(&[]);
        self.telemetry
            .gauge(METRIC_RESPONSE_CHUNKS, self.state.chunk_count as f64, &tags);
        self.telemetry
            .gauge(METRIC_TOOLS_USED, self.state.tools_seen.len() as f64, &tags);
        self.telemetry
            .log(LogLevel::Info, "Query completed", &self.context());
        self.outcome = Some(RelayOutcome::Completed);
    }

    fn record_failure(&mut self, subtype: &str, error: Option<&anyhow::Error>) {
        self.record_duration("error");
        self.telemetry.increment(
            METRIC_QUERY_ERRORS,
            1,
            &self.tags(&[("subtype", subtype)]),
        );

        let mut context = self.context();
        context["subtype"] = json!(subtype);
        if let Some(error) = error {
            context["error"] = json!(format!("{error:#}"));
        }
        self.telemetry
            .log(LogLevel::Error, "Query failed", &context);
        self.outcome = Some(RelayOutcome::Failed {
            subtype: subtype.to_string(),
        });
    }

    fn record_duration(&self, status: &str) {
        self.telemetry.timing(
            METRIC_QUERY_DURATION,
            self.state.elapsed().as_secs_f64(),
            &self.tags(&[("status", status)]),
        );
    }

    fn tags(&self, extra: &[(&'static str, &str)]) -> Vec<(&'static str, String)> {
        let mut tags = vec![("endpoint", self.endpoint.clone())];
        tags.extend(extra.iter().map(|(k, v)| (*k, v.to_string())));
        tags
    }

    fn context(&self) -> serde_json::Value {
        json!({
            "request_id": self.request_id,
            "endpoint": self.endpoint,
            "chunk_count": self.state.chunk_count,
            "tools": self.state.tools_seen,
            "duration_ms": self.state.elapsed().as_millis() as u64,
        })
    }
}
