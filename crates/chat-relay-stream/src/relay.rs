//! Relay driver: runs one upstream query and streams translated frames to a
//! writer. One relay per request; it owns its translator and writer.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio_stream::StreamExt;
use tracing::debug;

use chat_relay_engine::{AgentEngine, QueryOptions};

use crate::telemetry::SharedTelemetry;
use crate::translator::{EventTranslator, RelayOutcome};
use crate::writer::FrameWriter;

pub struct Relay {
    request_id: String,
    translator: EventTranslator,
}

impl Relay {
    pub fn new(
        endpoint: impl Into<String>,
        request_id: impl Into<String>,
        telemetry: SharedTelemetry,
    ) -> Self {
        let request_id = request_id.into();
        Self {
            translator: EventTranslator::new(endpoint, request_id.clone(), telemetry),
            request_id,
        }
    }

    /// Drive the query to completion. The writer is always closed, so the
    /// sentinel is the last thing the client receives on every path.
    pub async fn run(
        mut self,
        engine: &dyn AgentEngine,
        prompt: &str,
        options: &QueryOptions,
        mut writer: FrameWriter,
    ) -> RelayOutcome {
        debug!(
            request_id = %self.request_id,
            engine = engine.id(),
            model = %options.model,
            "Starting relay"
        );

        let query = AssertUnwindSafe(engine.query(prompt, options)).catch_unwind();
        let queried = tokio::select! {
            biased;
            _ = writer.closed() => {
                self.translator.cancelled();
                writer.close();
                return self.outcome();
            }
            result = query => result.unwrap_or_else(|panic| Err(panic_error(panic))),
        };

        let mut upstream = match queried {
            Ok(stream) => stream,
            Err(e) => {
                if let Some(frame) = self.translator.fail(&e) {
                    writer.write(&frame);
                }
                writer.close();
                return self.outcome();
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = writer.closed() => {
                    self.translator.cancelled();
                    break;
                }
                item = AssertUnwindSafe(upstream.next()).catch_unwind() => {
                    item.unwrap_or_else(|panic| Some(Err(panic_error(panic))))
                }
            };

            match next {
                Some(Ok(event)) => {
                    let Some(frame) = self.translator.translate(event) else {
                        continue;
                    };
                    if !writer.write(&frame) {
                        self.translator.cancelled();
                        break;
                    }
                    if frame.is_terminal() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    if let Some(frame) = self.translator.fail(&e) {
                        writer.write(&frame);
                    }
                    break;
                }
                None => {
                    self.translator.finish_incomplete();
                    break;
                }
            }
        }

        // Dropping the upstream stream cancels the engine query.
        drop(upstream);
        writer.close();
        self.outcome()
    }

    fn outcome(&self) -> RelayOutcome {
        self.translator
            .outcome()
            .cloned()
            .unwrap_or(RelayOutcome::Incomplete)
    }
}

/// Turn a caught panic from the engine into an upstream failure.
fn panic_error(panic: Box<dyn Any + Send>) -> anyhow::Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    anyhow::anyhow!("upstream panicked: {message}")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::telemetry::{LogLevel, RecordingTelemetry};
    use crate::translator::{METRIC_QUERY_DURATION, METRIC_QUERY_ERRORS, STREAM_EXCEPTION};
    use bytes::Bytes;
    use chat_relay_core::protocol::{Decoded, FrameDecoder, OutboundFrame};
    use async_trait::async_trait;
    use chat_relay_engine::{EventStream, ScriptStep, ScriptedEngine, UpstreamEvent};
    use std::task::Poll;
    use std::time::Duration;

    /// Engine that panics, either while starting the query or while its
    /// stream is polled after one delta.
    struct PanickingEngine {
        in_query: bool,
    }

    #[async_trait]
    impl AgentEngine for PanickingEngine {
        fn id(&self) -> &str {
            "panicking"
        }

        async fn query(&self, _prompt: &str, _options: &QueryOptions) -> anyhow::Result<EventStream> {
            if self.in_query {
                panic!("engine bug in query");
            }
            let head = futures::stream::iter(vec![Ok::<_, anyhow::Error>(
                UpstreamEvent::StreamDelta {
                    text: "partial".into(),
                },
            )]);
            let tail = futures::stream::poll_fn(
                |_| -> Poll<Option<anyhow::Result<UpstreamEvent>>> { panic!("engine bug") },
            );
            Ok(Box::pin(head.chain(tail)))
        }
    }

    /// Engine whose query never returns.
    struct StallingEngine;

    #[async_trait]
    impl AgentEngine for StallingEngine {
        fn id(&self) -> &str {
            "stalling"
        }

        async fn query(&self, _prompt: &str, _options: &QueryOptions) -> anyhow::Result<EventStream> {
            std::future::pending().await
        }
    }

    fn delta(text: &str) -> ScriptStep {
        UpstreamEvent::StreamDelta { text: text.into() }.into()
    }

    fn tool(name: &str) -> ScriptStep {
        UpstreamEvent::ToolInvocation { name: name.into() }.into()
    }

    fn success() -> ScriptStep {
        UpstreamEvent::CompletionSuccess.into()
    }

    async fn run(engine: &dyn AgentEngine) -> (Vec<Decoded>, RelayOutcome, Arc<RecordingTelemetry>) {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let relay = Relay::new("assistant", "req-1", telemetry.clone());
        let (writer, stream) = FrameWriter::channel();

        let outcome = relay
            .run(engine, "prompt", &QueryOptions::default(), writer)
            .await;

        let chunks: Vec<Bytes> = stream.map(|b| b.unwrap()).collect().await;
        let mut decoder = FrameDecoder::new();
        let mut items: Vec<Decoded> = chunks.iter().flat_map(|c| decoder.push(c)).collect();
        items.extend(decoder.finish());
        (items, outcome, telemetry)
    }

    fn frames(items: &[Decoded]) -> Vec<OutboundFrame> {
        items
            .iter()
            .filter_map(|d| match d {
                Decoded::Frame(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    fn assert_single_trailing_sentinel(items: &[Decoded]) {
        let count = items.iter().filter(|d| **d == Decoded::Sentinel).count();
        assert_eq!(count, 1, "expected one sentinel in {items:?}");
        assert_eq!(items.last(), Some(&Decoded::Sentinel));
    }

    fn count(frames: &[OutboundFrame], pred: impl Fn(&OutboundFrame) -> bool) -> usize {
        frames.iter().filter(|f| pred(f)).count()
    }

    #[tokio::test]
    async fn test_success_path() {
        let engine = ScriptedEngine::new([delta("Hel"), tool("WebSearch"), delta("lo"), success()]);
        let (items, outcome, _) = run(&engine).await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_single_trailing_sentinel(&items);
        let frames = frames(&items);
        assert_eq!(count(&frames, |f| *f == OutboundFrame::Done), 1);
        assert_eq!(count(&frames, |f| matches!(f, OutboundFrame::Error { .. })), 0);
        assert_eq!(frames.last(), Some(&OutboundFrame::Done));
    }

    #[tokio::test]
    async fn test_upstream_raise_before_completion() {
        let engine = ScriptedEngine::new([
            delta("partial"),
            ScriptStep::Fail("socket closed".into()),
            success(),
        ]);
        let (items, outcome, telemetry) = run(&engine).await;

        assert_eq!(
            outcome,
            RelayOutcome::Failed {
                subtype: STREAM_EXCEPTION.into()
            }
        );
        assert_single_trailing_sentinel(&items);
        let frames = frames(&items);
        assert_eq!(count(&frames, |f| matches!(f, OutboundFrame::Error { .. })), 1);
        assert_eq!(count(&frames, |f| *f == OutboundFrame::Done), 0);
        assert_eq!(frames.last(), Some(&OutboundFrame::error()));
        assert_eq!(telemetry.counter_total(METRIC_QUERY_ERRORS), 1);
    }

    #[tokio::test]
    async fn test_query_setup_failure_streams_error() {
        let engine = ScriptedEngine::rejecting("engine unavailable");
        let (items, outcome, telemetry) = run(&engine).await;

        assert!(matches!(outcome, RelayOutcome::Failed { .. }));
        assert_eq!(frames(&items), vec![OutboundFrame::error()]);
        assert_single_trailing_sentinel(&items);
        let errors = telemetry.logs(LogLevel::Error);
        assert!(
            errors[0].1["error"]
                .as_str()
                .unwrap()
                .contains("engine unavailable")
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_result() {
        let engine = ScriptedEngine::new([
            delta("x"),
            UpstreamEvent::CompletionFailure {
                subtype: "error_during_execution".into(),
            }
            .into(),
        ]);
        let (items, outcome, _) = run(&engine).await;

        assert_eq!(
            outcome,
            RelayOutcome::Failed {
                subtype: "error_during_execution".into()
            }
        );
        let frames = frames(&items);
        assert_eq!(
            frames,
            vec![
                OutboundFrame::TextDelta { text: "x".into() },
                OutboundFrame::error()
            ]
        );
        assert_single_trailing_sentinel(&items);
    }

    #[tokio::test]
    async fn test_tool_start_deduplicated() {
        let engine = ScriptedEngine::new([
            tool("WebSearch"),
            tool("WebSearch"),
            tool("WebSearch"),
            success(),
        ]);
        let (items, _, _) = run(&engine).await;
        let frames = frames(&items);
        assert_eq!(
            count(&frames, |f| matches!(f, OutboundFrame::ToolStart { .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_text_order_reconstructs_output() {
        let words = ["The ", "quick ", "brown ", "fox"];
        let mut steps: Vec<ScriptStep> = Vec::new();
        for (i, w) in words.iter().enumerate() {
            steps.push(delta(w));
            if i == 1 {
                steps.push(
                    UpstreamEvent::ToolProgress {
                        tool: "WebFetch".into(),
                        elapsed_seconds: 1.5,
                    }
                    .into(),
                );
            }
        }
        steps.push(success());
        let engine = ScriptedEngine::new(steps);
        let (items, _, _) = run(&engine).await;

        let text: String = frames(&items)
            .into_iter()
            .filter_map(|f| match f {
                OutboundFrame::TextDelta { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(text, "The quick brown fox");
    }

    #[tokio::test]
    async fn test_incomplete_upstream_still_terminates() {
        let engine = ScriptedEngine::new([delta("no result")]);
        let (items, outcome, telemetry) = run(&engine).await;

        assert_eq!(outcome, RelayOutcome::Incomplete);
        assert_eq!(
            frames(&items),
            vec![OutboundFrame::TextDelta {
                text: "no result".into()
            }]
        );
        assert_single_trailing_sentinel(&items);
        assert_eq!(
            telemetry.named(METRIC_QUERY_DURATION)[0].tag("status"),
            Some("incomplete")
        );
    }

    #[tokio::test]
    async fn test_events_after_completion_not_forwarded() {
        let engine = ScriptedEngine::new([success(), delta("late"), success()]);
        let (items, _, _) = run(&engine).await;
        assert_eq!(frames(&items), vec![OutboundFrame::Done]);
        assert_single_trailing_sentinel(&items);
    }

    #[tokio::test]
    async fn test_client_disconnect_cancels() {
        let engine = ScriptedEngine::new([delta("a"), success()]);
        let telemetry = Arc::new(RecordingTelemetry::new());
        let relay = Relay::new("research", "req-2", telemetry.clone());
        let (writer, stream) = FrameWriter::channel();
        drop(stream);

        let outcome = relay
            .run(&engine, "prompt", &QueryOptions::default(), writer)
            .await;
        assert_eq!(outcome, RelayOutcome::Cancelled);
        let timing = &telemetry.named(METRIC_QUERY_DURATION)[0];
        assert_eq!(timing.tag("status"), Some("cancelled"));
        assert_eq!(timing.tag("endpoint"), Some("research"));
    }

    #[tokio::test]
    async fn test_prompt_and_options_reach_engine() {
        let engine = ScriptedEngine::new([success()]);
        let telemetry = Arc::new(RecordingTelemetry::new());
        let options = QueryOptions {
            model: "claude-opus-4-1".into(),
            max_turns: 25,
            ..QueryOptions::default()
        };
        let (writer, _stream) = FrameWriter::channel();
        Relay::new("research", "req-3", telemetry)
            .run(&engine, "SYS\n\nUser: hi", &options, writer)
            .await;

        let queries = engine.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].0, "SYS\n\nUser: hi");
        assert_eq!(queries[0].1, options);
    }

    #[tokio::test]
    async fn test_panicking_stream_yields_error_frame() {
        let engine = PanickingEngine { in_query: false };
        let (items, outcome, telemetry) = run(&engine).await;

        assert_eq!(
            outcome,
            RelayOutcome::Failed {
                subtype: STREAM_EXCEPTION.into()
            }
        );
        assert_eq!(
            frames(&items),
            vec![
                OutboundFrame::TextDelta {
                    text: "partial".into()
                },
                OutboundFrame::error()
            ]
        );
        assert_single_trailing_sentinel(&items);
        assert_eq!(telemetry.counter_total(METRIC_QUERY_ERRORS), 1);

        let errors = telemetry.logs(LogLevel::Error);
        assert_eq!(errors.len(), 1);
        let context = &errors[0].1;
        assert_eq!(context["subtype"], STREAM_EXCEPTION);
        assert_eq!(context["chunk_count"], 1);
        assert!(context["error"].as_str().unwrap().contains("engine bug"));
    }

    #[tokio::test]
    async fn test_panicking_query_yields_error_frame() {
        let engine = PanickingEngine { in_query: true };
        let (items, outcome, telemetry) = run(&engine).await;

        assert!(matches!(outcome, RelayOutcome::Failed { .. }));
        assert_eq!(frames(&items), vec![OutboundFrame::error()]);
        assert_single_trailing_sentinel(&items);
        assert_eq!(telemetry.logs(LogLevel::Error).len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_while_query_pending() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let relay = Relay::new("assistant", "req-4", telemetry.clone());
        let (writer, stream) = FrameWriter::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(stream);
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            relay.run(&StallingEngine, "prompt", &QueryOptions::default(), writer),
        )
        .await
        .expect("relay did not notice the disconnect");

        assert_eq!(outcome, RelayOutcome::Cancelled);
        assert_eq!(
            telemetry.named(METRIC_QUERY_DURATION)[0].tag("status"),
            Some("cancelled")
        );
    }
}
