//! Client-facing relay wire protocol.
//!
//! The response body is a line-oriented event stream. Every frame is one
//! `data: <json>` line followed by a blank line, and the stream always ends
//! with the non-JSON sentinel `data: [DONE]`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Payload of the final line of every relay stream.
pub const SENTINEL: &str = "[DONE]";

/// The only error text a client ever sees in an `error` frame.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred while processing your request.";

/// One discrete unit of the client-facing wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// A fragment of the in-progress assistant turn.
    TextDelta { text: String },

    /// A tool became active.
    ToolStart { tool: String },

    /// A tool is still running.
    ToolProgress { tool: String, elapsed: f64 },

    /// The assistant turn finished successfully.
    Done,

    /// The assistant turn failed.
    Error { message: String },
}

impl OutboundFrame {
    /// The generic error frame.
    pub fn error() -> Self {
        Self::Error {
            message: GENERIC_ERROR_MESSAGE.to_string(),
        }
    }

    /// Whether this frame ends the logical response.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }

    /// Encode as a complete `data:` frame including the trailing blank line.
    pub fn encode(&self) -> serde_json::Result<Bytes> {
        let json = serde_json::to_string(self)?;
        Ok(Bytes::from(format!("data: {json}\n\n")))
    }
}

/// The sentinel line that closes every stream.
pub fn encode_sentinel() -> Bytes {
    Bytes::from(format!("data: {SENTINEL}\n\n"))
}

/// An item recovered from the byte stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frame(OutboundFrame),
    Sentinel,
    /// A `data:` payload that is not a known frame.
    Unrecognized(String),
}

/// Incremental decoder for the relay wire format.
///
/// Bytes may arrive split at arbitrary positions, including inside a UTF-8
/// sequence; complete lines are only interpreted once their newline arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every item it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                if let Some(item) = self.dispatch() {
                    out.push(item);
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.trim_start().to_string());
            }
        }
        out
    }

    /// Flush a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<Decoded> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            if let Some(value) = line.trim_end_matches('\r').strip_prefix("data:") {
                self.data.push(value.trim_start().to_string());
            }
        }
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<Decoded> {
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();

        if data == SENTINEL {
            return Some(Decoded::Sentinel);
        }
        match serde_json::from_str::<OutboundFrame>(&data) {
            Ok(frame) => Some(Decoded::Frame(frame)),
            Err(e) => {
                trace!(%e, data, "Unrecognized relay frame");
                Some(Decoded::Unrecognized(data))
            }
        }
    }
}

/// How a consumed stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Done,
    Error(String),
}

/// The tool indicator shown while a tool runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolStatus {
    pub tool: String,
    pub elapsed: f64,
}

/// Client-side view of one relay stream: accumulated message text plus the
/// current tool indicator.
#[derive(Debug, Default)]
pub struct StreamConsumer {
    decoder: FrameDecoder,
    text: String,
    active_tool: Option<ToolStatus>,
    tools_started: Vec<String>,
    outcome: Option<StreamOutcome>,
    closed: bool,
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw body bytes; returns the frames applied, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<OutboundFrame> {
        let items = self.decoder.push(chunk);
        self.apply_all(items)
    }

    /// Signal end of body.
    pub fn finish(&mut self) -> Vec<OutboundFrame> {
        let items: Vec<Decoded> = self.decoder.finish().into_iter().collect();
        self.apply_all(items)
    }

    fn apply_all(&mut self, items: Vec<Decoded>) -> Vec<OutboundFrame> {
        let mut applied = Vec::new();
        for item in items {
            match item {
                Decoded::Frame(frame) => {
                    self.apply(&frame);
                    applied.push(frame);
                }
                Decoded::Sentinel => {
                    self.closed = true;
                    self.active_tool = None;
                }
                Decoded::Unrecognized(_) => {}
            }
        }
        applied
    }

    fn apply(&mut self, frame: &OutboundFrame) {
        match frame {
            OutboundFrame::TextDelta { text } => {
                self.text.push_str(text);
                self.active_tool = None;
            }
            OutboundFrame::ToolStart { tool } => {
                self.tools_started.push(tool.clone());
                self.active_tool = Some(ToolStatus {
                    tool: tool.clone(),
                    elapsed: 0.0,
                });
            }
            OutboundFrame::ToolProgress { tool, elapsed } => {
                self.active_tool = Some(ToolStatus {
                    tool: tool.clone(),
                    elapsed: *elapsed,
                });
            }
            OutboundFrame::Done => {
                self.outcome = Some(StreamOutcome::Done);
                self.active_tool = None;
            }
            OutboundFrame::Error { message } => {
                self.outcome = Some(StreamOutcome::Error(message.clone()));
                self.active_tool = None;
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn active_tool(&self) -> Option<&ToolStatus> {
        self.active_tool.as_ref()
    }

    pub fn tools_started(&self) -> &[String] {
        &self.tools_started
    }

    pub fn outcome(&self) -> Option<&StreamOutcome> {
        self.outcome.as_ref()
    }

    /// Whether the sentinel has been received.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_json_shapes() {
        let cases = [
            (
                OutboundFrame::TextDelta { text: "hi".into() },
                r#"{"type":"text_delta","text":"hi"}"#,
            ),
            (
                OutboundFrame::ToolStart {
                    tool: "WebSearch".into(),
                },
                r#"{"type":"tool_start","tool":"WebSearch"}"#,
            ),
            (
                OutboundFrame::ToolProgress {
                    tool: "WebSearch".into(),
                    elapsed: 2.5,
                },
                r#"{"type":"tool_progress","tool":"WebSearch","elapsed":2.5}"#,
            ),
            (OutboundFrame::Done, r#"{"type":"done"}"#),
        ];
        for (frame, expected) in cases {
            assert_eq!(serde_json::to_string(&frame).unwrap(), expected);
        }
    }

    #[test]
    fn test_encode_is_data_line_plus_blank_line() {
        let bytes = OutboundFrame::Done.encode().unwrap();
        assert_eq!(&bytes[..], b"data: {\"type\":\"done\"}\n\n");
        assert_eq!(&encode_sentinel()[..], b"data: [DONE]\n\n");
    }

    #[test]
    fn test_error_frame_uses_generic_message() {
        let frame = OutboundFrame::error();
        assert!(frame.is_terminal());
        assert_eq!(
            frame,
            OutboundFrame::Error {
                message: GENERIC_ERROR_MESSAGE.into()
            }
        );
        assert!(!OutboundFrame::ToolStart { tool: "x".into() }.is_terminal());
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&OutboundFrame::TextDelta { text: "héllo".into() }.encode().unwrap());
        wire.extend_from_slice(&OutboundFrame::Done.encode().unwrap());
        wire.extend_from_slice(&encode_sentinel());

        let mut decoder = FrameDecoder::new();
        let mut items = Vec::new();
        // One byte at a time splits the UTF-8 sequence too.
        for b in &wire {
            items.extend(decoder.push(std::slice::from_ref(b)));
        }
        assert_eq!(
            items,
            vec![
                Decoded::Frame(OutboundFrame::TextDelta { text: "héllo".into() }),
                Decoded::Frame(OutboundFrame::Done),
                Decoded::Sentinel,
            ]
        );
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_decoder_tolerates_unknown_payloads() {
        let mut decoder = FrameDecoder::new();
        let items = decoder.push(b": comment\ndata: {\"type\":\"future\"}\n\n");
        assert_eq!(
            items,
            vec![Decoded::Unrecognized(r#"{"type":"future"}"#.into())]
        );
    }

    #[test]
    fn test_consumer_tracks_text_and_tool_status() {
        let mut consumer = StreamConsumer::new();
        let mut wire = Vec::new();
        for frame in [
            OutboundFrame::ToolStart {
                tool: "WebSearch".into(),
            },
            OutboundFrame::ToolProgress {
                tool: "WebSearch".into(),
                elapsed: 1.0,
            },
        ] {
            wire.extend_from_slice(&frame.encode().unwrap());
        }
        consumer.feed(&wire);
        assert_eq!(
            consumer.active_tool(),
            Some(&ToolStatus {
                tool: "WebSearch".into(),
                elapsed: 1.0
            })
        );

        consumer.feed(&OutboundFrame::TextDelta { text: "Hello ".into() }.encode().unwrap());
        consumer.feed(&OutboundFrame::TextDelta { text: "world".into() }.encode().unwrap());
        assert!(consumer.active_tool().is_none());

        consumer.feed(&OutboundFrame::Done.encode().unwrap());
        assert!(!consumer.is_closed());
        consumer.feed(&encode_sentinel());

        assert_eq!(consumer.text(), "Hello world");
        assert_eq!(consumer.tools_started(), ["WebSearch".to_string()]);
        assert_eq!(consumer.outcome(), Some(&StreamOutcome::Done));
        assert!(consumer.is_closed());
    }

    #[test]
    fn test_consumer_records_error_outcome() {
        let mut consumer = StreamConsumer::new();
        consumer.feed(&OutboundFrame::error().encode().unwrap());
        consumer.feed(b"data: [DONE]");
        assert!(!consumer.is_closed());
        consumer.finish();
        assert!(consumer.is_closed());
        assert_eq!(
            consumer.outcome(),
            Some(&StreamOutcome::Error(GENERIC_ERROR_MESSAGE.into()))
        );
    }
}
