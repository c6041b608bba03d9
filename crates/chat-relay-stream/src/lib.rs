//! Streaming relay layer.
//!
//! Assembles the engine prompt from a conversation, runs one upstream query
//! per request, translates the engine's events into client-facing frames, and
//! writes them to the response body. Every stream ends with exactly one
//! sentinel, on success and failure alike.

pub mod prompt;
pub mod relay;
pub mod telemetry;
pub mod translator;
pub mod writer;

pub use prompt::{ASSISTANT_SYSTEM_PROMPT, RESEARCH_SYSTEM_PROMPT, assemble_prompt};
pub use relay::Relay;
pub use telemetry::{
    LogLevel, MetricsTelemetry, NoopTelemetry, RecordingTelemetry, SharedTelemetry, Telemetry,
};
pub use translator::{EventTranslator, RelayOutcome, RelayState};
pub use writer::{FrameStream, FrameWriter};
