//! `chat-relay ask`: send one turn to a running gateway and render the stream.

use std::io::Write;

use futures::StreamExt;
use serde_json::{Value, json};

use chat_relay_core::protocol::{OutboundFrame, StreamConsumer, StreamOutcome};

/// Where a rendered frame goes.
#[derive(Debug, PartialEq)]
enum Rendered {
    Stdout(String),
    Stderr(String),
}

fn render(frame: &OutboundFrame) -> Rendered {
    match frame {
        OutboundFrame::TextDelta { text } => Rendered::Stdout(text.clone()),
        OutboundFrame::ToolStart { tool } => Rendered::Stderr(format!("\n[{tool}] started\n")),
        OutboundFrame::ToolProgress { tool, elapsed } => {
            Rendered::Stderr(format!("[{tool}] running {elapsed:.0}s\n"))
        }
        OutboundFrame::Done => Rendered::Stdout("\n".to_string()),
        OutboundFrame::Error { message } => Rendered::Stderr(format!("\nError: {message}\n")),
    }
}

fn request_body(message: &str, model: Option<&str>) -> Value {
    let mut body = json!({ "turns": [{ "role": "user", "content": message }] });
    if let Some(model) = model {
        body["modelOverride"] = json!(model);
    }
    body
}

fn emit(frame: &OutboundFrame) -> anyhow::Result<()> {
    match render(frame) {
        Rendered::Stdout(s) => {
            let mut out = std::io::stdout().lock();
            out.write_all(s.as_bytes())?;
            out.flush()?;
        }
        Rendered::Stderr(s) => eprint!("{s}"),
    }
    Ok(())
}

pub async fn run(base_url: &str, message: &str, research: bool, model: Option<&str>) -> anyhow::Result<()> {
    let path = if research { "/api/research" } else { "/api/chat" };
    let url = format!("{}{path}", base_url.trim_end_matches('/'));
    tracing::debug!(url = %url, "Sending request");

    let resp = reqwest::Client::new()
        .post(&url)
        .json(&request_body(message, model))
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or_default();
        let reason = body["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("Request failed ({status}): {reason}");
    }

    let mut consumer = StreamConsumer::new();
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        for frame in consumer.feed(&chunk?) {
            emit(&frame)?;
        }
    }
    for frame in consumer.finish() {
        emit(&frame)?;
    }

    if !consumer.is_closed() {
        tracing::warn!("Stream ended without the closing sentinel");
    }
    match consumer.outcome() {
        Some(StreamOutcome::Error(message)) => anyhow::bail!("{message}"),
        Some(StreamOutcome::Done) => Ok(()),
        None => anyhow::bail!("Stream ended without a result"),
    }
}
