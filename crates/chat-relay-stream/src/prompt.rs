//! Prompt assembler: folds a conversation into one prompt string.

use chat_relay_core::error::ValidationError;
use chat_relay_core::types::{ConversationTurn, RelayRequest};

/// Default instruction for the general assistant endpoint.
pub const ASSISTANT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. \
Answer clearly and concisely. Use the available tools when they help you give \
an accurate, up-to-date answer.";

/// Default instruction for the competitive research endpoint.
pub const RESEARCH_SYSTEM_PROMPT: &str = "You are a competitive research analyst. \
Investigate companies, products, and markets using web search and fetch tools. \
Cite your sources, compare competitors on concrete dimensions, and finish with \
a short summary of key findings.";

/// Render one turn as `<Speaker>: <content>`.
pub fn render_turn(turn: &ConversationTurn) -> String {
    format!("{}: {}", turn.role.label(), turn.content)
}

/// Build the engine prompt: the system instruction, then the full history
/// transcript (if any), then the active query, separated by blank lines.
pub fn assemble_prompt(
    system_instruction: &str,
    request: &RelayRequest,
) -> Result<String, ValidationError> {
    let active = request.active_query()?;
    let history = request.history()?;

    let mut parts = vec![system_instruction.to_string()];

    if !history.is_empty() {
        let transcript: Vec<String> = history.iter().map(render_turn).collect();
        parts.push(transcript.join("\n\n"));
    }

    parts.push(render_turn(active));

    Ok(parts.join("\n\n"))
}
