use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Speaker label used when rendering a transcript.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of a relay endpoint request. Owned by one HTTP request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    pub turns: Vec<ConversationTurn>,
    #[serde(
        rename = "modelOverride",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub model_override: Option<String>,
}

impl RelayRequest {
    /// Index of the last user turn, if any.
    fn active_index(&self) -> Option<usize> {
        self.turns.iter().rposition(|t| t.role == Role::User)
    }

    /// The last user turn: the query this request asks the engine to answer.
    pub fn active_query(&self) -> Result<&ConversationTurn, ValidationError> {
        self.active_index()
            .map(|i| &self.turns[i])
            .ok_or(ValidationError::MissingUserTurn)
    }

    /// All turns strictly before the active query, in chronological order.
    pub fn history(&self) -> Result<&[ConversationTurn], ValidationError> {
        self.active_index()
            .map(|i| &self.turns[..i])
            .ok_or(ValidationError::MissingUserTurn)
    }
}
