use thiserror::Error;

/// A request body that is malformed or incomplete. Surfaced to the client as
/// HTTP 400 with the display text as the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Messages array is required")]
    MissingTurns,

    #[error("No user message found")]
    MissingUserTurn,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(String),

    /// The request passed validation but the relay could not be set up for it.
    #[error("Setup error: {0:#}")]
    Setup(anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
