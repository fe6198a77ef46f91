//! Top-level error types for the relay.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Assistant(#[from] AssistantError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Chat platform (post / edit / socket) errors.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat {operation} failed: {detail}")]
    Request { operation: String, detail: String },

    #[error("chat platform response did not include a message timestamp")]
    MissingTimestamp,
}

/// Assistant platform (session / message / run) errors.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("assistant {operation} request failed: {detail}")]
    Request { operation: String, detail: String },

    #[error("assistant {operation} returned {status}: {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("failed to decode assistant {operation} response: {detail}")]
    Decode { operation: String, detail: String },
}
