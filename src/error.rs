//! Error types for the avatar response pipeline.

/// Top-level error type for the avatar delivery system.
#[derive(Debug, thiserror::Error)]
pub enum AvatarError {
    /// Text-to-speech synthesis error (transient network class).
    #[error("TTS error: {0}")]
    Tts(String),

    /// Text-to-speech rejected the request or returned unusable audio
    /// (validation class, not retryable).
    #[error("TTS validation error: {0}")]
    TtsInvalid(String),

    /// Language model streaming error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Conversation history load/save error.
    #[error("history error: {0}")]
    History(String),

    /// Broadcast delivery error.
    #[error("broadcast error: {0}")]
    Broadcast(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AvatarError {
    /// Whether retrying the same call could reasonably succeed.
    ///
    /// Transient network failures are retryable; validation failures and
    /// local I/O failures are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Tts(_) | Self::Llm(_) | Self::Broadcast(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AvatarError>;
