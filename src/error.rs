//! Error types for the companion engine.

/// Top-level error type for the avatar/speech system.
#[derive(Debug, thiserror::Error)]
pub enum CompanionError {
    /// Graphics context probe or scene construction error.
    #[error("graphics error: {0}")]
    Graphics(String),

    /// Avatar asset download or parse error.
    #[error("asset load error: {0}")]
    AssetLoad(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio device, stream, or playback error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Chat completion endpoint error.
    #[error("chat error: {0}")]
    Chat(String),

    /// User input rejected (e.g. message too long).
    #[error("validation error: {0}")]
    Validation(String),

    /// WebSocket or metrics transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration load or merge error.
    #[error("config error: {0}")]
    Config(String),

    /// Persisted state read/write error.
    #[error("persistence error: {0}")]
    Persist(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CompanionError>;
