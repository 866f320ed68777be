//! Error types for the RAG voice agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the RAG voice agent
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A required credential is absent from the environment
    #[error("missing required credential: {0} is not set")]
    MissingCredential(&'static str),

    /// Document corpus could not be read
    #[error("corpus error: {0}")]
    Corpus(String),

    /// Semantic index could not be built, written, or loaded
    #[error("index error: {0}")]
    Index(String),

    /// Embedding provider error
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Completion model error
    #[error("llm error: {0}")]
    Llm(String),

    /// Tool execution error
    #[error("tool error: {0}")]
    Tool(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio encoding or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Room connection or transport error
    #[error("room error: {0}")]
    Room(String),

    /// Connection pool error
    #[error("database error: {0}")]
    Database(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Self::Database(e.to_string())
    }
}
