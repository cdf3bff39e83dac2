use thiserror::Error;

/// Top-level error type for wabridge.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Error from the messaging client (connect, send, download).
    #[error("client error: {0}")]
    Client(String),

    /// Error talking to the backend API.
    #[error("backend error: {0}")]
    Backend(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// A session for this phone is already live.
    #[error("session for {0} already exists")]
    AlreadyExists(String),

    /// No ready session for this phone.
    #[error("client for {0} is not connected")]
    NotConnected(String),

    /// Caller supplied an invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Inbound or outbound media could not be processed.
    #[error("media error: {0}")]
    Media(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
