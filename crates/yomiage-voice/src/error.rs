use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("HTTP request to synthesis engine failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Synthesis engine returned {status}: {message}")]
    EngineStatus { status: u16, message: String },

    #[error("Synthesis engine is unavailable")]
    EngineUnavailable,

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VoiceError {
    /// Returns `true` for failures worth retrying: connection errors and timeouts.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::Io(_) => true,
            _ => false,
        }
    }
}
