use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("room error: {0}")]
    Room(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("audio error: {0}")]
    Audio(String),
    #[error("capture error: {0}")]
    Capture(String),
}

impl CallError {
    /// The description without the category prefix, as shown to the user.
    pub fn message(&self) -> &str {
        match self {
            CallError::Connection(m)
            | CallError::Room(m)
            | CallError::Http(m)
            | CallError::Protocol(m)
            | CallError::InvalidState(m)
            | CallError::InvalidUrl(m)
            | CallError::Audio(m)
            | CallError::Capture(m) => m,
        }
    }
}

impl From<serde_json::Error> for CallError {
    fn from(e: serde_json::Error) -> Self {
        CallError::Protocol(e.to_string())
    }
}

impl From<reqwest::Error> for CallError {
    fn from(e: reqwest::Error) -> Self {
        CallError::Http(e.to_string())
    }
}
