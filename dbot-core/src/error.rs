use std::fmt;

use thiserror::Error;

/// Close code and reason reported by the transport when a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
}

impl CloseEvent {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CloseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "code {} ({})", self.code, self.reason)
        }
    }
}

#[derive(Error, Debug)]
pub enum DbotError {
    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("Cannot send payload greater than {limit} bytes (got {actual})")]
    PayloadTooLarge { limit: usize, actual: usize },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed: {0}")]
    Closed(CloseEvent),

    #[error("API error: {0}")]
    Api(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Event loop is closed")]
    LoopClosed,

    #[error("Event loop has already run")]
    LoopConsumed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbotError>;
