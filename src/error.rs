//! Console error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsoleError {
    /// Rejected locally before any request left the client.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Another operation of the same class is still in flight.
    #[error("Operation already in flight: {0}")]
    Busy(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Credential rejected by the backend (401); credentials are wiped
    /// and a re-login event has been emitted before this surfaces.
    #[error("Not authenticated")]
    Unauthorized,

    /// Non-401 error response from the backend.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The backend response violated the operation contract
    /// (missing or overlapping result partitions).
    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::config::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// Make ConsoleError serializable so the UI shell can transport it verbatim
impl serde::Serialize for ConsoleError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConsoleError>;
