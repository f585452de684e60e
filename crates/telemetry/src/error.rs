//! Telemetry adapter error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    /// HTTP client error reaching the event store.
    #[error("event store request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Event store returned a non-success status.
    #[error("event store returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Backend is unreachable.
    #[error("event store unavailable: {0}")]
    Unavailable(String),

    /// Payload could not be encoded.
    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
