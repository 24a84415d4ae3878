use std::time::Duration;

/// Errors that can occur on the control or notification channels.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] camemu_transport::TransportError),

    /// Framing error.
    #[error("wire error: {0}")]
    Wire(#[from] camemu_wire::WireError),

    /// An envelope was missing a required field or had one of the wrong type.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Envelope serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No matching reply arrived in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The other end closed the connection.
    #[error("peer disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
