/// Errors that can occur while framing messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The frame header does not start with the expected magic.
    #[error("invalid frame magic (expected 0x4345 \"CE\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A read or write did not complete within the stream timeout.
    #[error("timed out waiting on stream")]
    Timeout,

    /// An I/O error occurred while reading or writing.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,
}

impl WireError {
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => WireError::Timeout,
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => WireError::ConnectionClosed,
            _ => WireError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, WireError>;
