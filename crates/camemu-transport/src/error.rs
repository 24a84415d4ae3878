use std::path::PathBuf;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the endpoint path.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the endpoint path.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path does not fit in `sockaddr_un`.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },
}

impl TransportError {
    /// The underlying I/O error, if this error carries one.
    pub fn io_source(&self) -> Option<&std::io::Error> {
        match self {
            TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
                Some(source)
            }
            TransportError::Accept(err) | TransportError::Io(err) => Some(err),
            TransportError::PathTooLong { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
