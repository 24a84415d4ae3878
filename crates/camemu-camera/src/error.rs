use std::path::PathBuf;

use crate::state::TransitionError;

/// Errors raised while handling control requests or producing frames.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Lifecycle command not allowed from the current state.
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// Request value or `command` parameter names no known command.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Only `cmd` messages are accepted on the control channel.
    #[error("expected a cmd message, got {0}")]
    UnexpectedKind(&'static str),

    /// Configuration parameters could not be applied.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Frame data could not be read.
    #[error("frame source error on {path}: {source}")]
    Source {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Frame directory holds no regular files.
    #[error("frame source {0} contains no frames")]
    EmptySource(PathBuf),

    #[error("buffer error: {0}")]
    Buffer(#[from] camemu_buffer::BufferError),

    #[error("protocol error: {0}")]
    Protocol(#[from] camemu_protocol::ProtocolError),

    #[error("wire error: {0}")]
    Wire(#[from] camemu_wire::WireError),

    #[error("transport error: {0}")]
    Transport(#[from] camemu_transport::TransportError),

    /// A worker thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CameraError>;
