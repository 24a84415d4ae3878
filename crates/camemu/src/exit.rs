use std::fmt;
use std::io;

use camemu::buffer::BufferError;
use camemu::camera::CameraError;
use camemu::protocol::ProtocolError;
use camemu::transport::TransportError;
use camemu::wire::WireError;

pub const SUCCESS: i32 = 0;
/// The camera answered with a nack.
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: &io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: &TransportError) -> CliError {
    match err.io_source() {
        Some(source) => CliError::new(io_error(context, source).code, format!("{context}: {err}")),
        None => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn wire_error(context: &str, err: &WireError) -> CliError {
    let code = match err {
        WireError::Io(source) => io_error(context, source).code,
        WireError::Timeout => TIMEOUT,
        WireError::ConnectionClosed => TRANSPORT_ERROR,
        WireError::PayloadTooLarge { .. } | WireError::InvalidMagic => DATA_INVALID,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn protocol_error(context: &str, err: &ProtocolError) -> CliError {
    match err {
        ProtocolError::Transport(inner) => transport_error(context, inner),
        ProtocolError::Wire(inner) => wire_error(context, inner),
        ProtocolError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ProtocolError::Disconnected => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        ProtocolError::MalformedMessage(_) | ProtocolError::Json(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

pub fn buffer_error(context: &str, err: &BufferError) -> CliError {
    let code = match err {
        BufferError::Io { source, .. } => io_error(context, source).code,
        BufferError::InvalidName(_) | BufferError::InvalidLayout(_) => USAGE,
        BufferError::HeaderTooShort { .. } | BufferError::PayloadTooLarge { .. } => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn camera_error(context: &str, err: &CameraError) -> CliError {
    match err {
        CameraError::Buffer(inner) => buffer_error(context, inner),
        CameraError::Protocol(inner) => protocol_error(context, inner),
        CameraError::Wire(inner) => wire_error(context, inner),
        CameraError::Transport(inner) => transport_error(context, inner),
        CameraError::InvalidConfig(_) | CameraError::UnknownCommand(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        CameraError::Source { .. } | CameraError::EmptySource(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        _ => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}
