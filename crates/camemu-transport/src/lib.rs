//! Local IPC transport for camemu.
//!
//! The control channel and both buffer notification channels run over Unix
//! domain sockets. This crate provides the listening [`UnixEndpoint`] and the
//! connected [`IpcStream`]; message framing lives in `camemu-wire`.

pub mod error;

#[cfg(unix)]
pub mod endpoint;
#[cfg(unix)]
pub mod stream;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use endpoint::UnixEndpoint;
#[cfg(unix)]
pub use stream::IpcStream;
