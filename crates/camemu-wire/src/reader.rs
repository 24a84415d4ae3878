use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use camemu_transport::IpcStream;
use tracing::trace;

use crate::codec::{decode_frame, WireConfig};
use crate::error::{Result, WireError};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frame payloads from any `Read` stream.
///
/// A read that times out part-way through a frame keeps the bytes received
/// so far; the next call resumes where it stopped.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: WireConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete payload (blocking).
    ///
    /// Returns `Err(WireError::ConnectionClosed)` at EOF and
    /// `Err(WireError::Timeout)` when the stream read timeout expires.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(payload) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                trace!(len = payload.len(), buffered = self.buf.len(), "frame read");
                return Ok(payload);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(WireError::from_io(err)),
            };

            if read == 0 {
                return Err(WireError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for `IpcStream`, applying the read timeout.
    pub fn with_config_ipc(inner: IpcStream, config: WireConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_wire_error)?;
        Ok(Self::with_config(inner, config))
    }

    /// Change the read timeout for subsequent reads.
    pub fn set_read_timeout(&mut self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner
            .set_read_timeout(timeout)
            .map_err(transport_to_wire_error)?;
        self.config.read_timeout = timeout;
        Ok(())
    }
}

pub(crate) fn transport_to_wire_error(err: camemu_transport::TransportError) -> WireError {
    match err {
        camemu_transport::TransportError::Io(io)
        | camemu_transport::TransportError::Accept(io)
        | camemu_transport::TransportError::Bind { source: io, .. }
        | camemu_transport::TransportError::Connect { source: io, .. } => WireError::Io(io),
        other => WireError::Io(std::io::Error::other(other.to_string())),
    }
}
