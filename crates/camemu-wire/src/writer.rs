use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use camemu_transport::IpcStream;

use crate::codec::{encode_frame, WireConfig};
use crate::error::{Result, WireError};
use crate::reader::transport_to_wire_error;

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: WireConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Frame `payload` and write it out in full (blocking).
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(WireError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(WireError::from_io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(WireError::from_io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameWriter<IpcStream> {
    /// Create a frame writer for `IpcStream`, applying the write timeout.
    pub fn with_config_ipc(inner: IpcStream, config: WireConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_wire_error)?;
        Ok(Self::with_config(inner, config))
    }
}
