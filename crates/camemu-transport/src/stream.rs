use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::Result;

/// A connected control or notification stream.
///
/// Thin wrapper over a Unix stream so the layers above never depend on the
/// socket type directly.
pub struct IpcStream {
    inner: UnixStream,
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl IpcStream {
    pub(crate) fn from_unix(inner: UnixStream) -> Self {
        Self { inner }
    }

    /// Create a connected pair, mostly useful in tests.
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Set read timeout on the underlying stream.
    ///
    /// A blocked read then fails with `WouldBlock` or `TimedOut`.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Clone the stream (new file descriptor, same connection).
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self::from_unix(self.inner.try_clone()?))
    }

    /// Shut down both directions, waking any thread blocked on a clone.
    pub fn shutdown(&self) -> Result<()> {
        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Credentials of the connected peer as `(uid, gid, pid)` (Linux only).
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        use std::os::fd::AsRawFd;

        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and the descriptor is an open Unix socket owned by this stream.
        let rc = unsafe {
            libc::getsockopt(
                self.inner.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream").field("type", &"unix").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_carries_bytes_both_ways() {
        let (mut left, mut right) = IpcStream::pair().expect("pair should be creatable");
        left.write_all(b"ping").expect("write should succeed");
        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).expect("read should succeed");
        assert_eq!(&buf, b"ping");

        right.write_all(b"pong").expect("write should succeed");
        left.read_exact(&mut buf).expect("read should succeed");
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn read_timeout_surfaces_as_would_block() {
        let (mut left, _right) = IpcStream::pair().expect("pair should be creatable");
        left.set_read_timeout(Some(Duration::from_millis(20)))
            .expect("timeout should apply");
        let mut buf = [0u8; 1];
        let err = left.read(&mut buf).expect_err("read should time out");
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn shutdown_wakes_reader_with_eof() {
        let (left, _right) = IpcStream::pair().expect("pair should be creatable");
        let mut reader = left.try_clone().expect("clone should succeed");
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            reader.read(&mut buf).expect("read should return eof")
        });
        std::thread::sleep(Duration::from_millis(20));
        left.shutdown().expect("shutdown should succeed");
        assert_eq!(handle.join().expect("reader thread should finish"), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn peer_credentials_report_own_pid() {
        let (left, _right) = IpcStream::pair().expect("pair should be creatable");
        let (_, _, pid) = left.peer_credentials().expect("credentials on linux");
        assert_eq!(pid, std::process::id());
    }
}
