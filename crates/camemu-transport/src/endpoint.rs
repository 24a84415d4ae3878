use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// A bound, listening Unix socket endpoint.
///
/// The socket file is created on bind and removed on drop, unless the path
/// has been replaced by something else in the meantime.
pub struct UnixEndpoint {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
}

impl UnixEndpoint {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS and the BSDs.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;
    const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(25);

    /// Bind and listen on `path`, replacing a stale socket file if present.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_path_len(&path)?;
        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        // Never remove a path that is not a socket.
        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(bind_err)?;
        let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix socket");

        Ok(Self {
            listener,
            path,
            created_inode: (metadata.dev(), metadata.ino()),
        })
    }

    /// Accept the next connection, blocking until one arrives.
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// Switch the listener between blocking and polling accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(TransportError::Accept)
    }

    /// Accept a pending connection without blocking.
    ///
    /// Requires [`set_nonblocking(true)`](Self::set_nonblocking). Returns
    /// `Ok(None)` when nothing is waiting. The accepted stream is always
    /// blocking.
    pub fn try_accept(&self) -> Result<Option<IpcStream>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                stream
                    .set_nonblocking(false)
                    .map_err(TransportError::Accept)?;
                debug!(path = ?self.path, "accepted connection");
                Ok(Some(IpcStream::from_unix(stream)))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// Connect to a listening endpoint.
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "connected to unix socket");
        Ok(IpcStream::from_unix(stream))
    }

    /// Connect, retrying while the endpoint is not yet listening.
    ///
    /// Gives up with the last connect error once `timeout` has elapsed.
    pub fn connect_with_retry(path: impl AsRef<Path>, timeout: Duration) -> Result<IpcStream> {
        let path = path.as_ref();
        let deadline = Instant::now() + timeout;
        loop {
            match Self::connect(path) {
                Ok(stream) => return Ok(stream),
                Err(TransportError::Connect { source, .. })
                    if is_not_listening(&source) && Instant::now() < deadline =>
                {
                    std::thread::sleep(Self::CONNECT_RETRY_INTERVAL);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// The path this endpoint is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixEndpoint {
    fn drop(&mut self) {
        let (expected_dev, expected_ino) = self.created_inode;
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

fn check_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= UnixEndpoint::MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: UnixEndpoint::MAX_PATH_LEN,
        });
    }
    Ok(())
}

fn is_not_listening(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::ConnectionRefused
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn unique_dir(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/camemu-transport-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    #[test]
    fn bind_accept_connect() {
        let dir = unique_dir("bind");
        let sock_path = dir.join("ctrl.sock");

        let endpoint = UnixEndpoint::bind(&sock_path).expect("bind should succeed");
        assert!(sock_path.exists());

        let path_clone = sock_path.clone();
        let client = std::thread::spawn(move || {
            let mut stream = UnixEndpoint::connect(&path_clone).expect("connect should succeed");
            stream.write_all(b"arm").expect("write should succeed");
        });

        let mut server = endpoint.accept().expect("accept should succeed");
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).expect("read should succeed");
        assert_eq!(&buf, b"arm");
        client.join().expect("client thread should finish");

        drop(endpoint);
        assert!(!sock_path.exists(), "socket file should be removed on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn default_mode_is_owner_only() {
        let dir = unique_dir("mode");
        let sock_path = dir.join("mode.sock");

        let endpoint = UnixEndpoint::bind(&sock_path).expect("bind should succeed");
        let mode = std::fs::metadata(&sock_path)
            .expect("metadata should be readable")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);

        drop(endpoint);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn path_too_long_rejected() {
        let long_path = "/tmp/".to_string() + &"c".repeat(200) + ".sock";
        let result = UnixEndpoint::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn bind_refuses_to_replace_regular_file() {
        let dir = unique_dir("file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"data").expect("file should be writable");

        let result = UnixEndpoint::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        assert!(sock_path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn try_accept_polls_without_blocking() {
        let dir = unique_dir("poll");
        let sock_path = dir.join("poll.sock");
        let endpoint = UnixEndpoint::bind(&sock_path).expect("bind should succeed");
        endpoint
            .set_nonblocking(true)
            .expect("nonblocking should apply");

        assert!(endpoint
            .try_accept()
            .expect("poll should succeed")
            .is_none());

        let _client = UnixEndpoint::connect(&sock_path).expect("connect should succeed");
        let mut accepted = None;
        for _ in 0..100 {
            if let Some(stream) = endpoint.try_accept().expect("poll should succeed") {
                accepted = Some(stream);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(accepted.is_some(), "pending connection should be accepted");

        drop(endpoint);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_with_retry_waits_for_listener() {
        let dir = unique_dir("retry");
        let sock_path = dir.join("late.sock");

        let path_clone = sock_path.clone();
        let server = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            let endpoint = UnixEndpoint::bind(&path_clone).expect("bind should succeed");
            let _stream = endpoint.accept().expect("accept should succeed");
        });

        let stream = UnixEndpoint::connect_with_retry(&sock_path, Duration::from_secs(3));
        assert!(stream.is_ok());
        server.join().expect("server thread should finish");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_with_retry_gives_up() {
        let dir = unique_dir("giveup");
        let result =
            UnixEndpoint::connect_with_retry(dir.join("absent.sock"), Duration::from_millis(60));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
