//! Control channel server: one thread per client, one controller for all.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camemu_protocol::{ControlMessage, MessageKind};
use camemu_transport::{IpcStream, UnixEndpoint};
use camemu_wire::{FrameReader, FrameWriter, WireConfig, WireError};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::controller::CameraController;
use crate::error::{CameraError, Result};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const CLIENT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const REPLY_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Reply to a request that could not be decoded at all.
pub fn malformed_reply(reason: &str) -> ControlMessage {
    ControlMessage::new(MessageKind::Nack, "unknown", Some(0)).with_param("error", reason)
}

/// Cloneable handle that asks a running [`ControlServer`] to stop.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    running: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

pub struct ControlServer {
    path: PathBuf,
    running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ControlServer {
    pub fn bind(path: impl AsRef<Path>, controller: Arc<Mutex<CameraController>>) -> Result<Self> {
        let endpoint = UnixEndpoint::bind(path)?;
        endpoint.set_nonblocking(true)?;
        let path = endpoint.path().to_path_buf();
        let running = Arc::new(AtomicBool::new(true));

        let accept_thread = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("camemu-ctrl-accept".into())
                .spawn(move || accept_loop(endpoint, controller, running))
                .map_err(|source| CameraError::Spawn {
                    name: "control accept",
                    source,
                })?
        };

        info!(endpoint = %path.display(), "control server listening");
        Ok(Self {
            path,
            running,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Block until a [`ServerHandle`] requests shutdown and all clients are closed.
    pub fn wait(mut self) {
        self.join();
    }

    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::Release);
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.join();
    }
}

impl std::fmt::Debug for ControlServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlServer")
            .field("path", &self.path)
            .field("running", &self.running.load(Ordering::Acquire))
            .finish()
    }
}

fn accept_loop(
    endpoint: UnixEndpoint,
    controller: Arc<Mutex<CameraController>>,
    running: Arc<AtomicBool>,
) {
    let next_client = AtomicU64::new(1);
    let mut clients: Vec<JoinHandle<()>> = Vec::new();

    while running.load(Ordering::Acquire) {
        match endpoint.try_accept() {
            Ok(Some(stream)) => {
                let client_id = next_client.fetch_add(1, Ordering::Relaxed);
                let controller = Arc::clone(&controller);
                let running = Arc::clone(&running);
                match thread::Builder::new()
                    .name(format!("camemu-ctrl-{client_id}"))
                    .spawn(move || serve_client(client_id, stream, controller, running))
                {
                    Ok(handle) => clients.push(handle),
                    Err(err) => warn!(client_id, error = %err, "failed to spawn client thread"),
                }
            }
            Ok(None) => {
                clients.retain(|handle| !handle.is_finished());
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                warn!(error = %err, "control accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }

    for handle in clients {
        let _ = handle.join();
    }
    info!(endpoint = %endpoint.path().display(), "control server stopped");
}

fn serve_client(
    client_id: u64,
    stream: IpcStream,
    controller: Arc<Mutex<CameraController>>,
    running: Arc<AtomicBool>,
) {
    let config = WireConfig {
        read_timeout: Some(CLIENT_POLL_INTERVAL),
        write_timeout: Some(REPLY_WRITE_TIMEOUT),
        ..WireConfig::default()
    };
    let (mut reader, mut writer) = match open_client(stream, config) {
        Ok(pair) => pair,
        Err(err) => {
            warn!(client_id, error = %err, "failed to set up client connection");
            return;
        }
    };
    debug!(client_id, "control client connected");

    while running.load(Ordering::Acquire) {
        let payload = match reader.read_frame() {
            Ok(payload) => payload,
            Err(WireError::Timeout) => continue,
            Err(WireError::ConnectionClosed) => break,
            Err(err) => {
                warn!(client_id, error = %err, "closing control connection");
                break;
            }
        };

        let reply = match ControlMessage::decode(&payload) {
            Ok(request) => {
                let mut controller = controller.lock();
                let packet_logging = controller.settings().enable_packet_logging;
                if packet_logging {
                    trace!(client_id, request = %request, "control request");
                }
                let reply = controller.handle(&request);
                if packet_logging {
                    trace!(client_id, reply = %reply, "control reply");
                }
                reply
            }
            Err(err) => {
                warn!(client_id, error = %err, "malformed control request");
                malformed_reply(&err.to_string())
            }
        };

        let bytes = match reply.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(client_id, error = %err, "failed to encode control reply");
                continue;
            }
        };
        if let Err(err) = writer.send(&bytes) {
            warn!(client_id, error = %err, "failed to send control reply");
            break;
        }
    }
    debug!(client_id, "control client disconnected");
}

fn open_client(
    stream: IpcStream,
    config: WireConfig,
) -> Result<(FrameReader<IpcStream>, FrameWriter<IpcStream>)> {
    let reader_stream = stream.try_clone()?;
    let reader = FrameReader::with_config_ipc(reader_stream, config.clone())?;
    let writer = FrameWriter::with_config_ipc(stream, config)?;
    Ok((reader, writer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_reply_shape() {
        let reply = malformed_reply("invalid json");
        assert_eq!(reply.kind, MessageKind::Nack);
        assert_eq!(reply.value, "unknown");
        assert_eq!(reply.id, Some(0));
        assert_eq!(reply.param_str("error"), Some("invalid json"));
    }
}
