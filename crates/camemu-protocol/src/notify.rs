//! Fire-and-forget notification channels.
//!
//! Two shapes are used by the buffer manager:
//! - one-to-many: a [`Publisher`] broadcasts `frame_ready` and
//!   `buffer_config` to every connected [`Subscriber`];
//! - many-to-one: [`Notifier`]s push `frame_release` messages into a single
//!   [`Inbox`], which hands them to the consumer as a channel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camemu_transport::{IpcStream, UnixEndpoint};
use camemu_wire::{FrameReader, FrameWriter, WireError};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::{ProtocolError, Result};
use crate::message::ControlMessage;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const PUBLISH_WRITE_TIMEOUT: Duration = Duration::from_millis(250);
const INBOX_SEND_TICK: Duration = Duration::from_millis(100);
const MIN_RECV_TIMEOUT: Duration = Duration::from_millis(1);

/// Destination for outbound notifications.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, message: &ControlMessage) -> Result<()>;
}

impl NotificationSink for Sender<ControlMessage> {
    fn publish(&self, message: &ControlMessage) -> Result<()> {
        self.send(message.clone())
            .map_err(|_| ProtocolError::Disconnected)
    }
}

/// One-to-many broadcaster bound to a local endpoint.
///
/// Subscribers that fail a write are dropped; publishing never blocks on a
/// slow subscriber for longer than the write timeout.
pub struct Publisher {
    path: PathBuf,
    subscribers: Arc<Mutex<Vec<FrameWriter<IpcStream>>>>,
    running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Publisher {
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let endpoint = UnixEndpoint::bind(path)?;
        endpoint.set_nonblocking(true)?;
        let path = endpoint.path().to_path_buf();

        let subscribers: Arc<Mutex<Vec<FrameWriter<IpcStream>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let accept_thread = {
            let subscribers = Arc::clone(&subscribers);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("camemu-publish-accept".into())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        match endpoint.try_accept() {
                            Ok(Some(stream)) => {
                                if let Err(err) = stream.set_write_timeout(Some(PUBLISH_WRITE_TIMEOUT))
                                {
                                    warn!(error = %err, "failed to set subscriber write timeout");
                                    continue;
                                }
                                let mut subscribers = subscribers.lock();
                                subscribers.push(FrameWriter::new(stream));
                                debug!(
                                    endpoint = %endpoint.path().display(),
                                    subscribers = subscribers.len(),
                                    "subscriber connected"
                                );
                            }
                            Ok(None) => thread::sleep(ACCEPT_POLL_INTERVAL),
                            Err(err) => {
                                warn!(error = %err, "publisher accept failed");
                                thread::sleep(ACCEPT_POLL_INTERVAL);
                            }
                        }
                    }
                })
                .map_err(|err| ProtocolError::Transport(err.into()))?
        };

        info!(endpoint = %path.display(), "publisher bound");
        Ok(Self {
            path,
            subscribers,
            running,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Block until at least `count` subscribers are connected.
    pub fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.subscriber_count() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(ACCEPT_POLL_INTERVAL / 2);
        }
    }

    /// Broadcast to all subscribers, returning how many received it.
    pub fn broadcast(&self, message: &ControlMessage) -> Result<usize> {
        let payload = message.encode()?;
        let mut subscribers = self.subscribers.lock();
        subscribers.retain_mut(|writer| match writer.send(&payload) {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "dropping subscriber");
                false
            }
        });
        trace!(value = %message.value, delivered = subscribers.len(), "broadcast");
        Ok(subscribers.len())
    }
}

impl NotificationSink for Publisher {
    fn publish(&self, message: &ControlMessage) -> Result<()> {
        self.broadcast(message).map(|_| ())
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("path", &self.path)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Receiving end of a [`Publisher`].
pub struct Subscriber {
    reader: FrameReader<IpcStream>,
}

impl Subscriber {
    /// Connect, retrying until the publisher endpoint appears or `timeout` passes.
    pub fn connect(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let stream = UnixEndpoint::connect_with_retry(path, timeout)?;
        Ok(Self {
            reader: FrameReader::new(stream),
        })
    }

    /// Next notification, or `None` if nothing arrived within `timeout`.
    pub fn recv(&mut self, timeout: Duration) -> Result<Option<ControlMessage>> {
        self.reader
            .set_read_timeout(Some(timeout.max(MIN_RECV_TIMEOUT)))?;
        match self.reader.read_frame() {
            Ok(payload) => ControlMessage::decode(&payload).map(Some),
            Err(WireError::Timeout) => Ok(None),
            Err(WireError::ConnectionClosed) => Err(ProtocolError::Disconnected),
            Err(err) => Err(err.into()),
        }
    }
}

/// Sending end of an [`Inbox`].
pub struct Notifier {
    writer: Mutex<FrameWriter<IpcStream>>,
}

impl Notifier {
    pub fn connect(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let stream = UnixEndpoint::connect_with_retry(path, timeout)?;
        stream.set_write_timeout(Some(PUBLISH_WRITE_TIMEOUT))?;
        Ok(Self {
            writer: Mutex::new(FrameWriter::new(stream)),
        })
    }

    pub fn send(&self, message: &ControlMessage) -> Result<()> {
        let payload = message.encode()?;
        self.writer.lock().send(&payload).map_err(|err| match err {
            WireError::ConnectionClosed => ProtocolError::Disconnected,
            other => other.into(),
        })
    }
}

impl NotificationSink for Notifier {
    fn publish(&self, message: &ControlMessage) -> Result<()> {
        self.send(message)
    }
}

/// Many-to-one receiver bound to a local endpoint.
///
/// Decoded messages from every connected [`Notifier`] are delivered, in
/// per-connection order, on a bounded channel.
pub struct Inbox {
    path: PathBuf,
    receiver: Receiver<ControlMessage>,
    running: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<InboxConnection>>>,
    accept_thread: Option<JoinHandle<()>>,
}

/// A connected notifier: the reader thread and a handle to shut its stream.
struct InboxConnection {
    stream: IpcStream,
    reader: JoinHandle<()>,
}

impl Inbox {
    pub fn bind(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let endpoint = UnixEndpoint::bind(path)?;
        endpoint.set_nonblocking(true)?;
        let path = endpoint.path().to_path_buf();

        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let connections: Arc<Mutex<Vec<InboxConnection>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_thread = {
            let running = Arc::clone(&running);
            let connections = Arc::clone(&connections);
            thread::Builder::new()
                .name("camemu-inbox-accept".into())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        // Drop readers whose notifier went away, closing our stream clone.
                        connections
                            .lock()
                            .retain(|connection| !connection.reader.is_finished());

                        match endpoint.try_accept() {
                            Ok(Some(stream)) => {
                                let handle = match stream.try_clone() {
                                    Ok(handle) => handle,
                                    Err(err) => {
                                        warn!(error = %err, "failed to clone notifier stream");
                                        continue;
                                    }
                                };
                                let sender = sender.clone();
                                let running = Arc::clone(&running);
                                match thread::Builder::new()
                                    .name("camemu-inbox-reader".into())
                                    .spawn(move || read_notifications(stream, sender, running))
                                {
                                    Ok(reader) => connections.lock().push(InboxConnection {
                                        stream: handle,
                                        reader,
                                    }),
                                    Err(err) => warn!(error = %err, "failed to spawn inbox reader"),
                                }
                                debug!(endpoint = %endpoint.path().display(), "notifier connected");
                            }
                            Ok(None) => thread::sleep(ACCEPT_POLL_INTERVAL),
                            Err(err) => {
                                warn!(error = %err, "inbox accept failed");
                                thread::sleep(ACCEPT_POLL_INTERVAL);
                            }
                        }
                    }
                })
                .map_err(|err| ProtocolError::Transport(err.into()))?
        };

        info!(endpoint = %path.display(), "inbox bound");
        Ok(Self {
            path,
            receiver,
            running,
            connections,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A handle on the delivery channel.
    pub fn receiver(&self) -> Receiver<ControlMessage> {
        self.receiver.clone()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<ControlMessage> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Notifier connections currently held open.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}

fn read_notifications(stream: IpcStream, sender: Sender<ControlMessage>, running: Arc<AtomicBool>) {
    let mut reader = FrameReader::new(stream);
    while running.load(Ordering::Acquire) {
        let payload = match reader.read_frame() {
            Ok(payload) => payload,
            Err(WireError::ConnectionClosed) => {
                debug!("notifier disconnected");
                return;
            }
            Err(err) => {
                debug!(error = %err, "inbox reader stopping");
                return;
            }
        };

        let mut message = match ControlMessage::decode(&payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "dropping malformed notification");
                continue;
            }
        };

        loop {
            match sender.send_timeout(message, INBOX_SEND_TICK) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if !running.load(Ordering::Acquire) {
                        return;
                    }
                    message = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        let connections: Vec<_> = self.connections.lock().drain(..).collect();
        for connection in &connections {
            let _ = connection.stream.shutdown();
        }
        for connection in connections {
            let _ = connection.reader.join();
        }
    }
}

impl std::fmt::Debug for Inbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox").field("path", &self.path).finish()
    }
}
