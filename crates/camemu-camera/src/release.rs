//! Consumer → producer buffer returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camemu_buffer::{BufferPool, BufferSlot};
use camemu_protocol::{values, ControlMessage, MessageKind, NotificationSink};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::error::{CameraError, Result};

/// Poll interval; bounds how long shutdown waits for the listener.
pub const RELEASE_TICK: Duration = Duration::from_millis(100);

/// Counts of handled messages, for diagnostics.
#[derive(Debug, Default)]
pub struct ReleaseStats {
    released: AtomicU64,
    violations: AtomicU64,
    config_requests: AtomicU64,
}

impl ReleaseStats {
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Acquire)
    }

    pub fn config_requests(&self) -> u64 {
        self.config_requests.load(Ordering::Acquire)
    }
}

/// `buffer_config` notification describing `pool`.
pub fn buffer_config_notification(pool: &BufferPool) -> ControlMessage {
    ControlMessage::notify(values::BUFFER_CONFIG)
        .with_param("shared_buffer_name", pool.name().unwrap_or_default())
        .with_param("num_buffers", pool.capacity())
        .with_param("buffer_size", pool.buffer_size())
}

/// Background thread returning released buffers to the pool.
pub struct ReleaseListener {
    running: Arc<AtomicBool>,
    stats: Arc<ReleaseStats>,
    handle: Option<JoinHandle<()>>,
}

impl ReleaseListener {
    pub fn spawn(
        inbox: Receiver<ControlMessage>,
        pool: Arc<BufferPool>,
        announcer: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(ReleaseStats::default());

        let handler = ReleaseHandler {
            pool,
            announcer,
            stats: Arc::clone(&stats),
        };
        let handle = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("camemu-release".into())
                .spawn(move || {
                    debug!("release listener started");
                    while running.load(Ordering::Acquire) {
                        match inbox.recv_timeout(RELEASE_TICK) {
                            Ok(message) => handler.handle(&message),
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => {
                                debug!("release inbox closed");
                                break;
                            }
                        }
                    }
                    debug!("release listener stopped");
                })
                .map_err(|source| CameraError::Spawn {
                    name: "release",
                    source,
                })?
        };

        Ok(Self {
            running,
            stats,
            handle: Some(handle),
        })
    }

    pub fn stats(&self) -> &Arc<ReleaseStats> {
        &self.stats
    }

    pub fn shutdown(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!(
                released = self.stats.released(),
                violations = self.stats.violations(),
                "release listener joined"
            );
        }
    }
}

impl Drop for ReleaseListener {
    fn drop(&mut self) {
        self.halt();
    }
}

struct ReleaseHandler {
    pool: Arc<BufferPool>,
    announcer: Arc<dyn NotificationSink>,
    stats: Arc<ReleaseStats>,
}

impl ReleaseHandler {
    fn handle(&self, message: &ControlMessage) {
        match (message.kind, message.value.as_str()) {
            (MessageKind::Notify, values::FRAME_RELEASE) => self.release(message),
            (MessageKind::Notify | MessageKind::Command, values::REQUEST_BUFFER_CONFIG) => {
                self.stats.config_requests.fetch_add(1, Ordering::AcqRel);
                debug!("buffer config requested");
                if let Err(err) = self.announcer.publish(&buffer_config_notification(&self.pool)) {
                    warn!(error = %err, "failed to publish buffer config");
                }
            }
            _ => warn!(message = %message, "unexpected message on release channel"),
        }
    }

    fn release(&self, message: &ControlMessage) {
        let frame = message.param_u64("frame");
        let Some(buffer_id) = message.param_u64("buffer_id") else {
            self.stats.violations.fetch_add(1, Ordering::AcqRel);
            warn!(message = %message, "frame release without a buffer id");
            return;
        };
        let slot = BufferSlot::new(usize::try_from(buffer_id).unwrap_or(usize::MAX));
        match self.pool.reclaim(slot) {
            Ok(()) => {
                self.stats.released.fetch_add(1, Ordering::AcqRel);
                debug!(?frame, buffer_id, "frame released");
            }
            Err(err) => {
                self.stats.violations.fetch_add(1, Ordering::AcqRel);
                warn!(?frame, buffer_id, error = %err, "ignoring invalid frame release");
            }
        }
    }
}
