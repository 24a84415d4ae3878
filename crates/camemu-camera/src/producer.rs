//! The frame production loop spawned by `start`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camemu_buffer::{BufferError, BufferPool, BufferSlot, FrameHeader};
use camemu_protocol::{values, ControlMessage, NotificationSink};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use crate::source::{self, FrameSource};

const PACING_TICK: Duration = Duration::from_millis(10);

/// Whole milliseconds for log fields, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Counters shared between the loop and status readers.
#[derive(Debug, Default)]
pub struct AcquisitionCounters {
    frames_acquired: AtomicU64,
    active: AtomicBool,
    error: Mutex<Option<String>>,
}

/// Copy of [`AcquisitionCounters`] at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquisitionSnapshot {
    pub acquiring: bool,
    pub frames_acquired: u64,
    pub error: Option<String>,
}

impl AcquisitionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_acquired(&self) -> u64 {
        self.frames_acquired.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    pub fn snapshot(&self) -> AcquisitionSnapshot {
        AcquisitionSnapshot {
            acquiring: self.is_active(),
            frames_acquired: self.frames_acquired(),
            error: self.error(),
        }
    }

    fn begin_run(&self) {
        self.frames_acquired.store(0, Ordering::Release);
        *self.error.lock() = None;
        self.active.store(true, Ordering::Release);
    }

    fn record_error(&self, err: &CameraError) {
        *self.error.lock() = Some(err.to_string());
    }
}

/// Handle on a running production thread.
///
/// Dropping the handle stops the loop and waits for it.
pub struct ProductionLoop {
    stop: Arc<AtomicBool>,
    counters: Arc<AcquisitionCounters>,
    handle: Option<JoinHandle<()>>,
}

impl ProductionLoop {
    pub fn spawn(
        config: CameraConfig,
        pool: Arc<BufferPool>,
        sink: Arc<dyn NotificationSink>,
        counters: Arc<AcquisitionCounters>,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        counters.begin_run();

        let worker = Worker {
            config,
            pool,
            sink,
            counters: Arc::clone(&counters),
            stop: Arc::clone(&stop),
            acquire_timeout,
        };
        let handle = thread::Builder::new()
            .name("camemu-producer".into())
            .spawn(move || worker.run())
            .map_err(|source| {
                counters.active.store(false, Ordering::Release);
                CameraError::Spawn {
                    name: "producer",
                    source,
                }
            })?;

        Ok(Self {
            stop,
            counters,
            handle: Some(handle),
        })
    }

    /// True once the loop has exited on its own or after a stop.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub fn counters(&self) -> &Arc<AcquisitionCounters> {
        &self.counters
    }

    /// Signal the loop and wait for it; no notification is published after
    /// this returns.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("production thread panicked");
                self.counters.active.store(false, Ordering::Release);
            }
        }
    }
}

impl Drop for ProductionLoop {
    fn drop(&mut self) {
        self.halt();
    }
}

impl std::fmt::Debug for ProductionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductionLoop")
            .field("finished", &self.is_finished())
            .field("counters", &self.counters.snapshot())
            .finish()
    }
}

struct Worker {
    config: CameraConfig,
    pool: Arc<BufferPool>,
    sink: Arc<dyn NotificationSink>,
    counters: Arc<AcquisitionCounters>,
    stop: Arc<AtomicBool>,
    acquire_timeout: Duration,
}

enum Step {
    Next,
    Finish,
}

impl Worker {
    fn run(self) {
        info!(
            num_frames = self.config.num_frames,
            period_ms = millis(self.config.frame_period()),
            "acquisition started"
        );

        match source::from_config(&self.config) {
            Ok(mut source) => self.produce(source.as_mut()),
            Err(err) => {
                error!(error = %err, "frame source unavailable");
                self.counters.record_error(&err);
            }
        }

        self.counters.active.store(false, Ordering::Release);
        info!(
            frames = self.counters.frames_acquired(),
            "acquisition finished"
        );
    }

    fn produce(&self, source: &mut dyn FrameSource) {
        let mut frame_number: u32 = 0;
        loop {
            if self.stopping() {
                debug!(frame = frame_number, "stop observed");
                return;
            }
            if self.config.num_frames != 0 && u64::from(frame_number) >= self.config.num_frames {
                return;
            }

            let started = Instant::now();
            let Some(slot) = self.acquire() else {
                return;
            };
            match self.fill_and_publish(source, slot, frame_number) {
                Step::Next => {}
                Step::Finish => return,
            }
            self.pace(started);
            let Some(next) = frame_number.checked_add(1) else {
                warn!(frame = frame_number, "frame counter exhausted, ending run");
                return;
            };
            frame_number = next;
        }
    }

    /// Retry until a slot frees up, a stop is requested, or the pool fails.
    fn acquire(&self) -> Option<BufferSlot> {
        loop {
            if self.stopping() {
                return None;
            }
            match self.pool.acquire(self.acquire_timeout) {
                Ok(slot) => return Some(slot),
                Err(BufferError::PoolExhausted { waited }) => {
                    warn!(
                        waited_ms = millis(waited),
                        "no free buffer, retrying"
                    );
                }
                Err(err) => {
                    let err = CameraError::from(err);
                    error!(error = %err, "buffer acquire failed");
                    self.counters.record_error(&err);
                    return None;
                }
            }
        }
    }

    fn fill_and_publish(
        &self,
        source: &mut dyn FrameSource,
        slot: BufferSlot,
        frame_number: u32,
    ) -> Step {
        let frame = match source.next_frame(frame_number, self.pool.max_payload()) {
            Ok(frame) => frame,
            Err(err @ CameraError::Buffer(BufferError::PayloadTooLarge { .. })) => {
                warn!(frame = frame_number, error = %err, "skipping frame");
                self.give_back(slot);
                return Step::Next;
            }
            Err(err) => {
                error!(frame = frame_number, error = %err, "frame source failed");
                self.counters.record_error(&err);
                self.give_back(slot);
                return Step::Finish;
            }
        };

        let header = FrameHeader {
            frame_number,
            width: frame.width,
            height: frame.height,
            data_type: frame.data_type,
            payload_size: u32::try_from(frame.payload.len()).unwrap_or(u32::MAX),
        };
        match self.pool.write_frame(slot, &header, &frame.payload) {
            Ok(()) => {}
            Err(err @ BufferError::PayloadTooLarge { .. }) => {
                warn!(frame = frame_number, error = %err, "skipping frame");
                self.give_back(slot);
                return Step::Next;
            }
            Err(err) => {
                let err = CameraError::from(err);
                error!(frame = frame_number, error = %err, "buffer write failed");
                self.counters.record_error(&err);
                self.give_back(slot);
                return Step::Finish;
            }
        }

        if let Err(err) = self.pool.hand_off(slot) {
            let err = CameraError::from(err);
            error!(frame = frame_number, error = %err, "buffer hand-off failed");
            self.counters.record_error(&err);
            self.give_back(slot);
            return Step::Finish;
        }

        let ready = ControlMessage::notify(values::FRAME_READY)
            .with_param("frame", frame_number)
            .with_param("buffer_id", slot.index());
        match self.sink.publish(&ready) {
            Ok(()) => {
                self.counters.frames_acquired.fetch_add(1, Ordering::AcqRel);
                debug!(frame = frame_number, %slot, "frame ready");
            }
            Err(err) => {
                warn!(frame = frame_number, error = %err, "frame not delivered");
                self.give_back(slot);
            }
        }
        Step::Next
    }

    fn give_back(&self, slot: BufferSlot) {
        if let Err(err) = self.pool.release(slot) {
            warn!(%slot, error = %err, "failed to return buffer");
        }
    }

    fn pace(&self, started: Instant) {
        let deadline = started + self.config.frame_period();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.stopping() {
                return;
            }
            thread::sleep(remaining.min(PACING_TICK));
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use camemu_buffer::{DataType, RegionLayout};
    use crossbeam_channel::{Receiver, Sender};

    use super::*;

    fn fast_config(num_frames: u64) -> CameraConfig {
        CameraConfig {
            num_frames,
            frame_delay_ms: 0,
            exposure_time_ms: 1,
            frame_width: 4,
            frame_height: 4,
            data_type: DataType::Uint8,
            ..CameraConfig::default()
        }
    }

    fn setup(buffers: usize) -> (Arc<BufferPool>, Sender<ControlMessage>, Receiver<ControlMessage>) {
        let pool = BufferPool::anonymous(RegionLayout::new(buffers, 128).expect("layout"))
            .expect("pool");
        let (tx, rx) = crossbeam_channel::unbounded();
        (Arc::new(pool), tx, rx)
    }

    fn wait_finished(production: &ProductionLoop) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !production.is_finished() {
            assert!(Instant::now() < deadline, "loop did not finish");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn millis_saturates_instead_of_truncating() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn produces_exact_count_with_increasing_numbers() {
        let (pool, tx, rx) = setup(4);
        let counters = Arc::new(AcquisitionCounters::new());
        let production = ProductionLoop::spawn(
            fast_config(3),
            Arc::clone(&pool),
            Arc::new(tx),
            Arc::clone(&counters),
            Duration::from_millis(20),
        )
        .expect("spawn");
        wait_finished(&production);
        production.stop();

        let frames: Vec<u64> = rx
            .try_iter()
            .map(|msg| msg.param_u64("frame").expect("frame param"))
            .collect();
        assert_eq!(frames, vec![0, 1, 2]);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.frames_acquired, 3);
        assert!(!snapshot.acquiring);
        assert_eq!(snapshot.error, None);
        assert_eq!(pool.stats().consumer_held, 3);
    }

    #[test]
    fn headers_in_buffers_match_notifications() {
        let (pool, tx, rx) = setup(2);
        let counters = Arc::new(AcquisitionCounters::new());
        let production = ProductionLoop::spawn(
            fast_config(2),
            Arc::clone(&pool),
            Arc::new(tx),
            counters,
            Duration::from_millis(20),
        )
        .expect("spawn");
        wait_finished(&production);

        for msg in rx.try_iter() {
            let slot = BufferSlot::new(msg.param_u64("buffer_id").expect("buffer id") as usize);
            let header = pool.read_header(slot).expect("header");
            assert_eq!(u64::from(header.frame_number), msg.param_u64("frame").expect("frame"));
            assert_eq!(header.payload_size, 16);
            assert_eq!((header.width, header.height), (4, 4));
        }
    }

    #[test]
    fn exhausted_pool_keeps_loop_alive_until_stopped() {
        let (pool, tx, rx) = setup(2);
        let counters = Arc::new(AcquisitionCounters::new());
        let production = ProductionLoop::spawn(
            fast_config(0),
            Arc::clone(&pool),
            Arc::new(tx),
            Arc::clone(&counters),
            Duration::from_millis(20),
        )
        .expect("spawn");

        let first = rx.recv_timeout(Duration::from_secs(2)).expect("frame 0");
        let second = rx.recv_timeout(Duration::from_secs(2)).expect("frame 1");
        assert_eq!(first.param_u64("frame"), Some(0));
        assert_eq!(second.param_u64("frame"), Some(1));

        thread::sleep(Duration::from_millis(100));
        assert!(!production.is_finished());
        assert!(counters.is_active());
        assert!(rx.try_recv().is_err(), "no frame without a free buffer");

        production.stop();
        assert!(!counters.is_active());
        assert!(rx.try_recv().is_err(), "nothing published after stop");
    }

    #[test]
    fn released_buffer_resumes_with_next_frame_number() {
        let (pool, tx, rx) = setup(1);
        let counters = Arc::new(AcquisitionCounters::new());
        let production = ProductionLoop::spawn(
            fast_config(2),
            Arc::clone(&pool),
            Arc::new(tx),
            counters,
            Duration::from_millis(20),
        )
        .expect("spawn");

        let first = rx.recv_timeout(Duration::from_secs(2)).expect("frame 0");
        let slot = BufferSlot::new(first.param_u64("buffer_id").expect("id") as usize);
        thread::sleep(Duration::from_millis(50));
        pool.reclaim(slot).expect("consumer release");

        let second = rx.recv_timeout(Duration::from_secs(2)).expect("frame 1");
        assert_eq!(second.param_u64("frame"), Some(1));
        wait_finished(&production);
    }

    #[test]
    fn oversized_frames_are_skipped() {
        let (pool, tx, rx) = setup(2);
        let counters = Arc::new(AcquisitionCounters::new());
        let mut config = fast_config(2);
        config.frame_width = 64;
        let production = ProductionLoop::spawn(
            config,
            Arc::clone(&pool),
            Arc::new(tx),
            Arc::clone(&counters),
            Duration::from_millis(20),
        )
        .expect("spawn");
        wait_finished(&production);

        assert!(rx.try_recv().is_err());
        assert_eq!(counters.frames_acquired(), 0);
        assert_eq!(counters.error(), None);
        assert_eq!(pool.stats().free, 2, "skipped frames return their buffers");
    }

    #[test]
    fn huge_geometry_is_skipped_without_building_the_frame() {
        let (pool, tx, rx) = setup(2);
        let counters = Arc::new(AcquisitionCounters::new());
        let mut config = fast_config(3);
        config.frame_width = 4_000_000;
        config.frame_height = 4_000_000;
        config.data_type = DataType::Uint64;
        let production = ProductionLoop::spawn(
            config,
            Arc::clone(&pool),
            Arc::new(tx),
            Arc::clone(&counters),
            Duration::from_millis(20),
        )
        .expect("spawn");
        wait_finished(&production);

        assert!(rx.try_recv().is_err());
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.frames_acquired, 0);
        assert_eq!(snapshot.error, None);
        assert_eq!(pool.stats().free, 2);
    }

    #[test]
    fn source_failure_is_recorded() {
        let (pool, tx, _rx) = setup(2);
        let counters = Arc::new(AcquisitionCounters::new());
        let mut config = fast_config(5);
        config.images_path = "/nonexistent/camemu/frames".into();
        let production = ProductionLoop::spawn(
            config,
            Arc::clone(&pool),
            Arc::new(tx),
            Arc::clone(&counters),
            Duration::from_millis(20),
        )
        .expect("spawn");
        wait_finished(&production);

        let snapshot = counters.snapshot();
        assert!(!snapshot.acquiring);
        assert!(snapshot.error.expect("error recorded").contains("frame source"));
        assert_eq!(pool.stats().free, 2);
    }

    #[test]
    fn failed_publish_returns_the_buffer() {
        let (pool, tx, rx) = setup(2);
        drop(rx);
        let counters = Arc::new(AcquisitionCounters::new());
        let production = ProductionLoop::spawn(
            fast_config(3),
            Arc::clone(&pool),
            Arc::new(tx),
            Arc::clone(&counters),
            Duration::from_millis(20),
        )
        .expect("spawn");
        wait_finished(&production);

        assert_eq!(counters.frames_acquired(), 0);
        assert_eq!(pool.stats().free, 2);
    }
}
