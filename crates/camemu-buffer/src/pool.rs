use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{BufferError, Result};
use crate::header::{FrameHeader, FRAME_HEADER_LEN};
use crate::region::{RegionLayout, SharedRegion};

/// Index of one buffer in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferSlot(usize);

impl BufferSlot {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BufferSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side currently owns a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotOwner {
    Free,
    Producer,
    Consumer,
}

impl fmt::Display for SlotOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SlotOwner::Free => "free",
            SlotOwner::Producer => "producer",
            SlotOwner::Consumer => "consumer",
        })
    }
}

/// Point-in-time ownership counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub free: usize,
    pub producer_held: usize,
    pub consumer_held: usize,
}

struct PoolState {
    free: VecDeque<usize>,
    owners: Vec<SlotOwner>,
}

impl PoolState {
    fn owner(&self, slot: BufferSlot) -> Result<SlotOwner> {
        self.owners
            .get(slot.index())
            .copied()
            .ok_or(BufferError::UnknownSlot {
                slot: slot.index(),
                capacity: self.owners.len(),
            })
    }

    fn make_free(&mut self, slot: BufferSlot) {
        self.owners[slot.index()] = SlotOwner::Free;
        self.free.push_back(slot.index());
    }
}

/// Fixed set of equally sized buffers with explicit ownership hand-off.
///
/// Every slot is in exactly one of three places: the free queue, held by
/// the producer (between [`acquire`](Self::acquire) and
/// [`hand_off`](Self::hand_off)), or held by the consumer (until it is
/// released). Slots are recycled in FIFO order.
pub struct BufferPool {
    state: Mutex<PoolState>,
    available: Condvar,
    region: Mutex<SharedRegion>,
    layout: RegionLayout,
    name: Option<String>,
}

impl BufferPool {
    /// Pool over every buffer of `region`, all initially free.
    pub fn new(region: SharedRegion) -> Result<Self> {
        let layout = region.layout();
        if layout.buffer_size <= FRAME_HEADER_LEN {
            return Err(BufferError::InvalidLayout(format!(
                "buffer size {} leaves no room after the {FRAME_HEADER_LEN}-byte frame header",
                layout.buffer_size
            )));
        }
        let name = region.name().map(str::to_string);
        Ok(Self {
            state: Mutex::new(PoolState {
                free: (0..layout.buffer_count).collect(),
                owners: vec![SlotOwner::Free; layout.buffer_count],
            }),
            available: Condvar::new(),
            region: Mutex::new(region),
            layout,
            name,
        })
    }

    /// Create a named shared region and build a pool over it.
    pub fn create(name: &str, layout: RegionLayout) -> Result<Self> {
        Self::new(SharedRegion::create(name, layout)?)
    }

    /// Process-private pool, for tests and for running without a consumer.
    pub fn anonymous(layout: RegionLayout) -> Result<Self> {
        Self::new(SharedRegion::anonymous(layout)?)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn capacity(&self) -> usize {
        self.layout.buffer_count
    }

    pub fn buffer_size(&self) -> usize {
        self.layout.buffer_size
    }

    /// Largest payload a single frame can carry.
    pub fn max_payload(&self) -> usize {
        self.layout.buffer_size - FRAME_HEADER_LEN
    }

    /// Take the oldest free slot for the producer, waiting up to `max_wait`.
    pub fn acquire(&self, max_wait: Duration) -> Result<BufferSlot> {
        let deadline = Instant::now() + max_wait;
        let mut state = self.state.lock();
        loop {
            if let Some(index) = state.free.pop_front() {
                state.owners[index] = SlotOwner::Producer;
                trace!(slot = index, "buffer acquired");
                return Ok(BufferSlot(index));
            }
            if self.available.wait_until(&mut state, deadline).timed_out()
                && state.free.is_empty()
            {
                return Err(BufferError::PoolExhausted { waited: max_wait });
            }
        }
    }

    /// Return a held slot to the free queue.
    pub fn release(&self, slot: BufferSlot) -> Result<()> {
        let mut state = self.state.lock();
        match state.owner(slot)? {
            SlotOwner::Free => Err(BufferError::DoubleRelease { slot: slot.index() }),
            SlotOwner::Producer | SlotOwner::Consumer => {
                state.make_free(slot);
                drop(state);
                self.available.notify_one();
                trace!(%slot, "buffer released");
                Ok(())
            }
        }
    }

    /// Return a consumer-held slot; the producer's own slots are refused.
    pub fn reclaim(&self, slot: BufferSlot) -> Result<()> {
        let mut state = self.state.lock();
        match state.owner(slot)? {
            SlotOwner::Free => Err(BufferError::DoubleRelease { slot: slot.index() }),
            SlotOwner::Producer => Err(BufferError::NotHeld {
                slot: slot.index(),
                owner: SlotOwner::Producer,
            }),
            SlotOwner::Consumer => {
                state.make_free(slot);
                drop(state);
                self.available.notify_one();
                trace!(%slot, "buffer reclaimed from consumer");
                Ok(())
            }
        }
    }

    /// Transfer a producer-held slot to the consumer.
    pub fn hand_off(&self, slot: BufferSlot) -> Result<()> {
        let mut state = self.state.lock();
        match state.owner(slot)? {
            SlotOwner::Producer => {
                state.owners[slot.index()] = SlotOwner::Consumer;
                Ok(())
            }
            owner => Err(BufferError::NotHeld {
                slot: slot.index(),
                owner,
            }),
        }
    }

    pub fn owner(&self, slot: BufferSlot) -> Result<SlotOwner> {
        self.state.lock().owner(slot)
    }

    /// Copy raw bytes to the start of a producer-held buffer.
    pub fn write(&self, slot: BufferSlot, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.layout.buffer_size {
            return Err(BufferError::PayloadTooLarge {
                size: bytes.len(),
                capacity: self.layout.buffer_size,
            });
        }
        self.ensure_producer_held(slot)?;
        let mut region = self.region.lock();
        region.buffer_mut(slot.index())?[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Write a frame header followed by its payload into a producer-held buffer.
    pub fn write_frame(&self, slot: BufferSlot, header: &FrameHeader, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_payload() {
            return Err(BufferError::PayloadTooLarge {
                size: payload.len(),
                capacity: self.max_payload(),
            });
        }
        self.ensure_producer_held(slot)?;
        let mut region = self.region.lock();
        let buffer = region.buffer_mut(slot.index())?;
        buffer[..FRAME_HEADER_LEN].copy_from_slice(&header.encode());
        buffer[FRAME_HEADER_LEN..FRAME_HEADER_LEN + payload.len()].copy_from_slice(payload);
        debug!(
            %slot,
            frame = header.frame_number,
            payload = payload.len(),
            "frame written"
        );
        Ok(())
    }

    /// Copy of a whole buffer.
    pub fn read(&self, slot: BufferSlot) -> Result<Vec<u8>> {
        let region = self.region.lock();
        Ok(region.buffer(slot.index())?.to_vec())
    }

    /// Header of the frame currently stored in a buffer.
    pub fn read_header(&self, slot: BufferSlot) -> Result<FrameHeader> {
        let region = self.region.lock();
        FrameHeader::decode(region.buffer(slot.index())?)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let mut stats = PoolStats {
            capacity: state.owners.len(),
            free: 0,
            producer_held: 0,
            consumer_held: 0,
        };
        for owner in &state.owners {
            match owner {
                SlotOwner::Free => stats.free += 1,
                SlotOwner::Producer => stats.producer_held += 1,
                SlotOwner::Consumer => stats.consumer_held += 1,
            }
        }
        stats
    }

    fn ensure_producer_held(&self, slot: BufferSlot) -> Result<()> {
        match self.state.lock().owner(slot)? {
            SlotOwner::Producer => Ok(()),
            owner => Err(BufferError::NotHeld {
                slot: slot.index(),
                owner,
            }),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::header::DataType;

    const SHORT: Duration = Duration::from_millis(20);

    fn pool(count: usize) -> BufferPool {
        BufferPool::anonymous(RegionLayout::new(count, 64).expect("layout")).expect("pool")
    }

    fn assert_conserved(pool: &BufferPool) {
        let stats = pool.stats();
        assert_eq!(
            stats.free + stats.producer_held + stats.consumer_held,
            stats.capacity
        );
    }

    #[test]
    fn acquires_in_fifo_order_then_exhausts() {
        let pool = pool(2);
        assert_eq!(pool.acquire(SHORT).expect("first").index(), 0);
        assert_eq!(pool.acquire(SHORT).expect("second").index(), 1);
        let err = pool.acquire(SHORT).expect_err("third acquire should fail");
        assert!(matches!(err, BufferError::PoolExhausted { .. }));
        assert_conserved(&pool);
    }

    #[test]
    fn released_slots_recycle_at_the_back() {
        let pool = pool(3);
        let a = pool.acquire(SHORT).expect("a");
        let _b = pool.acquire(SHORT).expect("b");
        pool.release(a).expect("release a");
        assert_eq!(pool.acquire(SHORT).expect("c").index(), 2);
        assert_eq!(pool.acquire(SHORT).expect("d"), a);
    }

    #[test]
    fn double_release_and_unknown_slot_are_errors() {
        let pool = pool(2);
        let slot = pool.acquire(SHORT).expect("acquire");
        pool.release(slot).expect("first release");
        assert!(matches!(
            pool.release(slot),
            Err(BufferError::DoubleRelease { slot: 0 })
        ));
        assert!(matches!(
            pool.release(BufferSlot::new(7)),
            Err(BufferError::UnknownSlot {
                slot: 7,
                capacity: 2
            })
        ));
        assert_eq!(pool.stats().free, 2);
    }

    #[test]
    fn ownership_moves_producer_to_consumer_to_free() {
        let pool = pool(2);
        let slot = pool.acquire(SHORT).expect("acquire");
        assert_eq!(pool.owner(slot).expect("owner"), SlotOwner::Producer);
        assert!(matches!(
            pool.reclaim(slot),
            Err(BufferError::NotHeld {
                owner: SlotOwner::Producer,
                ..
            })
        ));

        pool.hand_off(slot).expect("hand off");
        assert_eq!(pool.owner(slot).expect("owner"), SlotOwner::Consumer);
        assert_eq!(
            pool.stats(),
            PoolStats {
                capacity: 2,
                free: 1,
                producer_held: 0,
                consumer_held: 1
            }
        );

        pool.reclaim(slot).expect("reclaim");
        assert_eq!(pool.owner(slot).expect("owner"), SlotOwner::Free);
        assert!(matches!(
            pool.reclaim(slot),
            Err(BufferError::DoubleRelease { .. })
        ));
    }

    #[test]
    fn consumer_held_slot_cannot_be_written() {
        let pool = pool(1);
        let slot = pool.acquire(SHORT).expect("acquire");
        pool.write(slot, b"abc").expect("producer write");
        pool.hand_off(slot).expect("hand off");
        assert!(matches!(
            pool.write(slot, b"xyz"),
            Err(BufferError::NotHeld {
                owner: SlotOwner::Consumer,
                ..
            })
        ));
        assert_eq!(&pool.read(slot).expect("read")[..3], b"abc");
    }

    #[test]
    fn frame_write_checks_payload_capacity() {
        let pool = pool(1);
        let slot = pool.acquire(SHORT).expect("acquire");
        let header = FrameHeader {
            frame_number: 0,
            width: 4,
            height: 11,
            data_type: DataType::Uint8,
            payload_size: 44,
        };
        pool.write_frame(slot, &header, &[7u8; 44])
            .expect("44 bytes fit exactly");
        assert_eq!(pool.read_header(slot).expect("header"), header);

        let err = pool
            .write_frame(slot, &header, &[7u8; 45])
            .expect_err("45 bytes overflow");
        assert!(matches!(
            err,
            BufferError::PayloadTooLarge {
                size: 45,
                capacity: 44
            }
        ));
        assert!(matches!(
            pool.write(slot, &[0u8; 65]),
            Err(BufferError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn waiting_acquire_wakes_on_release() {
        let pool = Arc::new(pool(1));
        let held = pool.acquire(SHORT).expect("acquire");

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire(Duration::from_secs(2)))
        };
        thread::sleep(Duration::from_millis(30));
        pool.release(held).expect("release");

        let slot = waiter
            .join()
            .expect("waiter thread")
            .expect("waiter should get the slot");
        assert_eq!(slot, held);
    }

    #[test]
    fn concurrent_cycles_conserve_slots() {
        let pool = Arc::new(pool(4));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let slot = pool.acquire(Duration::from_secs(2)).expect("acquire");
                        pool.hand_off(slot).expect("hand off");
                        pool.reclaim(slot).expect("reclaim");
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker thread");
        }
        assert_eq!(pool.stats().free, 4);
        assert_conserved(&pool);
    }

    #[test]
    fn buffer_must_fit_a_header() {
        let err = BufferPool::anonymous(RegionLayout::new(2, FRAME_HEADER_LEN).expect("layout"))
            .expect_err("header-sized buffers are unusable");
        assert!(matches!(err, BufferError::InvalidLayout(_)));
    }
}
