//! Fixed pool of RDMA-registered composite image buffers.
//!
//! The pool is the only backpressure mechanism between the frame workers and
//! the transport: at most `capacity` logical frames are ever in flight.
//!
//! # Slot Lifecycle
//!
//! ```text
//!   free --acquire(buffer_id, frame)--> leased --into_in_flight()--> in flight
//!     ^                                    |                              |
//!     +------------ lease dropped ---------+                              |
//!     +----------------------- release(buffer_id) (reclaimer) -----------+
//! ```
//!
//! Slot ids are not handed out from a free list. The caller computes
//! `buffer_id = frame % capacity` ([`CompositePool::buffer_id`]) so each
//! logical frame maps to a fixed slot, and [`CompositePool::acquire`] blocks
//! on a condition variable until that slot is free.
//!
//! # Occupancy
//!
//! One `parking_lot::Mutex` guards the occupancy table and one `Condvar` is
//! broadcast on every release. Per slot the table records the frame holding
//! it (`None` = free) and the next frame allowed to claim it. The slot is
//! claimed inside `acquire`, so two workers whose frames map to the same slot
//! can never both write it.
//!
//! Claims on a slot follow frame order: frame `f` waits until frame
//! `f - capacity` has been released, even if the slot is free earlier. A
//! worker holding a higher frame therefore never takes the slot from a lower
//! frame whose worker still pins the capture ring.
//!
//! # Example
//!
//! ```
//! use jf_pool::CompositePool;
//!
//! let pool = CompositePool::new(4, 1024).unwrap();
//! let id = pool.buffer_id(1);
//! let mut lease = pool.acquire(id, 1).unwrap();
//! lease.bytes_mut()[0] = 0xAB;
//! let posted = lease.into_in_flight(1024).unwrap();
//! assert_eq!(pool.occupied(), 1);
//!
//! // Later, on the completion thread:
//! assert_eq!(pool.release(posted.buffer_id).unwrap(), 1);
//! assert_eq!(pool.occupied(), 0);
//! ```

pub mod error;
pub mod region;

pub use error::PoolError;
pub use region::{InFlightSlot, MemoryKey};

use jf_core::{DetectorLayout, ExperimentSettings, PixelDepth};
use parking_lot::{Condvar, Mutex};
use region::RegisteredMemory;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Pool of composite image buffers backed by one registered memory block.
#[derive(Debug)]
pub struct CompositePool {
    memory: RegisteredMemory,
    occupancy: Mutex<Occupancy>,
    released: Condvar,
    capacity: usize,
    slot_bytes: usize,
    occupied: AtomicUsize,
    peak_occupied: AtomicUsize,
    total_acquires: AtomicU64,
    total_releases: AtomicU64,
}

impl CompositePool {
    /// Create a pool of `capacity` slots of `slot_bytes` bytes each.
    ///
    /// `slot_bytes` must be a non-zero multiple of 4 so every slot can be
    /// viewed as 16- or 32-bit pixels.
    pub fn new(capacity: usize, slot_bytes: usize) -> Result<Arc<Self>, PoolError> {
        if capacity == 0 {
            return Err(PoolError::InvalidGeometry("capacity must be > 0".into()));
        }
        if slot_bytes == 0 || slot_bytes % 4 != 0 {
            return Err(PoolError::InvalidGeometry(format!(
                "slot size {slot_bytes} must be a non-zero multiple of 4"
            )));
        }

        info!(
            capacity,
            slot_mb = slot_bytes as f64 / (1024.0 * 1024.0),
            total_mb = (capacity * slot_bytes) as f64 / (1024.0 * 1024.0),
            "CompositePool created"
        );

        Ok(Arc::new(Self {
            memory: RegisteredMemory::new(capacity, slot_bytes),
            occupancy: Mutex::new(Occupancy::new(capacity)),
            released: Condvar::new(),
            capacity,
            slot_bytes,
            occupied: AtomicUsize::new(0),
            peak_occupied: AtomicUsize::new(0),
            total_acquires: AtomicU64::new(0),
            total_releases: AtomicU64::new(0),
        }))
    }

    /// Create the pool for one run.
    ///
    /// Slots are sized for a full composite image at the run's pixel depth.
    /// At 4-byte depth each slot is twice as large, so the slot count halves
    /// and total memory stays the same.
    pub fn for_run(
        layout: &DetectorLayout,
        settings: &ExperimentSettings,
        send_queue_depth: usize,
    ) -> Result<Arc<Self>, PoolError> {
        let capacity = Self::capacity_for(settings.pixel_depth, send_queue_depth);
        Self::new(capacity, layout.composite_bytes(settings.pixel_depth))
    }

    /// Slot count for `depth` given the transport's send-queue depth.
    #[must_use]
    pub fn capacity_for(depth: PixelDepth, send_queue_depth: usize) -> usize {
        match depth {
            PixelDepth::Two => send_queue_depth,
            PixelDepth::Four => send_queue_depth / 2,
        }
    }

    /// Slot assigned to logical frame `frame`.
    #[inline]
    #[must_use]
    pub fn buffer_id(&self, frame: u64) -> usize {
        (frame % self.capacity as u64) as usize
    }

    /// Block until slot `buffer_id` is free for `frame`, then claim it.
    ///
    /// Waits on the pool's condition variable; the CPU is not spun. The slot
    /// is free for `frame` once no frame holds it and `frame - capacity` has
    /// been released.
    ///
    /// # Errors
    /// - [`PoolError::BufferIdOutOfRange`] if `buffer_id >= capacity`
    /// - [`PoolError::SlotMismatch`] if `frame` does not map to `buffer_id`
    /// - [`PoolError::FrameAlreadyClaimed`] if `frame` was already claimed
    pub fn acquire(&self, buffer_id: usize, frame: u64) -> Result<SlotLease<'_>, PoolError> {
        self.check_slot(buffer_id, frame)?;
        let mut occupancy = self.occupancy.lock();
        if !occupancy.ready(buffer_id, frame)? {
            debug!(
                buffer_id,
                frame,
                holder = ?occupancy.holders[buffer_id],
                "waiting for buffer to be released"
            );
            while !occupancy.ready(buffer_id, frame)? {
                self.released.wait(&mut occupancy);
            }
        }
        Ok(self.claim(&mut occupancy, buffer_id, frame))
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    ///
    /// Returns `Ok(None)` if the slot is still not free for `frame` when the
    /// timeout expires.
    pub fn acquire_timeout(
        &self,
        buffer_id: usize,
        frame: u64,
        timeout: Duration,
    ) -> Result<Option<SlotLease<'_>>, PoolError> {
        self.check_slot(buffer_id, frame)?;
        let mut occupancy = self.occupancy.lock();
        let deadline = std::time::Instant::now() + timeout;
        while !occupancy.ready(buffer_id, frame)? {
            if self.released.wait_until(&mut occupancy, deadline).timed_out()
                && !occupancy.ready(buffer_id, frame)?
            {
                return Ok(None);
            }
        }
        Ok(Some(self.claim(&mut occupancy, buffer_id, frame)))
    }

    fn check_slot(&self, buffer_id: usize, frame: u64) -> Result<(), PoolError> {
        if buffer_id >= self.capacity {
            return Err(PoolError::BufferIdOutOfRange {
                buffer_id,
                capacity: self.capacity,
            });
        }
        if self.buffer_id(frame) != buffer_id {
            return Err(PoolError::SlotMismatch { buffer_id, frame });
        }
        Ok(())
    }

    fn claim(&self, occupancy: &mut Occupancy, buffer_id: usize, frame: u64) -> SlotLease<'_> {
        occupancy.holders[buffer_id] = Some(frame);
        occupancy.next_frame[buffer_id] = frame + self.capacity as u64;
        let now = self.occupied.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_occupied.fetch_max(now, Ordering::AcqRel);
        self.total_acquires.fetch_add(1, Ordering::Relaxed);
        SlotLease {
            pool: self,
            buffer_id,
            frame,
            posted: false,
        }
    }

    /// Return an in-flight slot to the pool and wake every waiter.
    ///
    /// Called by the completion reclaimer once the transport confirmed the
    /// send. Returns the logical frame the slot carried. Releasing a slot
    /// that is not occupied is an error, which catches double completions.
    pub fn release(&self, buffer_id: usize) -> Result<u64, PoolError> {
        if buffer_id >= self.capacity {
            return Err(PoolError::BufferIdOutOfRange {
                buffer_id,
                capacity: self.capacity,
            });
        }
        let frame = {
            let mut occupancy = self.occupancy.lock();
            let frame = occupancy.holders[buffer_id]
                .take()
                .ok_or(PoolError::NotInFlight { buffer_id })?;
            self.occupied.fetch_sub(1, Ordering::AcqRel);
            frame
        };
        self.total_releases.fetch_add(1, Ordering::Relaxed);
        self.released.notify_all();
        Ok(frame)
    }

    /// Drop a claim that never reached the transport.
    ///
    /// The frame may claim the slot again.
    fn abandon(&self, buffer_id: usize) {
        {
            let mut occupancy = self.occupancy.lock();
            if let Some(frame) = occupancy.holders[buffer_id].take() {
                occupancy.next_frame[buffer_id] = frame;
                self.occupied.fetch_sub(1, Ordering::AcqRel);
            }
        }
        self.released.notify_all();
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of each slot in bytes.
    #[must_use]
    pub fn slot_bytes(&self) -> usize {
        self.slot_bytes
    }

    /// Address of the registered block, for memory registration.
    #[must_use]
    pub fn memory_base(&self) -> u64 {
        self.memory.base_addr()
    }

    /// Length of the registered block in bytes.
    #[must_use]
    pub fn memory_len(&self) -> usize {
        self.memory.len_bytes()
    }

    /// Slots currently leased or in flight.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Acquire)
    }

    /// Highest simultaneous occupancy seen.
    #[must_use]
    pub fn peak_occupied(&self) -> usize {
        self.peak_occupied.load(Ordering::Acquire)
    }

    /// Total successful acquisitions.
    #[must_use]
    pub fn total_acquires(&self) -> u64 {
        self.total_acquires.load(Ordering::Relaxed)
    }

    /// Total releases by the reclaimer.
    #[must_use]
    pub fn total_releases(&self) -> u64 {
        self.total_releases.load(Ordering::Relaxed)
    }
}

/// Per-slot claim state, guarded by the pool mutex.
#[derive(Debug)]
struct Occupancy {
    holders: Vec<Option<u64>>,
    next_frame: Vec<u64>,
}

impl Occupancy {
    fn new(capacity: usize) -> Self {
        Self {
            holders: vec![None; capacity],
            next_frame: (0..capacity as u64).collect(),
        }
    }

    /// Whether `frame` may claim `buffer_id` now.
    fn ready(&self, buffer_id: usize, frame: u64) -> Result<bool, PoolError> {
        let expected = self.next_frame[buffer_id];
        if frame < expected {
            return Err(PoolError::FrameAlreadyClaimed { frame, buffer_id });
        }
        Ok(self.holders[buffer_id].is_none() && frame == expected)
    }
}

/// Exclusive write access to one claimed slot.
///
/// Either posted to the transport with [`into_in_flight`](Self::into_in_flight)
/// or, if dropped, returned to the pool immediately.
#[derive(Debug)]
pub struct SlotLease<'a> {
    pool: &'a CompositePool,
    buffer_id: usize,
    frame: u64,
    posted: bool,
}

impl SlotLease<'_> {
    /// Slot index.
    #[must_use]
    pub fn buffer_id(&self) -> usize {
        self.buffer_id
    }

    /// Logical frame that claimed the slot.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    fn words_mut(&mut self) -> &mut [u32] {
        // SAFETY: The occupancy table holds Some(frame) for this slot and only
        // this lease exists for it; &mut self prevents a second view.
        unsafe { self.pool.memory.slot_mut(self.buffer_id) }
    }

    /// Slot memory as bytes.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(self.words_mut())
    }

    /// Slot memory as 16-bit pixels.
    pub fn as_i16_mut(&mut self) -> &mut [i16] {
        bytemuck::cast_slice_mut(self.words_mut())
    }

    /// Slot memory as 32-bit pixels.
    pub fn as_i32_mut(&mut self) -> &mut [i32] {
        bytemuck::cast_slice_mut(self.words_mut())
    }

    /// Hand the slot to the transport with a payload of `length` bytes.
    ///
    /// The slot stays occupied until [`CompositePool::release`].
    pub fn into_in_flight(mut self, length: usize) -> Result<InFlightSlot, PoolError> {
        if length > self.pool.slot_bytes {
            return Err(PoolError::PayloadTooLarge {
                length,
                capacity: self.pool.slot_bytes,
            });
        }
        self.posted = true;
        Ok(InFlightSlot {
            buffer_id: self.buffer_id,
            frame: self.frame,
            addr: self.pool.memory.slot_addr(self.buffer_id),
            length,
        })
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        if !self.posted {
            self.pool.abandon(self.buffer_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_pool_basic() {
        let pool = CompositePool::new(2, 16).unwrap();
        let mut lease = pool.acquire(0, 0).unwrap();
        lease.as_i16_mut()[3] = -7;
        let posted = lease.into_in_flight(16).unwrap();
        assert_eq!(posted.buffer_id, 0);
        assert_eq!(posted.addr, pool.memory_base());
        assert_eq!(pool.occupied(), 1);
        assert_eq!(pool.release(0).unwrap(), 0);
        assert_eq!(pool.occupied(), 0);
    }

    #[test]
    fn test_invalid_geometry() {
        assert!(CompositePool::new(0, 16).is_err());
        assert!(CompositePool::new(2, 0).is_err());
        assert!(CompositePool::new(2, 6).is_err());
    }

    #[test]
    fn test_capacity_halves_at_four_bytes() {
        assert_eq!(CompositePool::capacity_for(PixelDepth::Two, 32), 32);
        assert_eq!(CompositePool::capacity_for(PixelDepth::Four, 32), 16);
    }

    #[test]
    fn test_buffer_id_wraps() {
        let pool = CompositePool::new(4, 8).unwrap();
        assert_eq!(pool.buffer_id(0), 0);
        assert_eq!(pool.buffer_id(5), 1);
        assert_eq!(pool.buffer_id(11), 3);
    }

    #[test]
    fn test_dropped_lease_frees_slot() {
        let pool = CompositePool::new(1, 8).unwrap();
        drop(pool.acquire(0, 0).unwrap());
        assert_eq!(pool.occupied(), 0);
        // The abandoned frame claims the slot again before its successor.
        assert!(pool
            .acquire_timeout(0, 1, Duration::from_millis(10))
            .unwrap()
            .is_none());
        let posted = pool.acquire(0, 0).unwrap().into_in_flight(8).unwrap();
        pool.release(posted.buffer_id).unwrap();
        assert!(pool
            .acquire_timeout(0, 1, Duration::from_millis(10))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_double_release_detected() {
        let pool = CompositePool::new(1, 8).unwrap();
        let posted = pool.acquire(0, 0).unwrap().into_in_flight(8).unwrap();
        pool.release(posted.buffer_id).unwrap();
        assert_eq!(
            pool.release(posted.buffer_id),
            Err(PoolError::NotInFlight { buffer_id: 0 })
        );
        assert_eq!(pool.total_releases(), 1);
    }

    #[test]
    fn test_release_out_of_range() {
        let pool = CompositePool::new(1, 8).unwrap();
        assert!(matches!(
            pool.release(3),
            Err(PoolError::BufferIdOutOfRange { buffer_id: 3, .. })
        ));
    }

    #[test]
    fn test_acquire_rejects_bad_slot() {
        let pool = CompositePool::new(2, 8).unwrap();
        assert!(matches!(
            pool.acquire(2, 2),
            Err(PoolError::BufferIdOutOfRange {
                buffer_id: 2,
                capacity: 2
            })
        ));
        assert!(matches!(
            pool.acquire_timeout(1, 2, Duration::from_millis(1)),
            Err(PoolError::SlotMismatch {
                buffer_id: 1,
                frame: 2
            })
        ));
        assert_eq!(pool.occupied(), 0);
    }

    #[test]
    fn test_frame_cannot_claim_twice() {
        let pool = CompositePool::new(2, 8).unwrap();
        let posted = pool.acquire(1, 1).unwrap().into_in_flight(8).unwrap();
        pool.release(posted.buffer_id).unwrap();
        assert!(matches!(
            pool.acquire(1, 1),
            Err(PoolError::FrameAlreadyClaimed {
                frame: 1,
                buffer_id: 1
            })
        ));
    }

    #[test]
    fn test_payload_larger_than_slot_rejected() {
        let pool = CompositePool::new(1, 8).unwrap();
        let lease = pool.acquire(0, 0).unwrap();
        assert!(lease.into_in_flight(12).is_err());
        // Failed post drops the lease, freeing the slot.
        assert_eq!(pool.occupied(), 0);
    }

    #[test]
    fn test_acquire_timeout_expires_while_in_flight() {
        let pool = CompositePool::new(1, 8).unwrap();
        let _posted = pool.acquire(0, 0).unwrap().into_in_flight(8).unwrap();
        assert!(pool
            .acquire_timeout(0, 1, Duration::from_millis(10))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let pool = CompositePool::new(1, 8).unwrap();
        let posted = pool.acquire(0, 0).unwrap().into_in_flight(8).unwrap();

        thread::scope(|s| {
            let waiter = s.spawn(|| {
                let lease = pool.acquire(0, 1).unwrap();
                lease.frame()
            });
            thread::sleep(Duration::from_millis(20));
            assert!(!waiter.is_finished());
            pool.release(posted.buffer_id).unwrap();
            assert_eq!(waiter.join().unwrap(), 1);
        });
    }

    #[test]
    fn test_higher_frame_waits_for_lower_frame_on_free_slot() {
        let pool = CompositePool::new(2, 8).unwrap();

        thread::scope(|s| {
            let later = s.spawn(|| pool.acquire(0, 2).unwrap().frame());
            thread::sleep(Duration::from_millis(20));
            // Slot 0 is free but frame 0 has not claimed it yet.
            assert!(!later.is_finished());
            assert_eq!(pool.occupied(), 0);

            let posted = pool.acquire(0, 0).unwrap().into_in_flight(8).unwrap();
            thread::sleep(Duration::from_millis(20));
            assert!(!later.is_finished());

            assert_eq!(pool.release(posted.buffer_id).unwrap(), 0);
            assert_eq!(later.join().unwrap(), 2);
        });
    }

    #[test]
    fn test_slot_views_share_memory() {
        let pool = CompositePool::new(1, 8).unwrap();
        let mut lease = pool.acquire(0, 0).unwrap();
        lease.as_i32_mut()[0] = 0x0102_0304;
        assert_eq!(&lease.bytes_mut()[..4], &0x0102_0304i32.to_ne_bytes());
    }
}
