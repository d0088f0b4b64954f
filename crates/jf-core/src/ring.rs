//! Raw frame ring.
//!
//! Circular buffer of raw frames indexed by `absolute_frame % capacity`.
//! Each slot remembers which absolute frame it holds, so a reader that
//! arrives after the capture side has lapped the ring gets `None` instead
//! of silently reading the newer frame.
//!
//! Slots are guarded by a `parking_lot::RwLock`. The capture side takes the
//! write lock only while filling a slot, and workers summing several frames
//! hold several read guards at once.

use crate::error::{CoreError, CoreResult};
use crate::layout::DetectorLayout;
use parking_lot::{RwLock, RwLockReadGuard};
use std::ops::Deref;

#[derive(Debug)]
struct RawSlot {
    frame: Option<u64>,
    pixels: Box<[i16]>,
}

/// Ring of raw module frames shared between capture and workers.
#[derive(Debug)]
pub struct RawFrameRing {
    slots: Box<[RwLock<RawSlot>]>,
    frame_pixels: usize,
}

impl RawFrameRing {
    /// Allocate `capacity` zeroed frames for `layout`.
    pub fn new(layout: &DetectorLayout, capacity: usize) -> CoreResult<Self> {
        if capacity == 0 {
            return Err(CoreError::EmptyRing);
        }
        let frame_pixels = layout.raw_frame_pixels();
        let slots = (0..capacity)
            .map(|_| {
                RwLock::new(RawSlot {
                    frame: None,
                    pixels: vec![0i16; frame_pixels].into_boxed_slice(),
                })
            })
            .collect();

        tracing::debug!(
            capacity,
            frame_mb = (frame_pixels * 2) as f64 / (1024.0 * 1024.0),
            "raw frame ring allocated"
        );

        Ok(Self {
            slots,
            frame_pixels,
        })
    }

    /// Number of frames the ring holds.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Pixels per frame.
    #[must_use]
    pub fn frame_pixels(&self) -> usize {
        self.frame_pixels
    }

    fn slot(&self, frame: u64) -> &RwLock<RawSlot> {
        &self.slots[(frame % self.slots.len() as u64) as usize]
    }

    /// Fill the slot for absolute frame `frame` (capture side).
    ///
    /// The closure receives the slot pixels, module-major. The slot is tagged
    /// with `frame` once the closure returns.
    pub fn write_with<F>(&self, frame: u64, fill: F)
    where
        F: FnOnce(&mut [i16]),
    {
        let mut slot = self.slot(frame).write();
        fill(&mut slot.pixels);
        slot.frame = Some(frame);
    }

    /// Read absolute frame `frame`.
    ///
    /// Returns `None` if the slot holds a different frame (not yet written, or
    /// already overwritten by a later lap).
    #[must_use]
    pub fn read(&self, frame: u64) -> Option<RawFrameRef<'_>> {
        let guard = self.slot(frame).read();
        if guard.frame == Some(frame) {
            Some(RawFrameRef { guard })
        } else {
            None
        }
    }
}

/// Shared borrow of one raw frame. Derefs to the module-major pixels.
pub struct RawFrameRef<'a> {
    guard: RwLockReadGuard<'a, RawSlot>,
}

impl RawFrameRef<'_> {
    /// Absolute frame index held by this slot.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.guard.frame.unwrap_or_default()
    }
}

impl Deref for RawFrameRef<'_> {
    type Target = [i16];

    fn deref(&self) -> &Self::Target {
        &self.guard.pixels
    }
}

impl std::fmt::Debug for RawFrameRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrameRef")
            .field("frame", &self.frame())
            .field("pixels", &self.guard.pixels.len())
            .finish()
    }
}
