//! Mock capture.
//!
//! Produces a deterministic stream of raw frames on a dedicated thread:
//!
//! - every pixel is `baseline` plus pseudo-random noise in `±spread`
//! - the first pixel of each module carries the frame number (mod 30000)
//! - one pixel per module per frame is marked bad and one overloaded
//!
//! The trigger position is published when frame `trigger_at` is written.
//! Production pauses whenever the next frame would overwrite a ring slot a
//! worker still needs (see [`ConsumerCursor`]).

use super::ConsumerCursor;
use jf_core::layout::MODULE_PIXELS;
use jf_core::limits::AVAILABILITY_POLL_INTERVAL;
use jf_core::{DetectorLayout, OnlineStatistics, RawFrameRing};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// UDP packets per module per frame on the real detector.
pub const PACKETS_PER_MODULE_FRAME: u64 = 128;

/// Mock capture settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MockCaptureConfig {
    /// Delay between frames; zero produces as fast as the ring allows.
    #[serde(with = "humantime_serde")]
    pub frame_interval: Duration,
    /// Frame at which the trigger fires.
    pub trigger_at: u64,
    /// Noise seed.
    pub seed: u64,
    /// Mean pixel value.
    pub baseline: i16,
    /// Noise amplitude.
    pub spread: i16,
}

impl Default for MockCaptureConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::ZERO,
            trigger_at: 0,
            seed: 0x5eed,
            baseline: 1000,
            spread: 200,
        }
    }
}

#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407)
        >> 33
}

/// Fill `pixels` with mock frame `frame`, module-major.
pub fn pattern_frame(config: &MockCaptureConfig, layout: &DetectorLayout, frame: u64, pixels: &mut [i16]) {
    let span = 2 * i64::from(config.spread.max(0)) + 1;
    let frame_seed = config.seed ^ frame.wrapping_mul(2_654_435_761);

    for (module, module_pixels) in pixels
        .chunks_exact_mut(MODULE_PIXELS)
        .take(layout.modules())
        .enumerate()
    {
        let module_seed = frame_seed ^ ((module as u64) << 48);
        for (idx, pixel) in module_pixels.iter_mut().enumerate() {
            let noise = (prng(module_seed ^ idx as u64) % span as u64) as i64 - i64::from(config.spread.max(0));
            *pixel = (i64::from(config.baseline) + noise).clamp(-32_000, 32_000) as i16;
        }

        module_pixels[0] = (frame % 30_000) as i16;
        let marked = (prng(module_seed) as usize) % (MODULE_PIXELS - 2) + 1;
        module_pixels[marked] = i16::MIN;
        module_pixels[marked + 1] = i16::MAX;
    }
}

/// Outcome of a capture run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Frames written to the ring.
    pub frames_written: u64,
    /// Times production paused for a slow worker.
    pub throttled: u64,
    /// Stopped before the last frame.
    pub stopped: bool,
}

/// In-process capture producing [`pattern_frame`] frames.
#[derive(Debug)]
pub struct MockCapture {
    config: MockCaptureConfig,
    layout: DetectorLayout,
    nframes_to_collect: u64,
    stats: Arc<OnlineStatistics>,
    ring: Arc<RawFrameRing>,
    cursor: Arc<ConsumerCursor>,
}

impl MockCapture {
    /// Capture `nframes_to_collect` frames into `ring`.
    #[must_use]
    pub fn new(
        config: MockCaptureConfig,
        layout: DetectorLayout,
        nframes_to_collect: u64,
        stats: Arc<OnlineStatistics>,
        ring: Arc<RawFrameRing>,
        cursor: Arc<ConsumerCursor>,
    ) -> Self {
        Self {
            config,
            layout,
            nframes_to_collect,
            stats,
            ring,
            cursor,
        }
    }

    /// Run on a thread named `mock-capture`.
    pub fn spawn(self, stop: Arc<AtomicBool>) -> std::io::Result<thread::JoinHandle<CaptureSummary>> {
        thread::Builder::new()
            .name("mock-capture".into())
            .spawn(move || self.run(&stop))
    }

    /// Whether writing `frame` keeps every frame a worker still needs.
    fn may_write(&self, frame: u64) -> bool {
        let floor = self.cursor.low_watermark().max(self.config.trigger_at);
        frame < floor.saturating_add(self.ring.capacity() as u64)
    }

    /// Produce frames until done or until `stop` is set.
    pub fn run(&self, stop: &AtomicBool) -> CaptureSummary {
        let mut summary = CaptureSummary::default();
        let modules = self.layout.modules();
        info!(
            frames = self.nframes_to_collect,
            trigger_at = self.config.trigger_at,
            modules,
            "mock capture started"
        );

        for frame in 0..self.nframes_to_collect {
            let mut throttled = false;
            while !self.may_write(frame) {
                if stop.load(Ordering::Acquire) {
                    summary.stopped = true;
                    return summary;
                }
                throttled = true;
                thread::sleep(AVAILABILITY_POLL_INTERVAL);
            }
            if stop.load(Ordering::Acquire) {
                summary.stopped = true;
                return summary;
            }
            if throttled {
                summary.throttled += 1;
            }

            self.ring
                .write_with(frame, |pixels| pattern_frame(&self.config, &self.layout, frame, pixels));
            if frame == self.config.trigger_at {
                self.stats.set_trigger_position(frame);
                debug!(frame, "mock trigger fired");
            }
            for module in 0..modules {
                self.stats.advance_head(module, frame);
            }
            self.stats
                .add_good_packets(PACKETS_PER_MODULE_FRAME * modules as u64);
            summary.frames_written += 1;

            if !self.config.frame_interval.is_zero() {
                thread::sleep(self.config.frame_interval);
            }
        }

        info!(
            frames = summary.frames_written,
            throttled = summary.throttled,
            "mock capture finished"
        );
        summary
    }
}
