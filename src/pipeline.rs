//! Frame worker pipeline.
//!
//! One run spawns `workers` frame workers plus a completion reclaimer (and,
//! with the GPU gate enabled, a stream consumer) inside a
//! [`std::thread::scope`]. Worker `w` handles output frames
//! `w, w + workers, w + 2 * workers, ...`:
//!
//! ```text
//! trigger latch -> [gpu gate] -> pool acquire -> wait for sources
//!     -> transform into slot -> post_send -> (reclaimer) -> pool release
//! ```
//!
//! Any thread that fails raises the shared cancel flag; every blocking wait
//! checks it, so the whole run winds down and the first real error is
//! returned.

use crate::capture::ConsumerCursor;
use crate::error::{PipelineError, PipelineResult};
use crate::gpu_gate::{frames_per_stream, GateCursor, GpuStreamGate};
use crate::trigger::TriggerSynchronizer;
use jf_core::limits::{
    AVAILABILITY_MARGIN_FRAMES, AVAILABILITY_POLL_INTERVAL, CANCEL_CHECK_INTERVAL,
    DEFAULT_FRAMES_PER_STREAM, PROGRESS_LOG_INTERVAL,
};
use jf_core::{
    poll_until, CoreError, DetectorLayout, ExperimentSettings, FrameTracker, OnlineStatistics,
    PollPolicy, RawFrameRef, RawFrameRing,
};
use jf_pool::{CompositePool, SlotLease};
use jf_transform::Transform;
use jf_transport::{CompletionReclaimer, EndpointParams, QueuePair, SubmitErrorPolicy, Transmitter};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// GPU stream gate settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuGateOptions {
    /// Stream slots; bounds how many slices may be prepared ahead.
    pub streams: usize,
    /// Output frames per slice at 2-byte depth.
    pub frames_per_stream: u64,
}

impl Default for GpuGateOptions {
    fn default() -> Self {
        Self {
            streams: 4,
            frames_per_stream: DEFAULT_FRAMES_PER_STREAM,
        }
    }
}

/// Local knobs for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Frame worker threads.
    pub workers: usize,
    /// Give up waiting for the trigger after this long.
    pub trigger_deadline: Option<Duration>,
    /// Give up waiting for a source frame after this long.
    pub source_deadline: Option<Duration>,
    /// Sleep between source readiness probes.
    pub availability_poll: Duration,
    /// Handling of rejected sends.
    pub submit_policy: SubmitErrorPolicy,
    /// GPU stream gate, if enabled.
    pub gpu: Option<GpuGateOptions>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            trigger_deadline: None,
            source_deadline: None,
            availability_poll: AVAILABILITY_POLL_INTERVAL,
            submit_policy: SubmitErrorPolicy::default(),
            gpu: None,
        }
    }
}

/// Capture-side state a run reads from.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Detector geometry.
    pub layout: DetectorLayout,
    /// Validated experiment settings.
    pub settings: ExperimentSettings,
    /// Capture counters.
    pub stats: Arc<OnlineStatistics>,
    /// Raw frames.
    pub ring: Arc<RawFrameRing>,
    /// Worker read positions, fed back to capture.
    pub cursor: Arc<ConsumerCursor>,
}

impl RunContext {
    /// Bundle capture state for a run with `workers` workers.
    #[must_use]
    pub fn new(
        layout: DetectorLayout,
        settings: ExperimentSettings,
        stats: Arc<OnlineStatistics>,
        ring: Arc<RawFrameRing>,
        workers: usize,
    ) -> Self {
        Self {
            layout,
            settings,
            stats,
            ring,
            cursor: Arc::new(ConsumerCursor::new(workers)),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Capture frame at which the trigger was observed.
    pub trigger_frame: u64,
    /// Output frames posted.
    pub frames_sent: u64,
    /// Output frames sent zero-filled because their sources were never collected.
    pub blank_frames: u64,
    /// Completions reclaimed.
    pub completions: u64,
    /// Times a post found the send queue full.
    pub queue_full_retries: u64,
    /// Most pool slots occupied at once.
    pub peak_buffers: usize,
    /// Slices processed by the GPU stream consumer.
    pub gpu_slices: Option<u64>,
    /// Wall time from first worker start to last completion.
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct WorkerTally {
    sent: u64,
    blank: u64,
}

/// A configured run, ready to start.
pub struct Pipeline {
    ctx: RunContext,
    options: PipelineOptions,
    transform: Transform,
    tracker: FrameTracker,
    pool: Arc<CompositePool>,
    qp: Arc<dyn QueuePair>,
    transmitter: Transmitter,
    rkey: u32,
}

impl Pipeline {
    /// Validate the run, allocate and register the buffer pool.
    pub fn new(
        ctx: RunContext,
        options: PipelineOptions,
        qp: Arc<dyn QueuePair>,
        send_queue_depth: usize,
    ) -> PipelineResult<Self> {
        ctx.settings.validate()?;
        let transform = Transform::select(&ctx.settings)?;

        if options.workers == 0 {
            return Err(PipelineError::Configuration("workers must be > 0".into()));
        }
        if ctx.cursor.workers() != options.workers {
            return Err(PipelineError::Configuration(format!(
                "read cursor tracks {} workers, run has {}",
                ctx.cursor.workers(),
                options.workers
            )));
        }
        if ctx.stats.modules() != ctx.layout.modules() {
            return Err(PipelineError::Configuration(format!(
                "capture reports {} modules, layout has {}",
                ctx.stats.modules(),
                ctx.layout.modules()
            )));
        }
        if ctx.ring.frame_pixels() != ctx.layout.raw_frame_pixels() {
            return Err(PipelineError::Configuration(format!(
                "raw ring frames hold {} pixels, layout needs {}",
                ctx.ring.frame_pixels(),
                ctx.layout.raw_frame_pixels()
            )));
        }
        let min_ring = min_ring_frames(ctx.settings.summation);
        if (ctx.ring.capacity() as u64) < min_ring {
            return Err(PipelineError::Configuration(format!(
                "raw ring holds {} frames, summation {} needs at least {min_ring}",
                ctx.ring.capacity(),
                ctx.settings.summation
            )));
        }

        let pool = CompositePool::for_run(&ctx.layout, &ctx.settings, send_queue_depth)?;
        let lkey = qp.register_memory(pool.memory_base(), pool.memory_len())?;
        let transmitter = Transmitter::new(qp.clone(), lkey, options.submit_policy);
        let tracker = FrameTracker::new(ctx.stats.clone(), ctx.settings.nframes_to_collect);

        info!(
            ?transform,
            workers = options.workers,
            buffers = pool.capacity(),
            payload_bytes = transform.payload_bytes(&ctx.layout),
            gpu = options.gpu.is_some(),
            "pipeline configured"
        );

        Ok(Self {
            ctx,
            options,
            transform,
            tracker,
            pool,
            qp,
            transmitter,
            rkey: lkey.0,
        })
    }

    /// Override the post retry delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.transmitter = self.transmitter.with_retry_delay(delay);
        self
    }

    /// Transform selected for this run.
    #[must_use]
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// The run's buffer pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<CompositePool> {
        &self.pool
    }

    /// Connection parameters for the peer, including the pool's memory key.
    #[must_use]
    pub fn local_endpoint(&self) -> EndpointParams {
        EndpointParams {
            rkey: self.rkey,
            remote_addr: self.pool.memory_base(),
            ..self.qp.local_endpoint()
        }
    }

    /// Run to completion.
    ///
    /// `cancel` may be raised from outside to stop the run; it is also
    /// raised internally when any thread fails.
    pub fn run(&self, cancel: &AtomicBool) -> PipelineResult<RunSummary> {
        let settings = &self.ctx.settings;
        let workers = self.options.workers;
        let started = Instant::now();

        let sync = TriggerSynchronizer::new(
            self.ctx.stats.clone(),
            settings.clone(),
            self.options.trigger_deadline,
        );
        let gate = self
            .options
            .gpu
            .map(|gpu| {
                GpuStreamGate::new(
                    gpu.streams,
                    frames_per_stream(gpu.frames_per_stream, settings.pixel_depth),
                    workers,
                    settings.nframes_to_write,
                )
            })
            .transpose()?;

        info!(
            frames = settings.nframes_to_write,
            workers, "run started"
        );

        let outcome = thread::scope(|s| -> PipelineResult<(Vec<WorkerTally>, u64, Option<u64>)> {
            let reclaimer = CompletionReclaimer::new(self.qp.clone(), self.pool.clone());
            let reclaim_handle = thread::Builder::new()
                .name("completion-reclaimer".into())
                .spawn_scoped(s, move || {
                    let result = reclaimer.run(settings.nframes_to_write, cancel);
                    if result.is_err() {
                        cancel.store(true, Ordering::Release);
                    }
                    result
                });
            let reclaim_handle = match reclaim_handle {
                Ok(handle) => handle,
                Err(e) => {
                    cancel.store(true, Ordering::Release);
                    return Err(e.into());
                }
            };

            let gate_handle = match gate.as_ref() {
                Some(gate) => Some(
                    thread::Builder::new()
                        .name("gpu-stream-consumer".into())
                        .spawn_scoped(s, move || {
                            let result = gate.drive(cancel, |slice| debug!(slice, "GPU slice complete"));
                            if result.is_err() {
                                cancel.store(true, Ordering::Release);
                            }
                            result
                        })
                        .inspect_err(|_| cancel.store(true, Ordering::Release))?,
                ),
                None => None,
            };

            let mut worker_handles = Vec::with_capacity(workers);
            for worker in 0..workers {
                let sync = &sync;
                let gate = gate.as_ref();
                let handle = thread::Builder::new()
                    .name(format!("frame-worker-{worker}"))
                    .spawn_scoped(s, move || self.run_worker(worker, sync, gate, cancel));
                match handle {
                    Ok(handle) => worker_handles.push(handle),
                    Err(e) => {
                        cancel.store(true, Ordering::Release);
                        return Err(e.into());
                    }
                }
            }

            let mut first_error: Option<PipelineError> = None;
            let mut keep = |err: PipelineError| {
                let replace = first_error
                    .as_ref()
                    .map_or(true, |existing| existing.is_cancellation() && !err.is_cancellation());
                if replace {
                    first_error = Some(err);
                }
            };

            let mut tallies = Vec::with_capacity(workers);
            for (worker, handle) in worker_handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(Ok(tally)) => tallies.push(tally),
                    Ok(Err(e)) => keep(e),
                    Err(_) => {
                        cancel.store(true, Ordering::Release);
                        keep(PipelineError::ThreadPanicked(format!("frame-worker-{worker}")));
                    }
                }
            }

            let completions = match reclaim_handle.join() {
                Ok(Ok(summary)) => {
                    if summary.cancelled {
                        keep(PipelineError::Cancelled);
                    }
                    summary.completed
                }
                Ok(Err(e)) => {
                    keep(e.into());
                    0
                }
                Err(_) => {
                    keep(PipelineError::ThreadPanicked("completion-reclaimer".into()));
                    0
                }
            };

            let gpu_slices = match gate_handle.map(|h| h.join()) {
                None => None,
                Some(Ok(Ok(slices))) => Some(slices),
                Some(Ok(Err(e))) => {
                    keep(e);
                    None
                }
                Some(Err(_)) => {
                    keep(PipelineError::ThreadPanicked("gpu-stream-consumer".into()));
                    None
                }
            };

            match first_error {
                Some(err) => Err(err),
                None => Ok((tallies, completions, gpu_slices)),
            }
        });

        let (tallies, completions, gpu_slices) = match outcome {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "run failed");
                return Err(e);
            }
        };

        let summary = RunSummary {
            trigger_frame: sync.trigger_frame().unwrap_or_default(),
            frames_sent: tallies.iter().map(|t| t.sent).sum(),
            blank_frames: tallies.iter().map(|t| t.blank).sum(),
            completions,
            queue_full_retries: self.transmitter.queue_full_retries(),
            peak_buffers: self.pool.peak_occupied(),
            gpu_slices,
            elapsed: started.elapsed(),
        };
        info!(
            frames = summary.frames_sent,
            blank = summary.blank_frames,
            trigger_frame = summary.trigger_frame,
            peak_buffers = summary.peak_buffers,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "run finished"
        );
        Ok(summary)
    }

    fn run_worker(
        &self,
        worker: usize,
        sync: &TriggerSynchronizer,
        gate: Option<&GpuStreamGate>,
        cancel: &AtomicBool,
    ) -> PipelineResult<WorkerTally> {
        let mut gate_cursor = GateCursor::new();
        let result = self.worker_loop(worker, sync, gate, &mut gate_cursor, cancel);
        self.ctx.cursor.finish(worker);
        if let Some(gate) = gate {
            gate_cursor.finish(gate);
        }
        match &result {
            Ok(tally) => debug!(worker, sent = tally.sent, "worker finished"),
            Err(e) if e.is_cancellation() => debug!(worker, "worker cancelled"),
            Err(e) => {
                error!(worker, error = %e, "worker failed");
                cancel.store(true, Ordering::Release);
            }
        }
        result
    }

    fn worker_loop(
        &self,
        worker: usize,
        sync: &TriggerSynchronizer,
        gate: Option<&GpuStreamGate>,
        gate_cursor: &mut GateCursor,
        cancel: &AtomicBool,
    ) -> PipelineResult<WorkerTally> {
        let settings = &self.ctx.settings;
        let trigger = sync.await_trigger(worker, cancel)?;
        let mut tally = WorkerTally::default();

        for frame in (worker as u64..settings.nframes_to_write).step_by(self.options.workers) {
            let collected = settings.collected_frame(frame, trigger);
            self.ctx.cursor.set(worker, collected);

            if let Some(gate) = gate {
                gate_cursor.advance(gate, frame, cancel)?;
            }

            let mut lease = self.acquire(frame, cancel)?;
            self.wait_for_sources(frame, trigger, cancel)?;

            let length = match self.read_sources(collected)? {
                Some(sources) => {
                    let pixels: Vec<&[i16]> = sources.iter().map(|s| &**s).collect();
                    self.transform.apply(&self.ctx.layout, &pixels, lease.bytes_mut())?
                }
                None => {
                    if tally.blank == 0 {
                        warn!(
                            worker,
                            frame,
                            collected,
                            nframes_to_collect = settings.nframes_to_collect,
                            "sources beyond collected frames, sending blank images"
                        );
                    }
                    tally.blank += 1;
                    let length = self.transform.payload_bytes(&self.ctx.layout);
                    lease.bytes_mut()[..length].fill(0);
                    length
                }
            };

            let slot = lease.into_in_flight(length)?;
            self.transmitter.post_send(&slot)?;
            tally.sent += 1;
        }
        Ok(tally)
    }

    /// Claim the pool slot for `frame`, waking periodically for `cancel`.
    ///
    /// Claims on a slot follow frame order, so this also waits for every
    /// lower frame sharing the slot to be sent and completed.
    fn acquire(&self, frame: u64, cancel: &AtomicBool) -> PipelineResult<SlotLease<'_>> {
        let buffer_id = self.pool.buffer_id(frame);
        loop {
            if cancel.load(Ordering::Acquire) {
                return Err(PipelineError::Cancelled);
            }
            if let Some(lease) = self.pool.acquire_timeout(buffer_id, frame, CANCEL_CHECK_INTERVAL)? {
                return Ok(lease);
            }
        }
    }

    /// Wait until every module is a safety margin past the last source frame.
    fn wait_for_sources(&self, frame: u64, trigger: u64, cancel: &AtomicBool) -> PipelineResult<()> {
        let settings = &self.ctx.settings;
        let needed = settings.last_source_frame(frame, trigger) + AVAILABILITY_MARGIN_FRAMES;
        let policy = PollPolicy::every(self.options.availability_poll)
            .with_deadline(self.options.source_deadline);

        let availability = poll_until(&policy, "source frame", || {
            if cancel.load(Ordering::Acquire) {
                return Some(Err(PipelineError::Cancelled));
            }
            let availability = self.tracker.latest_common_frame();
            availability.covers(needed).then_some(Ok(availability))
        })
        .map_err(|e| match e {
            CoreError::PollTimeout { waited, .. } => PipelineError::SourceTimeout {
                frame: needed,
                waited,
            },
            other => PipelineError::Core(other),
        })??;

        if frame % PROGRESS_LOG_INTERVAL == 0 {
            let stats = self.tracker.stats();
            info!(
                frame,
                backlog = availability.backlog(needed),
                heads = ?stats.heads(),
                good_packets = stats.good_packets(),
                buffers_in_use = self.pool.occupied(),
                "progress"
            );
        }
        Ok(())
    }

    /// Lock the source frames starting at `collected`.
    ///
    /// Returns `None` if a source lies beyond the frames capture collects.
    /// A missing frame that should have been collected was overwritten.
    fn read_sources(&self, collected: u64) -> PipelineResult<Option<Vec<RawFrameRef<'_>>>> {
        let count = self.transform.source_frames() as u64;
        let mut sources = Vec::with_capacity(count as usize);
        for raw in collected..collected + count {
            match self.ctx.ring.read(raw) {
                Some(source) => sources.push(source),
                None if raw >= self.ctx.settings.nframes_to_collect => return Ok(None),
                None => return Err(PipelineError::SourceOverrun { frame: raw }),
            }
        }
        Ok(Some(sources))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("transform", &self.transform)
            .field("options", &self.options)
            .field("pool", &self.pool)
            .field("transmitter", &self.transmitter)
            .finish_non_exhaustive()
    }
}

/// Smallest raw ring that can hold one output frame's sources plus the
/// readiness margin.
#[must_use]
pub fn min_ring_frames(summation: u32) -> u64 {
    u64::from(summation.max(1)) + AVAILABILITY_MARGIN_FRAMES + 1
}
