//! Full pipeline runs against the mock capture and the loopback fabric.
//!
//! Payloads are checked against the transform applied independently to the
//! same pattern frames, so any mix-up of frame numbers, slots or source
//! frames shows up as a byte mismatch.

use jf_core::{ConversionMode, DetectorLayout, ExperimentSettings, OnlineStatistics, PixelDepth, RawFrameRing};
use jf_transform::Transform;
use jf_transport::{CompletionStatus, LoopbackQueuePair, ReceivedFrame, SubmitErrorPolicy, TransportError};
use jfstream::capture::{pattern_frame, MockCapture, MockCaptureConfig};
use jfstream::{GpuGateOptions, Pipeline, PipelineError, PipelineOptions, RunContext, RunSummary};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

const MODULES: usize = 2;

fn settings(summation: u32, collect: u64, write: u64, pedestal: u64) -> ExperimentSettings {
    ExperimentSettings {
        conversion_mode: ConversionMode::Converted,
        pixel_depth: if summation == 1 { PixelDepth::Two } else { PixelDepth::Four },
        summation,
        nframes_to_collect: collect,
        nframes_to_write: write,
        pedestal_g0_frames: pedestal,
    }
}

fn options(workers: usize) -> PipelineOptions {
    PipelineOptions {
        workers,
        availability_poll: Duration::from_micros(100),
        trigger_deadline: Some(Duration::from_secs(20)),
        source_deadline: Some(Duration::from_secs(20)),
        ..PipelineOptions::default()
    }
}

struct Outcome {
    summary: Result<RunSummary, PipelineError>,
    received: BTreeMap<u32, ReceivedFrame>,
}

/// Run a pipeline fed by a mock capture thread and collect every delivered frame.
fn run_with_capture(
    settings: ExperimentSettings,
    options: PipelineOptions,
    ring_frames: usize,
    send_queue_depth: usize,
    capture: MockCaptureConfig,
) -> Outcome {
    let layout = DetectorLayout::new(MODULES).unwrap();
    let stats = Arc::new(OnlineStatistics::new(MODULES));
    let ring = Arc::new(RawFrameRing::new(&layout, ring_frames).unwrap());
    let ctx = RunContext::new(layout, settings.clone(), stats.clone(), ring.clone(), options.workers);
    let cursor = ctx.cursor.clone();

    let (tx, rx) = mpsc::channel();
    let qp = Arc::new(LoopbackQueuePair::new(send_queue_depth).with_sink(tx));
    let pipeline = Pipeline::new(ctx, options, qp, send_queue_depth).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let producer = MockCapture::new(capture, layout, settings.nframes_to_collect, stats, ring, cursor)
        .spawn(stop.clone())
        .unwrap();

    let summary = pipeline.run(&AtomicBool::new(false));
    stop.store(true, Ordering::Release);
    producer.join().unwrap();
    drop(pipeline);

    let received = rx.into_iter().map(|f| (f.frame, f)).collect();
    Outcome { summary, received }
}

fn expected_payload(
    settings: &ExperimentSettings,
    capture: &MockCaptureConfig,
    frame: u64,
    trigger: u64,
) -> Vec<u8> {
    let layout = DetectorLayout::new(MODULES).unwrap();
    let transform = Transform::select(settings).unwrap();
    let first = settings.collected_frame(frame, trigger);
    let sources: Vec<Vec<i16>> = (first..first + transform.source_frames() as u64)
        .map(|raw| {
            let mut pixels = vec![0i16; layout.raw_frame_pixels()];
            pattern_frame(capture, &layout, raw, &mut pixels);
            pixels
        })
        .collect();
    let refs: Vec<&[i16]> = sources.iter().map(Vec::as_slice).collect();

    let mut words = vec![0u32; transform.payload_bytes(&layout).div_ceil(4)];
    let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut words);
    let len = transform.apply(&layout, &refs, bytes).unwrap();
    bytes[..len].to_vec()
}

#[test]
fn corrected_frames_match_independent_transform() {
    let settings = settings(1, 40, 12, 0);
    let capture = MockCaptureConfig {
        frame_interval: Duration::from_micros(500),
        ..MockCaptureConfig::default()
    };
    let outcome = run_with_capture(settings.clone(), options(3), 6, 4, capture.clone());
    let summary = outcome.summary.unwrap();

    assert_eq!(summary.frames_sent, 12);
    assert_eq!(summary.completions, 12);
    assert_eq!(summary.blank_frames, 0);
    assert_eq!(summary.trigger_frame, 0);
    assert!(summary.peak_buffers <= 4);
    assert_eq!(outcome.received.keys().copied().collect::<Vec<_>>(), (0..12u32).collect::<Vec<_>>());

    for (&frame, delivered) in &outcome.received {
        let expected = expected_payload(&settings, &capture, u64::from(frame), 0);
        assert_eq!(delivered.data.len(), expected.len());
        assert!(delivered.data[..] == expected[..], "frame {frame} differs");
    }
}

#[test]
fn summed_frames_start_at_trigger() {
    let settings = settings(3, 60, 8, 5);
    let capture = MockCaptureConfig {
        trigger_at: 7,
        ..MockCaptureConfig::default()
    };
    let outcome = run_with_capture(settings.clone(), options(2), 8, 4, capture.clone());
    let summary = outcome.summary.unwrap();

    assert_eq!(summary.trigger_frame, 7);
    assert_eq!(summary.frames_sent, 8);
    for (&frame, delivered) in &outcome.received {
        let expected = expected_payload(&settings, &capture, u64::from(frame), 7);
        assert!(delivered.data[..] == expected[..], "frame {frame} differs");
    }
}

#[test]
fn late_trigger_sends_blank_tail() {
    let settings = settings(2, 40, 6, 30);
    let capture = MockCaptureConfig {
        trigger_at: 30,
        ..MockCaptureConfig::default()
    };
    let outcome = run_with_capture(settings.clone(), options(1), 8, 4, capture.clone());
    let summary = outcome.summary.unwrap();

    assert_eq!(summary.trigger_frame, 30);
    assert_eq!(summary.frames_sent, 6);
    assert_eq!(summary.blank_frames, 1);

    let last = &outcome.received[&5];
    assert!(last.data.iter().all(|&b| b == 0));
    let fourth = &outcome.received[&4];
    assert!(fourth.data[..] == expected_payload(&settings, &capture, 4, 30)[..]);
}

#[test]
fn gpu_gate_run_processes_every_slice() {
    let settings = settings(1, 40, 10, 0);
    let options = PipelineOptions {
        gpu: Some(GpuGateOptions {
            streams: 2,
            frames_per_stream: 3,
        }),
        ..options(2)
    };
    let outcome = run_with_capture(settings, options, 6, 4, MockCaptureConfig::default());
    let summary = outcome.summary.unwrap();
    assert_eq!(summary.frames_sent, 10);
    assert_eq!(summary.gpu_slices, Some(4));
}

#[test]
fn single_slot_pool_shared_by_two_workers_completes() {
    // Summed frames at depth 2 leave one pool slot for both workers, and the
    // ring is only as large as the sources plus the readiness margin.
    let settings = settings(2, 60, 10, 0);
    let options = PipelineOptions {
        source_deadline: Some(Duration::from_secs(5)),
        ..options(2)
    };
    for _ in 0..5 {
        let outcome = run_with_capture(
            settings.clone(),
            options.clone(),
            6,
            2,
            MockCaptureConfig::default(),
        );
        let summary = outcome.summary.unwrap();
        assert_eq!(summary.frames_sent, 10);
        assert_eq!(summary.completions, 10);
        assert_eq!(summary.peak_buffers, 1);
        assert_eq!(outcome.received.len(), 10);
    }
}

/// Fill `frames` into the ring by hand and publish them as produced.
fn prefilled(settings: &ExperimentSettings, ring_frames: usize, frames: u64, workers: usize) -> RunContext {
    let layout = DetectorLayout::new(MODULES).unwrap();
    let stats = Arc::new(OnlineStatistics::new(MODULES));
    let ring = Arc::new(RawFrameRing::new(&layout, ring_frames).unwrap());
    let config = MockCaptureConfig::default();
    for frame in 0..frames {
        ring.write_with(frame, |pixels| pattern_frame(&config, &layout, frame, pixels));
        for module in 0..MODULES {
            stats.advance_head(module, frame);
        }
    }
    RunContext::new(layout, settings.clone(), stats, ring, workers)
}

#[test]
fn overwritten_source_is_detected() {
    let settings = settings(1, 20, 4, 0);
    let ctx = prefilled(&settings, 5, 11, 1);
    let qp = Arc::new(LoopbackQueuePair::new(4));
    let pipeline = Pipeline::new(ctx, options(1), qp, 4).unwrap();

    assert!(matches!(
        pipeline.run(&AtomicBool::new(false)),
        Err(PipelineError::SourceOverrun { frame: 0 })
    ));
}

#[test]
fn sources_wait_for_readiness_margin() {
    // Frame 0 needs raw frame 0 plus a margin of three frames behind the heads.
    let settings = settings(1, 20, 1, 0);
    let ctx = prefilled(&settings, 8, 3, 1);
    let (stats, ring, layout) = (ctx.stats.clone(), ctx.ring.clone(), ctx.layout);
    let qp = Arc::new(LoopbackQueuePair::new(4));
    let pipeline = Pipeline::new(ctx, options(1), qp.clone(), 4).unwrap();

    let summary = std::thread::scope(|s| {
        let run = s.spawn(|| pipeline.run(&AtomicBool::new(false)));
        std::thread::sleep(Duration::from_millis(50));
        assert!(!run.is_finished());
        assert_eq!(qp.sends(), 0, "sent before the margin was reached");

        let config = MockCaptureConfig::default();
        ring.write_with(3, |pixels| pattern_frame(&config, &layout, 3, pixels));
        for module in 0..MODULES {
            stats.advance_head(module, 3);
        }
        run.join().unwrap()
    })
    .unwrap();

    assert_eq!(summary.frames_sent, 1);
    assert_eq!(qp.sends(), 1);
}

#[test]
fn missing_production_times_out() {
    let settings = settings(1, 20, 4, 0);
    let ctx = prefilled(&settings, 8, 0, 2);
    let qp = Arc::new(LoopbackQueuePair::new(4));
    let options = PipelineOptions {
        source_deadline: Some(Duration::from_millis(30)),
        ..options(2)
    };
    let pipeline = Pipeline::new(ctx, options, qp, 4).unwrap();

    assert!(matches!(
        pipeline.run(&AtomicBool::new(false)),
        Err(PipelineError::SourceTimeout { .. })
    ));
}

#[test]
fn rejected_post_fails_fast() {
    let settings = settings(1, 16, 4, 0);
    let ctx = prefilled(&settings, 16, 16, 1);
    let qp = Arc::new(LoopbackQueuePair::new(4));
    qp.inject_rejections(1, -22);
    let pipeline = Pipeline::new(ctx, options(1), qp, 4).unwrap();

    assert!(matches!(
        pipeline.run(&AtomicBool::new(false)),
        Err(PipelineError::Transport(TransportError::PostFailed { frame: 0, code: -22 }))
    ));
}

#[test]
fn rejected_post_retries_under_retry_policy() {
    let settings = settings(1, 16, 4, 0);
    let ctx = prefilled(&settings, 16, 16, 1);
    let qp = Arc::new(LoopbackQueuePair::new(4));
    qp.inject_rejections(2, -22);
    let options = PipelineOptions {
        submit_policy: SubmitErrorPolicy::Retry,
        ..options(1)
    };
    let pipeline = Pipeline::new(ctx, options, qp, 4)
        .unwrap()
        .with_retry_delay(Duration::from_micros(10));

    let summary = pipeline.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(summary.frames_sent, 4);
    assert_eq!(pipeline.pool().occupied(), 0);
}

#[test]
fn failed_completion_aborts_run() {
    let settings = settings(1, 16, 8, 0);
    let ctx = prefilled(&settings, 16, 16, 2);
    let qp = Arc::new(LoopbackQueuePair::new(4));
    qp.inject_completion_status(2, CompletionStatus::RemoteAccess);
    let pipeline = Pipeline::new(ctx, options(2), qp, 4).unwrap();

    assert!(matches!(
        pipeline.run(&AtomicBool::new(false)),
        Err(PipelineError::Transport(TransportError::CompletionFailed {
            status: CompletionStatus::RemoteAccess,
            ..
        }))
    ));
}

#[test]
fn trigger_deadline_ends_run() {
    let settings = settings(1, 20, 4, 5);
    let ctx = prefilled(&settings, 8, 0, 2);
    let qp = Arc::new(LoopbackQueuePair::new(4));
    let options = PipelineOptions {
        trigger_deadline: Some(Duration::from_millis(20)),
        ..options(2)
    };
    let pipeline = Pipeline::new(ctx, options, qp, 4).unwrap();

    assert!(matches!(
        pipeline.run(&AtomicBool::new(false)),
        Err(PipelineError::TriggerTimeout { .. })
    ));
}
