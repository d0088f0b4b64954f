//! In-process end-to-end run.
//!
//! Everything the real sender talks to is replaced by a local stand-in:
//!
//! - the downstream peer is a tokio task speaking the TCP handshake over
//!   localhost and sending the configured experiment settings
//! - the NIC is a [`LoopbackQueuePair`] whose payloads go to a receiver thread
//! - the detector is a [`MockCapture`] thread
//!
//! The pipeline itself runs unchanged on a blocking thread.

use crate::capture::{CaptureSummary, MockCapture};
use crate::config::JfConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{Pipeline, RunContext, RunSummary};
use jf_core::{ConversionMode, OnlineStatistics, RawFrameRing};
use jf_transport::{
    CoreSession, EndpointParams, HandshakeError, LoopbackQueuePair, PeerSession, ReceivedFrame,
    ReceiverOutput,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// What the simulated peer saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerReport {
    /// Frames delivered over the loopback fabric.
    pub frames_received: u64,
    /// Payload bytes delivered.
    pub bytes_received: u64,
    /// Highest frame number carried in immediate data.
    pub last_frame: Option<u32>,
    /// End-of-run report from the sender; `None` after quit.
    pub output: Option<ReceiverOutput>,
}

/// Outcome of a simulated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationReport {
    /// Pipeline summary; `None` when the peer asked to quit.
    pub run: Option<RunSummary>,
    /// Mock capture summary.
    pub capture: Option<CaptureSummary>,
    /// Peer side.
    pub peer: PeerReport,
}

fn peer_endpoint() -> EndpointParams {
    EndpointParams {
        lid: 2,
        qp_num: 0x7_0000,
        rq_psn: 0,
        rkey: 0,
        remote_addr: 0,
    }
}

fn spawn_peer(config: &JfConfig, addr: SocketAddr) -> JoinHandle<Result<Option<ReceiverOutput>, HandshakeError>> {
    let settings = config.experiment.clone();
    let io_timeout = config.receiver.handshake_timeout;
    tokio::spawn(async move {
        let mut session = PeerSession::connect(addr, io_timeout).await?;
        if !session.send_settings(&settings).await? {
            return Ok(None);
        }
        session.exchange_endpoints(peer_endpoint()).await?;
        Ok(Some(session.receive_output().await?))
    })
}

fn spawn_receiver(rx: mpsc::Receiver<ReceivedFrame>) -> std::io::Result<thread::JoinHandle<PeerReport>> {
    thread::Builder::new()
        .name("loopback-receiver".into())
        .spawn(move || {
            let mut report = PeerReport::default();
            for frame in rx {
                report.frames_received += 1;
                report.bytes_received += frame.data.len() as u64;
                report.last_frame = report.last_frame.max(Some(frame.frame));
            }
            report
        })
}

async fn join_blocking<T: Send + 'static>(
    name: &str,
    f: impl FnOnce() -> T + Send + 'static,
) -> PipelineResult<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|_| PipelineError::ThreadPanicked(name.into()))
}

/// Run one full simulated session from `config`.
///
/// The handshake listens on `receiver.tcp_port` on localhost; port 0 picks
/// a free port.
pub async fn simulate(config: &JfConfig) -> PipelineResult<SimulationReport> {
    config.validate().map_err(PipelineError::Configuration)?;
    let layout = config.layout().map_err(PipelineError::Configuration)?;
    let receiver = &config.receiver;

    let listener = TcpListener::bind(("127.0.0.1", receiver.tcp_port)).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "waiting for peer");
    let peer = spawn_peer(config, addr);

    let mut session = CoreSession::accept(&listener, receiver.handshake_timeout).await?;
    let settings = session.receive_settings().await?;
    if settings.conversion_mode == ConversionMode::Quit {
        info!("peer requested quit");
        let output = peer
            .await
            .map_err(|_| PipelineError::ThreadPanicked("peer".into()))??;
        return Ok(SimulationReport {
            run: None,
            capture: None,
            peer: PeerReport {
                output,
                ..PeerReport::default()
            },
        });
    }

    let stats = Arc::new(OnlineStatistics::new(layout.modules()));
    let ring = Arc::new(RawFrameRing::new(&layout, receiver.raw_ring_frames)?);
    let ctx = RunContext::new(layout, settings.clone(), stats.clone(), ring.clone(), receiver.workers);
    let cursor = ctx.cursor.clone();

    let (tx, rx) = mpsc::channel();
    let qp = Arc::new(LoopbackQueuePair::new(receiver.send_queue_depth).with_sink(tx));
    let receiver_thread = spawn_receiver(rx)?;

    let pipeline = Pipeline::new(ctx, config.pipeline_options(), qp, receiver.send_queue_depth)?;
    session.exchange_endpoints(pipeline.local_endpoint()).await?;

    let stop = Arc::new(AtomicBool::new(false));
    let capture = MockCapture::new(
        config.simulation.clone(),
        layout,
        settings.nframes_to_collect,
        stats.clone(),
        ring,
        cursor,
    )
    .spawn(stop.clone())?;

    let cancel = Arc::new(AtomicBool::new(false));
    let run = {
        let cancel = cancel.clone();
        join_blocking("pipeline", move || pipeline.run(&cancel)).await?
    };

    stop.store(true, Ordering::Release);
    let capture = join_blocking("mock-capture", move || capture.join())
        .await?
        .map_err(|_| PipelineError::ThreadPanicked("mock-capture".into()))?;

    let run = match run {
        Ok(run) => run,
        Err(e) => {
            warn!(error = %e, "run failed, dropping peer session");
            drop(session);
            peer.abort();
            return Err(e);
        }
    };

    session
        .finish(ReceiverOutput {
            frame_when_trigger_observed: run.trigger_frame,
            packets_collected_ok: stats.good_packets(),
        })
        .await?;

    let mut peer_report = join_blocking("loopback-receiver", move || receiver_thread.join())
        .await?
        .map_err(|_| PipelineError::ThreadPanicked("loopback-receiver".into()))?;
    peer_report.output = tokio::time::timeout(Duration::from_secs(5), peer)
        .await
        .map_err(|_| HandshakeError::Timeout("peer report"))?
        .map_err(|_| PipelineError::ThreadPanicked("peer".into()))??;

    info!(
        frames = peer_report.frames_received,
        bytes = peer_report.bytes_received,
        captured = capture.frames_written,
        "simulation finished"
    );
    Ok(SimulationReport {
        run: Some(run),
        capture: Some(capture),
        peer: peer_report,
    })
}
