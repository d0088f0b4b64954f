//! TCP setup exchange with the downstream peer.
//!
//! Runs once per run before any RDMA traffic and once after it:
//!
//! ```text
//! sender (core)                          peer (writer)
//!   |-- CONNECTION_MAGIC (u64 LE) ------->|
//!   |<------------- echo -----------------|
//!   |<---------- ExperimentSettings ------|   quit mode ends here
//!   |-- EndpointParams ------------------>|
//!   |<------------ EndpointParams --------|
//!   :            frames over RDMA         :
//!   |-- ReceiverOutput ------------------>|
//!   |-- DONE_MAGIC (u64 LE) ------------->|
//! ```
//!
//! Records are framed as a little-endian `u32` length followed by a bincode
//! payload.

use crate::error::HandshakeError;
use jf_core::{ConversionMode, ExperimentSettings};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Sent by the core on connect and echoed by the peer.
pub const CONNECTION_MAGIC: u64 = 123_434;

/// Sent by the core after the end-of-run report.
pub const DONE_MAGIC: u64 = 56_789;

/// Upper bound on a framed record.
pub const MAX_RECORD_BYTES: u32 = 64 * 1024;

/// Default timeout for one step of the exchange.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Queue-pair parameters one side needs to connect to the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointParams {
    /// Local identifier of the port.
    pub lid: u16,
    /// Queue pair number.
    pub qp_num: u32,
    /// Initial receive packet sequence number.
    pub rq_psn: u32,
    /// Remote key of the frame buffer.
    pub rkey: u32,
    /// Address of the frame buffer.
    pub remote_addr: u64,
}

/// End-of-run report sent to the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverOutput {
    /// Capture frame at which the trigger was observed.
    pub frame_when_trigger_observed: u64,
    /// Packets the capture side received intact.
    pub packets_collected_ok: u64,
}

async fn step<F, T>(limit: Duration, what: &'static str, fut: F) -> Result<T, HandshakeError>
where
    F: Future<Output = Result<T, HandshakeError>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| HandshakeError::Timeout(what))?
}

async fn write_magic(stream: &mut TcpStream, magic: u64) -> Result<(), HandshakeError> {
    stream.write_all(&magic.to_le_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_magic(stream: &mut TcpStream) -> Result<u64, HandshakeError> {
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf).await?;
    Ok(u64::from_le_bytes(buf))
}

fn expect_magic(expected: u64, got: u64) -> Result<(), HandshakeError> {
    if got != expected {
        warn!(expected, got, "handshake magic mismatch");
        return Err(HandshakeError::MagicMismatch { expected, got });
    }
    Ok(())
}

async fn write_record<T: Serialize>(stream: &mut TcpStream, record: &T) -> Result<(), HandshakeError> {
    let payload = bincode::serialize(record)?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_record<T: DeserializeOwned>(stream: &mut TcpStream) -> Result<T, HandshakeError> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await?;
    let len = u32::from_le_bytes(len);
    if len > MAX_RECORD_BYTES {
        return Err(HandshakeError::RecordTooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok(bincode::deserialize(&payload)?)
}

/// Core side of the exchange.
#[derive(Debug)]
pub struct CoreSession {
    stream: TcpStream,
    peer: SocketAddr,
    io_timeout: Duration,
}

impl CoreSession {
    /// Accept one peer on `listener` and run the magic exchange.
    pub async fn accept(listener: &TcpListener, io_timeout: Duration) -> Result<Self, HandshakeError> {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "peer connected");
        Self::start(stream, io_timeout).await
    }

    /// Run the magic exchange on an established connection.
    pub async fn start(stream: TcpStream, io_timeout: Duration) -> Result<Self, HandshakeError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let mut session = Self {
            stream,
            peer,
            io_timeout,
        };
        write_magic(&mut session.stream, CONNECTION_MAGIC).await?;
        let echoed = step(io_timeout, "magic echo", read_magic(&mut session.stream)).await?;
        expect_magic(CONNECTION_MAGIC, echoed)?;
        debug!(peer = %session.peer, "magic exchanged");
        Ok(session)
    }

    /// Address of the connected peer.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Receive the run's experiment settings.
    ///
    /// Settings arrive on the peer's schedule, so this step has no timeout.
    pub async fn receive_settings(&mut self) -> Result<ExperimentSettings, HandshakeError> {
        let settings: ExperimentSettings = read_record(&mut self.stream).await?;
        info!(
            mode = ?settings.conversion_mode,
            depth = %settings.pixel_depth,
            summation = settings.summation,
            collect = settings.nframes_to_collect,
            write = settings.nframes_to_write,
            "experiment settings received"
        );
        Ok(settings)
    }

    /// Send local queue-pair parameters, then read the peer's.
    pub async fn exchange_endpoints(
        &mut self,
        local: EndpointParams,
    ) -> Result<EndpointParams, HandshakeError> {
        write_record(&mut self.stream, &local).await?;
        let remote = step(self.io_timeout, "peer endpoint", read_record(&mut self.stream)).await?;
        debug!(?local, ?remote, "endpoints exchanged");
        Ok(remote)
    }

    /// Send the end-of-run report and the done magic, closing the session.
    pub async fn finish(mut self, output: ReceiverOutput) -> Result<(), HandshakeError> {
        write_record(&mut self.stream, &output).await?;
        write_magic(&mut self.stream, DONE_MAGIC).await?;
        self.stream.shutdown().await?;
        info!(
            trigger = output.frame_when_trigger_observed,
            packets = output.packets_collected_ok,
            "run report sent"
        );
        Ok(())
    }
}

/// Peer side of the exchange, used by simulation and tests.
#[derive(Debug)]
pub struct PeerSession {
    stream: TcpStream,
    io_timeout: Duration,
}

impl PeerSession {
    /// Connect to the core and echo its magic.
    ///
    /// The magic is echoed before it is checked, so a mismatching core
    /// sees the mismatch too.
    pub async fn connect<A: ToSocketAddrs>(addr: A, io_timeout: Duration) -> Result<Self, HandshakeError> {
        let mut stream = step(io_timeout, "connect", async {
            Ok(TcpStream::connect(addr).await?)
        })
        .await?;
        stream.set_nodelay(true)?;
        let magic = step(io_timeout, "connection magic", read_magic(&mut stream)).await?;
        write_magic(&mut stream, magic).await?;
        expect_magic(CONNECTION_MAGIC, magic)?;
        Ok(Self { stream, io_timeout })
    }

    /// Send the run's settings.
    ///
    /// Returns `false` when the settings end the session (quit mode).
    pub async fn send_settings(&mut self, settings: &ExperimentSettings) -> Result<bool, HandshakeError> {
        write_record(&mut self.stream, settings).await?;
        Ok(settings.conversion_mode != ConversionMode::Quit)
    }

    /// Read the core's queue-pair parameters, then send the local ones.
    pub async fn exchange_endpoints(
        &mut self,
        local: EndpointParams,
    ) -> Result<EndpointParams, HandshakeError> {
        let remote = step(self.io_timeout, "core endpoint", read_record(&mut self.stream)).await?;
        write_record(&mut self.stream, &local).await?;
        Ok(remote)
    }

    /// Wait for the end-of-run report and the done magic.
    ///
    /// The run itself happens in between, so there is no timeout.
    pub async fn receive_output(mut self) -> Result<ReceiverOutput, HandshakeError> {
        let output: ReceiverOutput = read_record(&mut self.stream).await?;
        let done = read_magic(&mut self.stream).await?;
        expect_magic(DONE_MAGIC, done)?;
        Ok(output)
    }
}
