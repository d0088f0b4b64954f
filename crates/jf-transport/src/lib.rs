//! Send path of the jfstream pipeline.
//!
//! - [`verbs`]: the queue-pair surface the sender depends on
//! - [`transmitter`]: posts filled pool slots as signaled sends
//! - [`reclaimer`]: drains completions and frees pool slots
//! - [`loopback`]: in-process queue pair for simulation and tests
//! - [`handshake`]: TCP setup exchange with the downstream peer
//!
//! Hardware providers implement [`QueuePair`]; everything above it is
//! provider independent.

pub mod error;
pub mod handshake;
pub mod loopback;
pub mod reclaimer;
pub mod transmitter;
pub mod verbs;

pub use error::{HandshakeError, TransportError};
pub use handshake::{CoreSession, EndpointParams, PeerSession, ReceiverOutput};
pub use loopback::{LoopbackQueuePair, ReceivedFrame};
pub use reclaimer::{CompletionReclaimer, ReclaimSummary};
pub use transmitter::{SubmitErrorPolicy, Transmitter};
pub use verbs::{CompletionStatus, PostSendError, QueuePair, SendWorkRequest, WorkCompletion};
