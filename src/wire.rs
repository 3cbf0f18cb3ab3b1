//! Peer transport. Flows never touch it directly; the interpreter hands
//! whole [ProtocolMsg]s to a [ProtocolTransport] and the transport owns
//! framing, reply correlation and timeouts.

mod encoding;
mod memory;
mod proto;

pub use encoding::{decode_frame, encode_frame, ConversionError, MAX_FRAME_LEN};
pub use memory::{MemoryEndpoint, MemoryNetwork};

use crate::protocol::ProtocolMsg;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("timed out waiting for the counterparty reply")]
    Timeout,

    #[error("no route to the recipient")]
    PeerUnavailable,

    #[error("wire codec failure: {0}")]
    Codec(#[from] ConversionError),

    /// The encoded message does not fit the u16 length prefix.
    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error("transport endpoint is closed")]
    Closed,
}

/// One party's view of the network.
///
/// `send` is fire-and-forget; `send_and_wait` correlates the reply carrying
/// the same process id and fails with [TransportError::Timeout] when none
/// arrives in time.
#[async_trait]
pub trait ProtocolTransport: Send + Sync {
    async fn send(&self, msg: ProtocolMsg) -> Result<(), TransportError>;

    async fn send_and_wait(&self, msg: ProtocolMsg) -> Result<ProtocolMsg, TransportError>;
}
