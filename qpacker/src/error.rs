use qbase::{error::QuicError, packet::EncryptionLevel};
use qrecovery::sent::SentPacketError;
use thiserror::Error;

/// A violated packing invariant.
///
/// Bugs are never caused by the peer and are never reported to it, the
/// operation that hit one is aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Bug {
    #[error("PacketPacker BUG: forward-secure encrypted handshake packets don't need special treatment")]
    ForwardSecureHandshakeRetransmission,
    #[error("PacketPacker BUG: Handshake retransmissions must contain a StopWaitingFrame")]
    MissingStopWaiting,
    #[error("PacketPacker BUG: packet too large")]
    PacketTooLarge,
    #[error("PacketPacker BUG: no ack frame queued")]
    NoAckFrame,
    #[error("PacketPacker BUG: packet payload too large")]
    PayloadTooLarge,
    #[error("PacketPacker BUG: Peeked and Popped packet numbers do not match")]
    PacketNumberMismatch,
}

/// Everything that can go wrong on the send path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Bug(#[from] Bug),
    #[error("no sealer for encryption level {0}")]
    NoSealer(EncryptionLevel),
    #[error(transparent)]
    SentPacket(#[from] SentPacketError),
    /// The peer violated the protocol, the connection has to be closed.
    #[error(transparent)]
    Quic(#[from] QuicError),
}

impl Error {
    pub fn is_bug(&self) -> bool {
        matches!(self, Error::Bug(_))
    }
}
