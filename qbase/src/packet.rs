use derive_more::Display;

/// Packet headers in both the public (gQUIC) and the IETF layout.
pub mod header;
/// Packet number lengths and their wire flags.
pub mod number;

pub use header::{EncodeHeader, Header, LongHeader, PublicHeader, ShortHeader, WriteHeader};
pub use number::PacketNumberLen;

/// Default upper bound of a packet on the wire, header and sealing overhead included.
pub const MAX_PACKET_SIZE: usize = 1350;

/// Packets sent before the handshake completes leave this much room, so that
/// they can be retransmitted later with a different header without being split.
pub const NON_FORWARD_SECURE_PACKET_SIZE_REDUCTION: usize = 50;

/// Size of the server's diversification nonce.
pub const DIVERSIFICATION_NONCE_LEN: usize = 32;

/// The encryption level a packet was sealed at.
///
/// Levels are ordered, a packet acknowledged at a level lower than the one it
/// was sent at reveals a confused or malicious peer.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EncryptionLevel {
    #[display("unencrypted")]
    Unencrypted,
    #[display("encrypted (not forward-secure)")]
    Secure,
    #[display("forward-secure")]
    ForwardSecure,
}

/// The type byte of an IETF long header.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketType(u8);

impl PacketType {
    pub const VERSION_NEGOTIATION: Self = Self(1);
    pub const CLIENT_INITIAL: Self = Self(2);
    pub const SERVER_STATELESS_RETRY: Self = Self(3);
    pub const SERVER_CLEARTEXT: Self = Self(4);
    pub const CLIENT_CLEARTEXT: Self = Self(5);
    pub const ZERO_RTT_PROTECTED: Self = Self(6);

    pub const fn new(ty: u8) -> Self {
        Self(ty & 0x7f)
    }

    pub fn into_inner(self) -> u8 {
        self.0
    }
}
