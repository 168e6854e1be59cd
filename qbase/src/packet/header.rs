use enum_dispatch::enum_dispatch;

use super::{DIVERSIFICATION_NONCE_LEN, PacketNumberLen, PacketType};
use crate::{cid::ConnectionId, version::Version};

/// When encoding a packet for sending, the packer needs to know the header size
/// before any frame is written, so every header shape implements this trait.
#[enum_dispatch]
pub trait EncodeHeader {
    /// Returns the length of the encoded packet header.
    fn size(&self) -> usize;

    /// The full packet number this header carries.
    fn packet_number(&self) -> u64;

    /// How many bytes of the packet number are written.
    fn packet_number_len(&self) -> PacketNumberLen;
}

// Public Header {
//   Public Flags (8),
//   [Connection ID (64)],
//   [Version (32)],
//   [Diversification Nonce (256)],
//   Packet Number (8..48),
// }
const PUBLIC_FLAG_VERSION: u8 = 0x01;
const PUBLIC_FLAG_NONCE: u8 = 0x04;
const PUBLIC_FLAG_CONNECTION_ID: u8 = 0x08;

/// The header used by the gQUIC versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicHeader {
    /// `None` once the connection ID may be omitted.
    pub connection_id: Option<ConnectionId>,
    /// Set by the client until the handshake is forward-secure.
    pub version: Option<Version>,
    /// Set by the server on `Secure` packets.
    pub diversification_nonce: Option<[u8; DIVERSIFICATION_NONCE_LEN]>,
    pub packet_number: u64,
    pub packet_number_len: PacketNumberLen,
}

impl EncodeHeader for PublicHeader {
    fn size(&self) -> usize {
        1 + self.connection_id.map_or(0, |_| ConnectionId::LEN)
            + self.version.map_or(0, |_| 4)
            + self
                .diversification_nonce
                .map_or(0, |_| DIVERSIFICATION_NONCE_LEN)
            + self.packet_number_len.size()
    }

    fn packet_number(&self) -> u64 {
        self.packet_number
    }

    fn packet_number_len(&self) -> PacketNumberLen {
        self.packet_number_len
    }
}

// Long Header {
//   Header Form (1) = 1,
//   Long Packet Type (7),
//   Connection ID (64),
//   Packet Number (32),
//   Version (32),
// }
const LONG_HEADER_FORM: u8 = 0x80;

/// The IETF header used before the handshake is forward-secure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongHeader {
    pub packet_type: PacketType,
    pub connection_id: ConnectionId,
    pub packet_number: u64,
    pub version: Version,
}

impl EncodeHeader for LongHeader {
    fn size(&self) -> usize {
        1 + ConnectionId::LEN + 4 + 4
    }

    fn packet_number(&self) -> u64 {
        self.packet_number
    }

    fn packet_number_len(&self) -> PacketNumberLen {
        PacketNumberLen::Len4
    }
}

// Short Header {
//   Header Form (1) = 0,
//   Connection ID Flag (1),
//   Key Phase Bit (1),
//   Packet Number Length (5),
//   [Connection ID (64)],
//   Packet Number (8..32),
// }
const SHORT_FLAG_CONNECTION_ID: u8 = 0x40;
const SHORT_FLAG_KEY_PHASE: u8 = 0x20;

/// The IETF header used once the handshake is forward-secure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortHeader {
    pub connection_id: Option<ConnectionId>,
    pub key_phase: bool,
    pub packet_number: u64,
    /// At most [`PacketNumberLen::Len4`].
    pub packet_number_len: PacketNumberLen,
}

impl EncodeHeader for ShortHeader {
    fn size(&self) -> usize {
        1 + self.connection_id.map_or(0, |_| ConnectionId::LEN) + self.packet_number_len.size()
    }

    fn packet_number(&self) -> u64 {
        self.packet_number
    }

    fn packet_number_len(&self) -> PacketNumberLen {
        self.packet_number_len
    }
}

/// The sum type of all packet headers this endpoint writes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[enum_dispatch(EncodeHeader)]
pub enum Header {
    Public(PublicHeader),
    Long(LongHeader),
    Short(ShortHeader),
}

impl Header {
    pub fn is_long_header(&self) -> bool {
        matches!(self, Header::Long(_))
    }

    pub fn omits_connection_id(&self) -> bool {
        match self {
            Header::Public(header) => header.connection_id.is_none(),
            Header::Long(_) => false,
            Header::Short(header) => header.connection_id.is_none(),
        }
    }
}

/// BufMut write extension for packet headers.
///
/// The public header writes its connection ID and packet number in the
/// version's byte order, the IETF headers are always big-endian.
pub trait WriteHeader<H> {
    fn put_header(&mut self, header: &H, version: Version);
}

impl<T: bytes::BufMut> WriteHeader<PublicHeader> for T {
    fn put_header(&mut self, header: &PublicHeader, version: Version) {
        use crate::version::ext::WriteUint;

        let order = version.byte_order();
        let mut flags = header.packet_number_len.to_bits() << 4;
        if header.version.is_some() {
            flags |= PUBLIC_FLAG_VERSION;
        }
        if header.diversification_nonce.is_some() {
            flags |= PUBLIC_FLAG_NONCE;
        }
        if header.connection_id.is_some() {
            flags |= PUBLIC_FLAG_CONNECTION_ID;
        }
        self.put_u8(flags);
        if let Some(cid) = header.connection_id {
            self.put_uint_in(order, cid.into_inner(), ConnectionId::LEN);
        }
        if let Some(version) = header.version {
            self.put_u32(version.into());
        }
        if let Some(nonce) = &header.diversification_nonce {
            self.put_slice(nonce);
        }
        self.put_uint_in(
            order,
            header.packet_number,
            header.packet_number_len.size(),
        );
    }
}

impl<T: bytes::BufMut> WriteHeader<LongHeader> for T {
    fn put_header(&mut self, header: &LongHeader, _version: Version) {
        self.put_u8(LONG_HEADER_FORM | header.packet_type.into_inner());
        self.put_u64(header.connection_id.into_inner());
        self.put_u32(header.packet_number as u32);
        self.put_u32(header.version.into());
    }
}

impl<T: bytes::BufMut> WriteHeader<ShortHeader> for T {
    fn put_header(&mut self, header: &ShortHeader, _version: Version) {
        debug_assert!(header.packet_number_len <= PacketNumberLen::Len4);
        let mut ty = match header.packet_number_len {
            PacketNumberLen::Len1 => 0x01,
            PacketNumberLen::Len2 => 0x02,
            PacketNumberLen::Len4 | PacketNumberLen::Len6 => 0x03,
        };
        if header.connection_id.is_some() {
            ty |= SHORT_FLAG_CONNECTION_ID;
        }
        if header.key_phase {
            ty |= SHORT_FLAG_KEY_PHASE;
        }
        self.put_u8(ty);
        if let Some(cid) = header.connection_id {
            self.put_u64(cid.into_inner());
        }
        self.put_uint(header.packet_number, header.packet_number_len.size());
    }
}

impl<T: bytes::BufMut> WriteHeader<Header> for T {
    fn put_header(&mut self, header: &Header, version: Version) {
        match header {
            Header::Public(header) => self.put_header(header, version),
            Header::Long(header) => self.put_header(header, version),
            Header::Short(header) => self.put_header(header, version),
        }
    }
}
