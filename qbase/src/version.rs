use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sid::StreamId;

/// Byte order of the fixed-width integer fields in frames and headers.
///
/// gQUIC versions up to Q038 wrote everything little-endian, later versions
/// switched to network byte order. The order is a property of the negotiated
/// [`Version`], never of a single packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    /// Interpret `bytes` (at most 8) as an unsigned integer in this byte order.
    pub fn read_uint(self, bytes: &[u8]) -> u64 {
        debug_assert!(bytes.len() <= 8);
        match self {
            ByteOrder::Big => bytes.iter().fold(0, |acc, &b| (acc << 8) | b as u64),
            ByteOrder::Little => bytes.iter().rev().fold(0, |acc, &b| (acc << 8) | b as u64),
        }
    }
}

/// A QUIC version as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version(u32);

impl Version {
    /// gQUIC "Q037"
    pub const V37: Self = Self(0x5130_3337);
    /// gQUIC "Q038"
    pub const V38: Self = Self(0x5130_3338);
    /// gQUIC "Q039"
    pub const V39: Self = Self(0x5130_3339);
    /// The draft version that runs the TLS handshake and the IETF header format.
    pub const TLS: Self = Self(101);
    /// A placeholder used before negotiation finished, and by tests that do not care.
    pub const UNSPECIFIED: Self = Self(0);

    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    pub fn is_gquic(&self) -> bool {
        self.0 & 0xffff_0000 == 0x5130_0000
    }

    pub fn byte_order(&self) -> ByteOrder {
        if *self == Self::V37 || *self == Self::V38 {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }

    pub fn uses_ietf_header(&self) -> bool {
        *self == Self::TLS
    }

    /// The stream that carries the handshake.
    pub fn crypto_stream_id(&self) -> StreamId {
        if self.uses_ietf_header() {
            StreamId::from(0)
        } else {
            StreamId::from(1)
        }
    }
}

impl From<Version> for u32 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_gquic() {
            let tag = self.0.to_be_bytes();
            write!(f, "{}", String::from_utf8_lossy(&tag))
        } else if *self == Self::TLS {
            write!(f, "TLS dev version")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

pub mod ext {
    use bytes::BufMut;

    use super::ByteOrder;

    /// nom parser for a fixed-width unsigned integer of `len` bytes.
    pub fn be_uint(order: ByteOrder, len: usize) -> impl Fn(&[u8]) -> nom::IResult<&[u8], u64> {
        move |input: &[u8]| {
            let taken: nom::IResult<&[u8], &[u8]> = nom::bytes::complete::take(len)(input);
            let (remain, bytes) = taken?;
            Ok((remain, order.read_uint(bytes)))
        }
    }

    /// BufMut write extension for fixed-width unsigned integers.
    pub trait WriteUint {
        fn put_uint_in(&mut self, order: ByteOrder, value: u64, len: usize);
    }

    impl<T: BufMut> WriteUint for T {
        fn put_uint_in(&mut self, order: ByteOrder, value: u64, len: usize) {
            match order {
                ByteOrder::Big => self.put_uint(value, len),
                ByteOrder::Little => self.put_uint_le(value, len),
            }
        }
    }
}
