/// How many bytes of a packet number are written on the wire.
///
/// The receiver reconstructs the full number from the truncated one and the
/// largest number it has seen, so the sender picks a length that covers twice
/// the distance to the least unacknowledged packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PacketNumberLen {
    Len1 = 1,
    Len2 = 2,
    Len4 = 4,
    Len6 = 6,
}

impl PacketNumberLen {
    pub fn size(&self) -> usize {
        *self as usize
    }

    /// The length used in a packet header, given the least packet the peer may still
    /// be waiting for. Never shorter than two bytes.
    pub fn for_header(packet_number: u64, least_unacked: u64) -> Self {
        let diff = packet_number.saturating_sub(least_unacked);
        if diff < 1 << (16 - 1) {
            Self::Len2
        } else if diff < 1 << (32 - 1) {
            Self::Len4
        } else {
            Self::Len6
        }
    }

    /// The shortest length that can hold `value` completely.
    pub fn minimal(value: u64) -> Self {
        match value {
            0..=0xff => Self::Len1,
            0x100..=0xffff => Self::Len2,
            0x1_0000..=0xffff_ffff => Self::Len4,
            _ => Self::Len6,
        }
    }

    /// Two-bit code shared by the public header flags and the ACK frame type byte.
    pub fn to_bits(self) -> u8 {
        match self {
            Self::Len1 => 0b00,
            Self::Len2 => 0b01,
            Self::Len4 => 0b10,
            Self::Len6 => 0b11,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Len1,
            0b01 => Self::Len2,
            0b10 => Self::Len4,
            _ => Self::Len6,
        }
    }
}
