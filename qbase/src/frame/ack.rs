// ACK Frame {
//   Type (8) = 0b01nLLMM,
//   Largest Acked (8..48),
//   Ack Delay (16, ufloat16 microseconds),
//   [Number of Blocks - 1 (8)],
//   First Ack Block Length (8..48),
//   Ack Block {
//     Gap To Next Block (8),
//     Ack Block Length (8..48),
//   } ...,
//   Number of Timestamps (8),
//   Timestamps (..),
// }
//
// n marks multiple blocks, LL is the width of Largest Acked and MM the width
// of every block length. Gaps wider than 255 are split over zero-length
// blocks.

use std::{ops::RangeInclusive, time::Duration};

use crate::{
    packet::PacketNumberLen,
    version::{ByteOrder, Version},
};

const ACK_FRAME_TYPE: u8 = 0x40;
const MULTIPLE_BLOCKS_BIT: u8 = 0x20;
const MAX_BLOCK_ENTRIES: usize = 0xff;

/// Acknowledges ranges of received packets.
///
/// `ranges` are ordered from the highest packet numbers down, are never empty
/// and never adjacent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    pub ranges: Vec<RangeInclusive<u64>>,
    /// `None` if the sender had no estimate, it is then written as the
    /// largest representable delay.
    pub delay: Option<Duration>,
}

impl AckFrame {
    /// The longest delay the wire format can express.
    pub const MAX_DELAY: Duration = Duration::MAX;

    pub fn new(ranges: Vec<RangeInclusive<u64>>) -> Self {
        debug_assert!(!ranges.is_empty());
        Self {
            ranges,
            delay: None,
        }
    }

    pub fn largest_acked(&self) -> u64 {
        *self.ranges[0].end()
    }

    pub fn lowest_acked(&self) -> u64 {
        *self.ranges[self.ranges.len() - 1].start()
    }

    pub fn has_missing_ranges(&self) -> bool {
        self.ranges.len() > 1
    }

    /// Whether `pn` is covered by one of the ranges.
    pub fn acks_packet(&self, pn: u64) -> bool {
        if pn < self.lowest_acked() || pn > self.largest_acked() {
            return false;
        }
        // ranges are sorted descending
        let idx = self.ranges.partition_point(|range| *range.start() > pn);
        self.ranges.get(idx).is_some_and(|range| range.contains(&pn))
    }

    fn block_len_width(&self) -> PacketNumberLen {
        let longest = self
            .ranges
            .iter()
            .map(|range| range.end() - range.start() + 1)
            .max()
            .unwrap_or(1);
        PacketNumberLen::minimal(longest)
    }

    /// How many ranges below the first fit into the frame, and how many block
    /// entries they take.
    fn writable_ranges(&self) -> (usize, usize) {
        let mut entries = 0;
        let mut ranges = 0;
        for pair in self.ranges.windows(2) {
            let gap = pair[0].start() - pair[1].end() - 1;
            let needed = gap.div_ceil(0xff) as usize;
            if entries + needed >= MAX_BLOCK_ENTRIES {
                break;
            }
            entries += needed;
            ranges += 1;
        }
        (ranges, entries)
    }

    fn is_valid(&self) -> bool {
        !self.ranges.is_empty()
            && self.ranges.iter().all(|range| range.start() <= range.end())
            && self
                .ranges
                .windows(2)
                .all(|pair| *pair[1].end() + 1 < *pair[0].start())
    }
}

impl super::BeFrame for AckFrame {
    fn frame_type(&self) -> super::FrameType {
        super::FrameType::Ack(self.type_byte() & 0x3f)
    }

    fn min_length(&self, _version: Version) -> usize {
        let block_len = self.block_len_width().size();
        // type, delay and the number of timestamps
        let mut length = 1 + 2 + 1 + PacketNumberLen::minimal(self.largest_acked()).size();
        if self.has_missing_ranges() {
            let (_, entries) = self.writable_ranges();
            length += 1 + block_len + entries * (1 + block_len);
        } else {
            length += block_len;
        }
        length
    }
}

impl AckFrame {
    fn type_byte(&self) -> u8 {
        let mut ty = ACK_FRAME_TYPE
            | PacketNumberLen::minimal(self.largest_acked()).to_bits() << 2
            | self.block_len_width().to_bits();
        if self.has_missing_ranges() {
            ty |= MULTIPLE_BLOCKS_BIT;
        }
        ty
    }
}

const UFLOAT16_EXPONENT_BITS: u32 = 5;
const UFLOAT16_MANTISSA_BITS: u32 = 16 - UFLOAT16_EXPONENT_BITS;
const UFLOAT16_MANTISSA_EFFECTIVE_BITS: u32 = UFLOAT16_MANTISSA_BITS + 1;
const UFLOAT16_MAX_EXPONENT: u32 = (1 << UFLOAT16_EXPONENT_BITS) - 2;
const UFLOAT16_MAX_VALUE: u64 =
    ((1 << UFLOAT16_MANTISSA_EFFECTIVE_BITS) - 1) << UFLOAT16_MAX_EXPONENT;

/// Encode a value as an unsigned 16 bit float: 5 bits exponent, 11 bits
/// mantissa with a hidden bit. Values out of range saturate.
pub fn to_ufloat16(value: u64) -> u16 {
    if value < 1 << UFLOAT16_MANTISSA_EFFECTIVE_BITS {
        // denormalized, or normalized with exponent zero, encodes itself
        return value as u16;
    }
    if value >= UFLOAT16_MAX_VALUE {
        return u16::MAX;
    }
    let mut value = value;
    let mut exponent = 0u16;
    let mut offset = 16;
    while offset > 0 {
        if value >= 1 << (UFLOAT16_MANTISSA_BITS + offset) {
            exponent += offset as u16;
            value >>= offset;
        }
        offset /= 2;
    }
    // the hidden bit lands in the exponent
    value as u16 + (exponent << UFLOAT16_MANTISSA_BITS)
}

/// Decode an unsigned 16 bit float, see [`to_ufloat16`].
pub fn from_ufloat16(value: u16) -> u64 {
    let mut result = value as u64;
    if result < 1 << UFLOAT16_MANTISSA_EFFECTIVE_BITS {
        return result;
    }
    let exponent = (value >> UFLOAT16_MANTISSA_BITS) as u64 - 1;
    result -= exponent << UFLOAT16_MANTISSA_BITS;
    result << exponent
}

fn invalid(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::make_error(input, nom::error::ErrorKind::Verify))
}

/// Return a parser for an ACK frame with the given type flags,
/// [nom](https://docs.rs/nom/latest/nom/) parser style.
pub fn ack_frame_with_flag(
    flag: u8,
    order: ByteOrder,
) -> impl Fn(&[u8]) -> nom::IResult<&[u8], AckFrame> {
    use nom::number::complete::be_u8;

    use crate::version::ext::be_uint;
    let multiple_blocks = flag & MULTIPLE_BLOCKS_BIT != 0;
    let largest_len = PacketNumberLen::from_bits(flag >> 2).size();
    let block_len = PacketNumberLen::from_bits(flag).size();
    move |input: &[u8]| {
        let (remain, largest) = be_uint(order, largest_len)(input)?;
        let (remain, delay) = be_uint(order, 2)(remain)?;
        let (mut remain, num_blocks) = if multiple_blocks {
            be_u8(remain)?
        } else {
            (remain, 0)
        };
        if multiple_blocks && num_blocks == 0 {
            return Err(invalid(input));
        }

        let (rest, first_len) = be_uint(order, block_len)(remain)?;
        remain = rest;
        if first_len == 0 || first_len > largest + 1 {
            return Err(invalid(input));
        }

        // (start, end), a zero-length block is kept as start == end + 1 until
        // the following block completes it
        let mut ranges = vec![(largest + 1 - first_len, largest)];
        let mut in_long_block = false;
        let mut last_complete = true;
        for _ in 0..num_blocks {
            let (rest, gap) = be_u8(remain)?;
            let (rest, len) = be_uint(order, block_len)(rest)?;
            remain = rest;
            let gap = gap as u64;
            let last = ranges.len() - 1;
            if in_long_block {
                let (start, end) = ranges[last];
                ranges[last] = (
                    start.checked_sub(gap + len).ok_or_else(|| invalid(input))?,
                    end.checked_sub(gap).ok_or_else(|| invalid(input))?,
                );
            } else {
                let end = ranges[last]
                    .0
                    .checked_sub(gap + 1)
                    .ok_or_else(|| invalid(input))?;
                let start = (end + 1).checked_sub(len).ok_or_else(|| invalid(input))?;
                ranges.push((start, end));
            }
            last_complete = len > 0;
            in_long_block = len == 0;
        }
        if !last_complete {
            ranges.pop();
        }

        let (mut remain, num_timestamps) = be_u8(remain)?;
        if num_timestamps > 0 {
            // delta largest acked and the first timestamp
            let (rest, _) = nom::bytes::complete::take(1 + 4usize)(remain)?;
            // delta largest acked and the time since the previous timestamp
            let (rest, _) =
                nom::bytes::complete::take((num_timestamps as usize - 1) * (1 + 2))(rest)?;
            remain = rest;
        }

        let frame = AckFrame {
            ranges: ranges
                .into_iter()
                .map(|(start, end)| start..=end)
                .collect(),
            delay: Some(Duration::from_micros(from_ufloat16(delay as u16))),
        };
        if !frame.is_valid() {
            return Err(invalid(input));
        }
        Ok((remain, frame))
    }
}

impl<T: bytes::BufMut> super::io::WriteFrame<AckFrame> for T {
    fn put_frame(&mut self, frame: &AckFrame, version: Version) {
        use crate::version::ext::WriteUint;
        let order = version.byte_order();
        let largest_len = PacketNumberLen::minimal(frame.largest_acked()).size();
        let block_len = frame.block_len_width().size();

        self.put_u8(frame.type_byte());
        self.put_uint_in(order, frame.largest_acked(), largest_len);
        let delay = frame
            .delay
            .map_or(u16::MAX, |delay| to_ufloat16(delay.as_micros().min(u64::MAX as u128) as u64));
        self.put_uint_in(order, delay as u64, 2);

        let (writable, entries) = frame.writable_ranges();
        if frame.has_missing_ranges() {
            self.put_u8(entries as u8);
        }
        let first = &frame.ranges[0];
        self.put_uint_in(order, first.end() - first.start() + 1, block_len);
        for pair in frame.ranges.windows(2).take(writable) {
            let gap = pair[0].start() - pair[1].end() - 1;
            let len = pair[1].end() - pair[1].start() + 1;
            let needed = gap.div_ceil(0xff);
            for _ in 1..needed {
                self.put_u8(0xff);
                self.put_uint_in(order, 0, block_len);
            }
            self.put_u8((gap - (needed - 1) * 0xff) as u8);
            self.put_uint_in(order, len, block_len);
        }
        // no timestamps
        self.put_u8(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BeFrame, io::WriteFrame};

    fn read(buf: &[u8], order: ByteOrder) -> AckFrame {
        let (remain, frame) = ack_frame_with_flag(buf[0], order)(&buf[1..]).unwrap();
        assert!(remain.is_empty());
        frame
    }

    #[test]
    fn test_ufloat16() {
        for value in [0u64, 1, 4095, 4096, 4097, 8191, 8192, 0x3ff_c000_0000 - 1] {
            let encoded = to_ufloat16(value);
            let decoded = from_ufloat16(encoded);
            assert!(decoded <= value);
            assert_eq!(to_ufloat16(decoded), encoded);
        }
        assert_eq!(to_ufloat16(4096), 4096);
        assert_eq!(from_ufloat16(4097), 4098);
        assert_eq!(to_ufloat16(u64::MAX), u16::MAX);
        assert_eq!(from_ufloat16(u16::MAX), UFLOAT16_MAX_VALUE);
    }

    #[test]
    fn test_write_simple_ack() {
        let mut frame = AckFrame::new(vec![1..=0x13]);
        frame.delay = Some(Duration::from_micros(0x42));
        let mut buf = Vec::new();
        buf.put_frame(&frame, Version::V39);
        assert_eq!(buf, [0x40, 0x13, 0x00, 0x42, 0x13, 0x00]);
        assert_eq!(frame.min_length(Version::V39), buf.len());
        assert_eq!(read(&buf, ByteOrder::Big), frame);
    }

    #[test]
    fn test_unset_delay_is_max() {
        let frame = AckFrame::new(vec![5..=5]);
        let mut buf = Vec::new();
        buf.put_frame(&frame, Version::V39);
        assert_eq!(&buf[2..4], &[0xff, 0xff]);
    }

    #[test]
    fn test_ack_with_missing_ranges() {
        let mut frame = AckFrame::new(vec![15..=20, 10..=12, 1..=5]);
        frame.delay = Some(Duration::ZERO);
        let mut buf = Vec::new();
        buf.put_frame(&frame, Version::V37);
        assert_eq!(
            buf,
            [0x60, 20, 0, 0, 2, 6, 2, 3, 4, 5, 0]
        );
        assert_eq!(frame.min_length(Version::V37), buf.len());
        assert_eq!(read(&buf, ByteOrder::Little), frame);
        assert!(frame.acks_packet(11));
        assert!(!frame.acks_packet(13));
        assert!(!frame.acks_packet(0));
        assert!(frame.acks_packet(20));
    }

    #[test]
    fn test_ack_with_long_gap() {
        // a gap of 300 packets needs two block entries
        let mut frame = AckFrame::new(vec![400..=400, 50..=99]);
        frame.delay = Some(Duration::ZERO);
        let mut buf = Vec::new();
        buf.put_frame(&frame, Version::V39);
        assert_eq!(
            buf,
            [0x64, 0x01, 0x90, 0, 0, 2, 1, 0xff, 0, 45, 50, 0]
        );
        assert_eq!(frame.min_length(Version::V39), buf.len());
        assert_eq!(read(&buf, ByteOrder::Big), frame);
    }

    #[test]
    fn test_read_skips_timestamps() {
        let buf = [0x40, 0x05, 0x00, 0x00, 0x05, 2, 1, 0, 0, 0, 0, 1, 0, 0];
        let frame = read(&buf, ByteOrder::Big);
        assert_eq!(frame.ranges, vec![1..=5]);
    }

    #[test]
    fn test_read_invalid_first_block() {
        // the first block is longer than the largest acked allows
        let buf = [0x05, 0x00, 0x00, 0x07, 0];
        assert!(ack_frame_with_flag(0x40, ByteOrder::Big)(&buf).is_err());
        // a multi-block frame must announce at least one further block
        let buf = [0x05, 0x00, 0x00, 0, 0x05, 0];
        assert!(ack_frame_with_flag(0x60, ByteOrder::Big)(&buf).is_err());
    }
}
