// STOP_WAITING Frame {
//   Type (8) = 0x03,
//   Least Unacked Delta (8..48),
// }
//
// The delta is relative to the number of the packet carrying the frame and is
// written with the same width as that packet number.

use crate::{
    packet::PacketNumberLen,
    version::{ByteOrder, Version},
};

/// Declares that no packet below `least_unacked` will be sent anymore, so the
/// peer can stop acknowledging them.
///
/// `packet_number` and `packet_number_len` describe the packet the frame ends
/// up in, the packer fills them in right before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopWaitingFrame {
    pub least_unacked: u64,
    pub packet_number: u64,
    pub packet_number_len: PacketNumberLen,
}

const STOP_WAITING_FRAME_TYPE: u8 = 0x03;

impl StopWaitingFrame {
    pub fn new(least_unacked: u64) -> Self {
        Self {
            least_unacked,
            packet_number: least_unacked,
            packet_number_len: PacketNumberLen::Len6,
        }
    }
}

impl super::BeFrame for StopWaitingFrame {
    fn frame_type(&self) -> super::FrameType {
        super::FrameType::StopWaiting
    }

    fn min_length(&self, _version: Version) -> usize {
        1 + self.packet_number_len.size()
    }
}

// nom parser for STOP_WAITING_FRAME
pub fn be_stop_waiting_frame(
    order: ByteOrder,
    packet_number: u64,
    packet_number_len: PacketNumberLen,
) -> impl Fn(&[u8]) -> nom::IResult<&[u8], StopWaitingFrame> {
    use crate::version::ext::be_uint;
    move |input: &[u8]| {
        let (remain, delta) = be_uint(order, packet_number_len.size())(input)?;
        if delta > packet_number {
            return Err(nom::Err::Error(nom::error::make_error(
                input,
                nom::error::ErrorKind::Verify,
            )));
        }
        Ok((
            remain,
            StopWaitingFrame {
                least_unacked: packet_number - delta,
                packet_number,
                packet_number_len,
            },
        ))
    }
}

impl<T: bytes::BufMut> super::io::WriteFrame<StopWaitingFrame> for T {
    fn put_frame(&mut self, frame: &StopWaitingFrame, version: Version) {
        use crate::version::ext::WriteUint;
        debug_assert!(frame.least_unacked <= frame.packet_number);
        let delta = frame.packet_number.saturating_sub(frame.least_unacked);
        self.put_u8(STOP_WAITING_FRAME_TYPE);
        self.put_uint_in(
            version.byte_order(),
            delta,
            frame.packet_number_len.size(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BeFrame, io::WriteFrame};

    #[test]
    fn test_write_stop_waiting_frame() {
        let frame = StopWaitingFrame {
            least_unacked: 10,
            packet_number: 13,
            packet_number_len: PacketNumberLen::Len6,
        };
        let mut buf = Vec::new();
        buf.put_frame(&frame, Version::V39);
        assert_eq!(buf, [STOP_WAITING_FRAME_TYPE, 0, 0, 0, 0, 0, 3]);
        assert_eq!(frame.min_length(Version::V39), 7);

        let mut buf = Vec::new();
        buf.put_frame(
            &StopWaitingFrame {
                packet_number_len: PacketNumberLen::Len1,
                ..frame
            },
            Version::V37,
        );
        assert_eq!(buf, [STOP_WAITING_FRAME_TYPE, 3]);
    }

    #[test]
    fn test_read_stop_waiting_frame() {
        let (remain, frame) =
            be_stop_waiting_frame(ByteOrder::Little, 0x1337, PacketNumberLen::Len2)(&[0x37, 0x03])
                .unwrap();
        assert!(remain.is_empty());
        assert_eq!(frame.least_unacked, 0x1000);
    }

    #[test]
    fn test_read_delta_larger_than_packet_number() {
        let result = be_stop_waiting_frame(ByteOrder::Big, 5, PacketNumberLen::Len1)(&[6]);
        assert!(matches!(result, Err(nom::Err::Error(_))));
    }
}
