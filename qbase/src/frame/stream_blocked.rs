// STREAM_BLOCKED Frame {
//   Type (8) = 0x09,
//   Stream ID (32),
// }

use crate::{
    sid::StreamId,
    version::{ByteOrder, Version},
};

/// Tells the peer that a stream has data to send but its window is used up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamBlockedFrame {
    pub stream_id: StreamId,
}

const STREAM_BLOCKED_FRAME_TYPE: u8 = 0x09;

impl super::BeFrame for StreamBlockedFrame {
    fn frame_type(&self) -> super::FrameType {
        super::FrameType::StreamBlocked
    }

    fn min_length(&self, _version: Version) -> usize {
        1 + 4
    }
}

// nom parser for STREAM_BLOCKED_FRAME
pub fn be_stream_blocked_frame(
    order: ByteOrder,
) -> impl Fn(&[u8]) -> nom::IResult<&[u8], StreamBlockedFrame> {
    use nom::{Parser, combinator::map};

    use crate::version::ext::be_uint;
    move |input: &[u8]| {
        map(be_uint(order, 4), |id| StreamBlockedFrame {
            stream_id: StreamId::from(id as u32),
        })
        .parse(input)
    }
}

impl<T: bytes::BufMut> super::io::WriteFrame<StreamBlockedFrame> for T {
    fn put_frame(&mut self, frame: &StreamBlockedFrame, version: Version) {
        use crate::version::ext::WriteUint;
        self.put_u8(STREAM_BLOCKED_FRAME_TYPE);
        self.put_uint_in(version.byte_order(), frame.stream_id.id() as u64, 4);
    }
}
