// RST_STREAM Frame {
//   Type (8) = 0x01,
//   Stream ID (32),
//   Byte Offset (64),
//   Error Code (32),
// }

use crate::{
    sid::StreamId,
    version::{ByteOrder, Version},
};

/// Abruptly terminates the sending part of a stream.
///
/// `final_offset` is the amount of data sent on the stream before the reset,
/// the peer uses it to keep connection-level flow control consistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RstStreamFrame {
    pub stream_id: StreamId,
    pub error_code: u32,
    pub final_offset: u64,
}

const RST_STREAM_FRAME_TYPE: u8 = 0x01;

impl super::BeFrame for RstStreamFrame {
    fn frame_type(&self) -> super::FrameType {
        super::FrameType::RstStream
    }

    fn min_length(&self, _version: Version) -> usize {
        1 + 4 + 8 + 4
    }
}

// nom parser for RST_STREAM_FRAME
pub fn be_rst_stream_frame(
    order: ByteOrder,
) -> impl Fn(&[u8]) -> nom::IResult<&[u8], RstStreamFrame> {
    use nom::{Parser, combinator::map};

    use crate::version::ext::be_uint;
    move |input: &[u8]| {
        map(
            (be_uint(order, 4), be_uint(order, 8), be_uint(order, 4)),
            |(stream_id, final_offset, error_code)| RstStreamFrame {
                stream_id: StreamId::from(stream_id as u32),
                error_code: error_code as u32,
                final_offset,
            },
        )
        .parse(input)
    }
}

impl<T: bytes::BufMut> super::io::WriteFrame<RstStreamFrame> for T {
    fn put_frame(&mut self, frame: &RstStreamFrame, version: Version) {
        use crate::version::ext::WriteUint;
        let order = version.byte_order();
        self.put_u8(RST_STREAM_FRAME_TYPE);
        self.put_uint_in(order, frame.stream_id.id() as u64, 4);
        self.put_uint_in(order, frame.final_offset, 8);
        self.put_uint_in(order, frame.error_code as u64, 4);
    }
}
