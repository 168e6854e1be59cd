// MAX_STREAM_DATA Frame {
//   Type (8) = 0x05,
//   Stream ID (32),
//   Maximum Stream Data (64),
// }

use crate::{
    sid::StreamId,
    version::{ByteOrder, Version},
};

/// Raises the flow control limit of a single stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaxStreamDataFrame {
    pub stream_id: StreamId,
    pub max_stream_data: u64,
}

const MAX_STREAM_DATA_FRAME_TYPE: u8 = 0x05;

impl super::BeFrame for MaxStreamDataFrame {
    fn frame_type(&self) -> super::FrameType {
        super::FrameType::MaxStreamData
    }

    fn min_length(&self, _version: Version) -> usize {
        1 + 4 + 8
    }
}

// nom parser for MAX_STREAM_DATA_FRAME
pub fn be_max_stream_data_frame(
    order: ByteOrder,
) -> impl Fn(&[u8]) -> nom::IResult<&[u8], MaxStreamDataFrame> {
    use nom::{Parser, combinator::map};

    use crate::version::ext::be_uint;
    move |input: &[u8]| {
        map(
            (be_uint(order, 4), be_uint(order, 8)),
            |(stream_id, max_stream_data)| MaxStreamDataFrame {
                stream_id: StreamId::from(stream_id as u32),
                max_stream_data,
            },
        )
        .parse(input)
    }
}

impl<T: bytes::BufMut> super::io::WriteFrame<MaxStreamDataFrame> for T {
    fn put_frame(&mut self, frame: &MaxStreamDataFrame, version: Version) {
        use crate::version::ext::WriteUint;
        let order = version.byte_order();
        self.put_u8(MAX_STREAM_DATA_FRAME_TYPE);
        self.put_uint_in(order, frame.stream_id.id() as u64, 4);
        self.put_uint_in(order, frame.max_stream_data, 8);
    }
}
