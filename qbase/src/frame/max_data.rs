// MAX_DATA Frame {
//   Type (8) = 0x04,
//   Maximum Data (64),
// }

use crate::version::{ByteOrder, Version};

/// Raises the connection-level flow control limit of the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaxDataFrame {
    pub max_data: u64,
}

const MAX_DATA_FRAME_TYPE: u8 = 0x04;

impl super::BeFrame for MaxDataFrame {
    fn frame_type(&self) -> super::FrameType {
        super::FrameType::MaxData
    }

    fn min_length(&self, _version: Version) -> usize {
        1 + 8
    }
}

// nom parser for MAX_DATA_FRAME
pub fn be_max_data_frame(
    order: ByteOrder,
) -> impl Fn(&[u8]) -> nom::IResult<&[u8], MaxDataFrame> {
    use nom::{Parser, combinator::map};

    use crate::version::ext::be_uint;
    move |input: &[u8]| {
        map(be_uint(order, 8), |max_data| MaxDataFrame { max_data }).parse(input)
    }
}

impl<T: bytes::BufMut> super::io::WriteFrame<MaxDataFrame> for T {
    fn put_frame(&mut self, frame: &MaxDataFrame, version: Version) {
        use crate::version::ext::WriteUint;
        self.put_u8(MAX_DATA_FRAME_TYPE);
        self.put_uint_in(version.byte_order(), frame.max_data, 8);
    }
}
