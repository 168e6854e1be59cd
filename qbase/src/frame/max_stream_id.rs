// MAX_STREAM_ID Frame {
//   Type (8) = 0x06,
//   Maximum Stream ID (32),
// }

use crate::{
    sid::StreamId,
    version::{ByteOrder, Version},
};

/// Announces the largest stream ID the peer may open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaxStreamIdFrame {
    pub stream_id: StreamId,
}

const MAX_STREAM_ID_FRAME_TYPE: u8 = 0x06;

impl super::BeFrame for MaxStreamIdFrame {
    fn frame_type(&self) -> super::FrameType {
        super::FrameType::MaxStreamId
    }

    fn min_length(&self, _version: Version) -> usize {
        1 + 4
    }
}

// nom parser for MAX_STREAM_ID_FRAME
pub fn be_max_stream_id_frame(
    order: ByteOrder,
) -> impl Fn(&[u8]) -> nom::IResult<&[u8], MaxStreamIdFrame> {
    use nom::{Parser, combinator::map};

    use crate::version::ext::be_uint;
    move |input: &[u8]| {
        map(be_uint(order, 4), |id| MaxStreamIdFrame {
            stream_id: StreamId::from(id as u32),
        })
        .parse(input)
    }
}

impl<T: bytes::BufMut> super::io::WriteFrame<MaxStreamIdFrame> for T {
    fn put_frame(&mut self, frame: &MaxStreamIdFrame, version: Version) {
        use crate::version::ext::WriteUint;
        self.put_u8(MAX_STREAM_ID_FRAME_TYPE);
        self.put_uint_in(version.byte_order(), frame.stream_id.id() as u64, 4);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BeFrame, io::WriteFrame};

    #[test]
    fn test_read_max_stream_id_frame() {
        let buf = [0x12, 0x34, 0x56, 0x78];
        let (input, frame) = be_max_stream_id_frame(ByteOrder::Big)(&buf).unwrap();
        assert!(input.is_empty());
        assert_eq!(frame.stream_id, StreamId::from(0x12345678));

        let (_, frame) = be_max_stream_id_frame(ByteOrder::Little)(&buf).unwrap();
        assert_eq!(frame.stream_id, StreamId::from(0x78563412));
    }

    #[test]
    fn test_read_truncated_max_stream_id_frame() {
        let buf = [0x12, 0x34, 0x56, 0x78];
        for len in 0..buf.len() {
            assert!(be_max_stream_id_frame(ByteOrder::Big)(&buf[..len]).is_err());
        }
    }

    #[test]
    fn test_write_max_stream_id_frame() {
        let frame = MaxStreamIdFrame {
            stream_id: StreamId::from(0x12345678),
        };
        let mut buf = Vec::new();
        buf.put_frame(&frame, Version::V39);
        assert_eq!(buf, [MAX_STREAM_ID_FRAME_TYPE, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(frame.min_length(Version::V39), 5);

        let mut buf = Vec::new();
        buf.put_frame(&frame, Version::V37);
        assert_eq!(buf, [MAX_STREAM_ID_FRAME_TYPE, 0x78, 0x56, 0x34, 0x12]);
    }
}
