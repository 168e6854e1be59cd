// STREAM Frame {
//   Type (8) = 0b1FDOOOSS,
//   Stream ID (8..32),
//   [Offset (16..64)],
//   [Data Length (16)],
//   Stream Data (..),
// }
//
// F is the fin bit, D tells whether the data length is present, OOO encodes
// the offset width (0, 2, 3, .., 8 bytes) and SS the stream ID width minus one.

use bytes::Bytes;

use crate::{
    sid::StreamId,
    version::{ByteOrder, Version},
};

/// Size of the data length field of a STREAM frame.
pub const DATA_LEN_SIZE: usize = 2;

const STREAM_FRAME_TYPE: u8 = 0x80;
const FIN_BIT: u8 = 0x40;
const DATA_LEN_BIT: u8 = 0x20;

/// A chunk of stream data.
///
/// Only the last STREAM frame of a packet may omit its data length, its data
/// then runs to the end of the packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFrame {
    pub stream_id: StreamId,
    pub offset: u64,
    pub data: Bytes,
    pub fin: bool,
    pub data_len_present: bool,
}

impl super::BeFrame for StreamFrame {
    fn frame_type(&self) -> super::FrameType {
        super::FrameType::Stream(self.type_byte() & 0x7f)
    }

    /// The header of the frame, without the data.
    fn min_length(&self, _version: Version) -> usize {
        1 + self.stream_id.encoding_size()
            + self.offset_len()
            + if self.data_len_present {
                DATA_LEN_SIZE
            } else {
                0
            }
    }

    fn encoding_size(&self, version: Version) -> usize {
        self.min_length(version) + self.data.len()
    }
}

impl StreamFrame {
    pub fn new(stream_id: StreamId, offset: u64, data: Bytes) -> Self {
        Self {
            stream_id,
            offset,
            data,
            fin: false,
            data_len_present: false,
        }
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// The offset right after the last byte of this frame.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    /// Like [`StreamFrame::end`], but `None` if the frame reaches past the
    /// largest offset a stream can have. Use it on frames from the peer.
    pub fn checked_end(&self) -> Option<u64> {
        self.offset.checked_add(self.data.len() as u64)
    }

    fn offset_len(&self) -> usize {
        match self.offset {
            0 => 0,
            1..=0xffff => 2,
            _ => 8 - (self.offset.leading_zeros() as usize / 8),
        }
    }

    fn type_byte(&self) -> u8 {
        let mut ty = STREAM_FRAME_TYPE;
        if self.fin {
            ty |= FIN_BIT;
        }
        if self.data_len_present {
            ty |= DATA_LEN_BIT;
        }
        let offset_len = self.offset_len();
        if offset_len > 0 {
            ty |= ((offset_len - 1) as u8) << 2;
        }
        ty | (self.stream_id.encoding_size() - 1) as u8
    }

    /// Cut the first `n` bytes of data off into a frame of their own, leaving
    /// the rest in `self`. Returns `None` if the frame holds no more than `n`
    /// bytes.
    ///
    /// The front part never carries the fin bit.
    pub fn split_off_front(&mut self, n: usize) -> Option<StreamFrame> {
        if n >= self.data.len() {
            return None;
        }
        let front = StreamFrame {
            stream_id: self.stream_id,
            offset: self.offset,
            data: self.data.split_to(n),
            fin: false,
            data_len_present: self.data_len_present,
        };
        self.offset += n as u64;
        Some(front)
    }
}

/// Everything of a STREAM frame except the data, which the caller slices out
/// of the packet buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFrameHeader {
    pub stream_id: StreamId,
    pub offset: u64,
    pub fin: bool,
    pub data_len: Option<usize>,
}

/// Return a parser for a STREAM frame header with the given type flags,
/// [nom](https://docs.rs/nom/latest/nom/) parser style.
pub fn stream_frame_header_with_flag(
    flag: u8,
    order: ByteOrder,
) -> impl Fn(&[u8]) -> nom::IResult<&[u8], StreamFrameHeader> {
    use crate::version::ext::be_uint;
    let fin = flag & FIN_BIT != 0;
    let has_data_len = flag & DATA_LEN_BIT != 0;
    let offset_len = match (flag >> 2) & 0b111 {
        0 => 0,
        n => n as usize + 1,
    };
    let sid_len = (flag & 0b11) as usize + 1;
    move |input: &[u8]| {
        let (remain, stream_id) = be_uint(order, sid_len)(input)?;
        let (remain, offset) = be_uint(order, offset_len)(remain)?;
        let (remain, data_len) = if has_data_len {
            let (remain, len) = be_uint(order, DATA_LEN_SIZE)(remain)?;
            (remain, Some(len as usize))
        } else {
            (remain, None)
        };
        Ok((
            remain,
            StreamFrameHeader {
                stream_id: StreamId::from(stream_id as u32),
                offset,
                fin,
                data_len,
            },
        ))
    }
}

impl<T: bytes::BufMut> super::io::WriteFrame<StreamFrame> for T {
    fn put_frame(&mut self, frame: &StreamFrame, version: Version) {
        use crate::version::ext::WriteUint;
        let order = version.byte_order();
        self.put_u8(frame.type_byte());
        self.put_uint_in(
            order,
            frame.stream_id.id() as u64,
            frame.stream_id.encoding_size(),
        );
        self.put_uint_in(order, frame.offset, frame.offset_len());
        if frame.data_len_present {
            debug_assert!(frame.data.len() <= u16::MAX as usize);
            self.put_uint_in(order, frame.data.len() as u64, DATA_LEN_SIZE);
        }
        self.put_slice(&frame.data);
    }
}
