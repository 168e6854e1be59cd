use bytes::{Buf, Bytes};
use enum_dispatch::enum_dispatch;

use crate::{packet::PacketNumberLen, version::Version};

mod ack;
mod blocked;
mod connection_close;
mod max_data;
mod max_stream_data;
mod max_stream_id;
mod ping;
mod rst_stream;
mod stop_waiting;
mod stream;
mod stream_blocked;

/// Error module for parsing frames
pub mod error;
/// IO module for frame encoding and decoding
pub mod io;

pub use ack::AckFrame;
pub use blocked::BlockedFrame;
pub use connection_close::ConnectionCloseFrame;
#[doc(hidden)]
pub use error::Error;
pub use max_data::MaxDataFrame;
pub use max_stream_data::MaxStreamDataFrame;
pub use max_stream_id::MaxStreamIdFrame;
pub use ping::PingFrame;
pub use rst_stream::RstStreamFrame;
pub use stop_waiting::StopWaitingFrame;
pub use stream::{DATA_LEN_SIZE, StreamFrame};
pub use stream_blocked::StreamBlockedFrame;

/// Define the basic behaviors for all kinds of frames
#[enum_dispatch]
pub trait BeFrame {
    /// Return the type of frame
    fn frame_type(&self) -> FrameType;

    /// Return the number of bytes the frame needs on the wire, excluding
    /// the payload of a STREAM frame.
    ///
    /// The packer budgets control frames with this value, and the stream framer
    /// uses it as the STREAM frame header length.
    fn min_length(&self, version: Version) -> usize;

    /// Return the exact number of bytes needed to encode this frame
    fn encoding_size(&self, version: Version) -> usize {
        self.min_length(version)
    }
}

/// The types of all frames this endpoint knows.
///
/// The `u8` carried by ACK and STREAM frames are the flag bits of the type byte.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FrameType {
    /// The rest of the packet is padding.
    Padding,
    /// RST_STREAM frame, see [`RstStreamFrame`].
    RstStream,
    /// CONNECTION_CLOSE frame, see [`ConnectionCloseFrame`].
    ConnectionClose,
    /// STOP_WAITING frame, see [`StopWaitingFrame`].
    StopWaiting,
    /// MAX_DATA frame, see [`MaxDataFrame`].
    MaxData,
    /// MAX_STREAM_DATA frame, see [`MaxStreamDataFrame`].
    MaxStreamData,
    /// MAX_STREAM_ID frame, see [`MaxStreamIdFrame`].
    MaxStreamId,
    /// PING frame, see [`PingFrame`].
    Ping,
    /// BLOCKED frame, see [`BlockedFrame`].
    Blocked,
    /// STREAM_BLOCKED frame, see [`StreamBlockedFrame`].
    StreamBlocked,
    /// ACK frame, see [`AckFrame`].
    Ack(u8),
    /// STREAM frame, see [`StreamFrame`].
    Stream(u8),
}

impl TryFrom<u8> for FrameType {
    type Error = Error;

    fn try_from(frame_type: u8) -> Result<Self, Self::Error> {
        Ok(match frame_type {
            0x00 => FrameType::Padding,
            0x01 => FrameType::RstStream,
            0x02 => FrameType::ConnectionClose,
            0x03 => FrameType::StopWaiting,
            0x04 => FrameType::MaxData,
            0x05 => FrameType::MaxStreamData,
            0x06 => FrameType::MaxStreamId,
            0x07 => FrameType::Ping,
            0x08 => FrameType::Blocked,
            0x09 => FrameType::StreamBlocked,
            // 0b01nLLMM: multiple blocks, largest acked length, block length length.
            ty @ 0x40..=0x7f => FrameType::Ack(ty & 0x3f),
            // 0b1FDOOOSS: fin, data length, offset length, stream ID length.
            ty @ 0x80..=0xff => FrameType::Stream(ty & 0x7f),
            _ => return Err(Self::Error::InvalidType(frame_type)),
        })
    }
}

impl From<FrameType> for u8 {
    fn from(frame_type: FrameType) -> Self {
        match frame_type {
            FrameType::Padding => 0x00,
            FrameType::RstStream => 0x01,
            FrameType::ConnectionClose => 0x02,
            FrameType::StopWaiting => 0x03,
            FrameType::MaxData => 0x04,
            FrameType::MaxStreamData => 0x05,
            FrameType::MaxStreamId => 0x06,
            FrameType::Ping => 0x07,
            FrameType::Blocked => 0x08,
            FrameType::StreamBlocked => 0x09,
            FrameType::Ack(flags) => 0x40 | flags,
            FrameType::Stream(flags) => 0x80 | flags,
        }
    }
}

/// Parse the frame type from the input buffer,
/// [nom](https://docs.rs/nom/latest/nom/) parser style.
pub fn be_frame_type(input: &[u8]) -> nom::IResult<&[u8], FrameType, Error> {
    let (remain, frame_type) = nom::number::complete::be_u8(input)?;
    let frame_type = FrameType::try_from(frame_type).map_err(nom::Err::Error)?;
    Ok((remain, frame_type))
}

/// Sum type of all the frames.
#[derive(Debug, Clone, Eq, PartialEq)]
#[enum_dispatch(BeFrame)]
pub enum Frame {
    /// STREAM frame, see [`StreamFrame`].
    Stream(StreamFrame),
    /// ACK frame, see [`AckFrame`].
    Ack(AckFrame),
    /// STOP_WAITING frame, see [`StopWaitingFrame`].
    StopWaiting(StopWaitingFrame),
    /// CONNECTION_CLOSE frame, see [`ConnectionCloseFrame`].
    ConnectionClose(ConnectionCloseFrame),
    /// MAX_DATA frame, see [`MaxDataFrame`].
    MaxData(MaxDataFrame),
    /// MAX_STREAM_DATA frame, see [`MaxStreamDataFrame`].
    MaxStreamData(MaxStreamDataFrame),
    /// MAX_STREAM_ID frame, see [`MaxStreamIdFrame`].
    MaxStreamId(MaxStreamIdFrame),
    /// RST_STREAM frame, see [`RstStreamFrame`].
    RstStream(RstStreamFrame),
    /// BLOCKED frame, see [`BlockedFrame`].
    Blocked(BlockedFrame),
    /// STREAM_BLOCKED frame, see [`StreamBlockedFrame`].
    StreamBlocked(StreamBlockedFrame),
    /// PING frame, see [`PingFrame`].
    Ping(PingFrame),
}

impl Frame {
    /// ACK and STOP_WAITING frames echo connection state at the time they
    /// were sent, retransmitting them would echo stale state.
    pub fn is_retransmittable(&self) -> bool {
        !matches!(self, Frame::Ack(_) | Frame::StopWaiting(_))
    }
}

/// What a frame parser needs to know about the packet carrying the frame.
///
/// STOP_WAITING encodes its least unacked packet as a delta to the packet
/// number, in as many bytes as the header used for the packet number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    pub version: Version,
    pub packet_number: u64,
    pub packet_number_len: PacketNumberLen,
}

/// Reads frames from a buffer until the packet buffer is empty,
/// or until padding is reached.
pub struct FrameReader {
    payload: Bytes,
    context: FrameContext,
}

impl FrameReader {
    /// Creates a [`FrameReader`] for the payload of a packet described by `context`.
    pub fn new(payload: Bytes, context: FrameContext) -> Self {
        Self { payload, context }
    }
}

impl Iterator for FrameReader {
    type Item = Result<Frame, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        // padding extends to the end of the packet
        if self.payload.first().is_none_or(|ty| *ty == 0) {
            self.payload.clear();
            return None;
        }

        match io::be_frame(&self.payload, &self.context) {
            Ok((consumed, frame)) => {
                self.payload.advance(consumed);
                Some(Ok(frame))
            }
            Err(e) => {
                self.payload.clear(); // no longer parsing
                Some(Err(e))
            }
        }
    }
}
