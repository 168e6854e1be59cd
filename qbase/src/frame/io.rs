use bytes::Bytes;

use super::{
    ack::ack_frame_with_flag, connection_close::be_connection_close_frame,
    max_data::be_max_data_frame, max_stream_data::be_max_stream_data_frame,
    max_stream_id::be_max_stream_id_frame, rst_stream::be_rst_stream_frame,
    stop_waiting::be_stop_waiting_frame, stream::stream_frame_header_with_flag,
    stream_blocked::be_stream_blocked_frame, *,
};

/// STREAM frames carry a data body, which is sliced out of `raw` without copying.
fn complete_frame(
    frame_type: FrameType,
    raw: Bytes,
    ctx: FrameContext,
) -> impl Fn(&[u8]) -> nom::IResult<&[u8], Frame> {
    use nom::{Parser, combinator::map};
    let order = ctx.version.byte_order();
    move |input: &[u8]| match frame_type {
        FrameType::Ping => Ok((input, Frame::Ping(PingFrame))),
        FrameType::Blocked => Ok((input, Frame::Blocked(BlockedFrame))),
        FrameType::RstStream => map(be_rst_stream_frame(order), Frame::RstStream).parse(input),
        FrameType::ConnectionClose => {
            map(be_connection_close_frame(order), Frame::ConnectionClose).parse(input)
        }
        FrameType::StopWaiting => map(
            be_stop_waiting_frame(order, ctx.packet_number, ctx.packet_number_len),
            Frame::StopWaiting,
        )
        .parse(input),
        FrameType::MaxData => map(be_max_data_frame(order), Frame::MaxData).parse(input),
        FrameType::MaxStreamData => {
            map(be_max_stream_data_frame(order), Frame::MaxStreamData).parse(input)
        }
        FrameType::MaxStreamId => {
            map(be_max_stream_id_frame(order), Frame::MaxStreamId).parse(input)
        }
        FrameType::StreamBlocked => {
            map(be_stream_blocked_frame(order), Frame::StreamBlocked).parse(input)
        }
        FrameType::Ack(flag) => map(ack_frame_with_flag(flag, order), Frame::Ack).parse(input),
        FrameType::Stream(flag) => {
            let (input, header) = stream_frame_header_with_flag(flag, order)(input)?;
            let start = raw.len() - input.len();
            let len = match header.data_len {
                Some(len) if len > input.len() => {
                    return Err(nom::Err::Error(nom::error::make_error(
                        input,
                        nom::error::ErrorKind::Eof,
                    )));
                }
                Some(len) => len,
                // the data runs to the end of the packet
                None => input.len(),
            };
            if len == 0 && !header.fin {
                return Err(nom::Err::Error(nom::error::make_error(
                    input,
                    nom::error::ErrorKind::Verify,
                )));
            }
            let frame = StreamFrame {
                stream_id: header.stream_id,
                offset: header.offset,
                data: raw.slice(start..start + len),
                fin: header.fin,
                data_len_present: header.data_len.is_some(),
            };
            Ok((&input[len..], Frame::Stream(frame)))
        }
        FrameType::Padding => Err(nom::Err::Error(nom::error::make_error(
            input,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

/// Parse the frame at the front of `raw`, returning the number of bytes it
/// occupied together with the frame.
pub fn be_frame(raw: &Bytes, ctx: &FrameContext) -> Result<(usize, Frame), Error> {
    let input = raw.as_ref();
    let (remain, frame_type) = be_frame_type(input)?;

    let (remain, frame) =
        complete_frame(frame_type, raw.clone(), *ctx)(remain).map_err(|e| match e {
            nom::Err::Error(ne) | nom::Err::Failure(ne)
                if ne.code == nom::error::ErrorKind::Eof =>
            {
                Error::IncompleteFrame(frame_type, ne.code.description().to_owned())
            }
            nom::Err::Error(ne) | nom::Err::Failure(ne) => {
                // Verify in ACK, STOP_WAITING and STREAM frames,
                // or a CONNECTION_CLOSE reason that is no UTF-8
                Error::ParseError(frame_type, ne.code.description().to_owned())
            }
            nom::Err::Incomplete(needed) => {
                Error::IncompleteFrame(frame_type, format!("{needed:?}"))
            }
        })?;
    Ok((input.len() - remain.len(), frame))
}

/// A [`bytes::BufMut`] extension trait, makes buffer more friendly to write frames.
///
/// Fields are written in the byte order of `version`.
pub trait WriteFrame<F> {
    fn put_frame(&mut self, frame: &F, version: Version);
}

impl<T: bytes::BufMut> WriteFrame<Frame> for T {
    fn put_frame(&mut self, frame: &Frame, version: Version) {
        match frame {
            Frame::Stream(frame) => self.put_frame(frame, version),
            Frame::Ack(frame) => self.put_frame(frame, version),
            Frame::StopWaiting(frame) => self.put_frame(frame, version),
            Frame::ConnectionClose(frame) => self.put_frame(frame, version),
            Frame::MaxData(frame) => self.put_frame(frame, version),
            Frame::MaxStreamData(frame) => self.put_frame(frame, version),
            Frame::MaxStreamId(frame) => self.put_frame(frame, version),
            Frame::RstStream(frame) => self.put_frame(frame, version),
            Frame::Blocked(frame) => self.put_frame(frame, version),
            Frame::StreamBlocked(frame) => self.put_frame(frame, version),
            Frame::Ping(frame) => self.put_frame(frame, version),
        }
    }
}
