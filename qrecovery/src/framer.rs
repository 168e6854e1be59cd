use std::collections::VecDeque;

use qbase::{
    flow::ArcConnectionFlowController,
    frame::{BeFrame, BlockedFrame, Frame, StreamBlockedFrame, StreamFrame},
    version::Version,
};

use crate::streams::{ArcStream, StreamsMap};

/// Cuts stream data into STREAM frames that fit a packet.
///
/// Frames lost in earlier packets go first, then fresh data of the streams
/// in round robin. Every frame comes out with its data length present, the
/// packer drops the length of the last frame of a packet.
#[derive(Debug)]
pub struct StreamFramer {
    streams: StreamsMap,
    connection: ArcConnectionFlowController,
    version: Version,
    retransmission_queue: VecDeque<StreamFrame>,
    blocked_queue: Vec<Frame>,
}

impl StreamFramer {
    pub fn new(streams: StreamsMap, connection: ArcConnectionFlowController, version: Version) -> Self {
        Self {
            streams,
            connection,
            version,
            retransmission_queue: VecDeque::new(),
            blocked_queue: Vec::new(),
        }
    }

    pub fn add_frame_for_retransmission(&mut self, frame: StreamFrame) {
        self.retransmission_queue.push_back(frame);
    }

    pub fn has_frames_for_retransmission(&self) -> bool {
        !self.retransmission_queue.is_empty()
    }

    pub fn has_crypto_stream_data(&self) -> bool {
        self.streams.crypto_stream().len_of_data_for_writing() > 0
    }

    /// The next chunk of the crypto stream, at most `max_len` bytes on the wire
    /// header included. It is sent alone, so its data length is omitted.
    pub fn pop_crypto_stream_frame(&mut self, max_len: usize) -> Option<StreamFrame> {
        let crypto = self.streams.crypto_stream();
        let mut frame = StreamFrame::new(crypto.stream_id(), crypto.write_offset(), Default::default());
        let header_len = frame.min_length(self.version);
        frame.data = crypto.data_for_writing(max_len.checked_sub(header_len)?)?;
        Some(frame)
    }

    /// Frames filling at most `max_total_len` bytes.
    pub fn pop_stream_frames(&mut self, max_total_len: usize) -> Vec<StreamFrame> {
        let (mut frames, current_len) = self.pop_frames_for_retransmission(max_total_len);
        frames.extend(self.pop_normal_frames(max_total_len - current_len));
        frames
    }

    /// The BLOCKED and STREAM_BLOCKED frames queued while framing.
    pub fn pop_blocked_frames(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.blocked_queue)
    }

    fn pop_frames_for_retransmission(&mut self, max_total_len: usize) -> (Vec<StreamFrame>, usize) {
        let mut frames = Vec::new();
        let mut current_len = 0;
        while let Some(frame) = self.retransmission_queue.front_mut() {
            frame.data_len_present = true;
            let header_len = frame.min_length(self.version);
            if current_len + header_len >= max_total_len {
                break;
            }
            current_len += header_len;

            if let Some(front) = frame.split_off_front(max_total_len - current_len) {
                current_len += front.data_len();
                frames.push(front);
                break;
            }
            let Some(frame) = self.retransmission_queue.pop_front() else {
                break;
            };
            current_len += frame.data_len();
            frames.push(frame);
        }
        (frames, current_len)
    }

    fn pop_normal_frames(&mut self, max_bytes: usize) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        let mut current_len = 0;
        let version = self.version;
        let connection = &self.connection;
        let blocked_queue = &mut self.blocked_queue;

        self.streams.round_robin(|stream: &ArcStream| {
            let mut frame = StreamFrame::new(stream.stream_id(), stream.write_offset(), Default::default());
            frame.data_len_present = true;
            let header_len = frame.min_length(version);
            if current_len + header_len > max_bytes {
                return false;
            }

            let mut max_len = max_bytes - current_len - header_len;
            let pending = stream.len_of_data_for_writing();
            if pending != 0 {
                let window = usize::try_from(stream.send_window_size()).unwrap_or(usize::MAX);
                max_len = max_len.min(window);
            }
            if max_len == 0 {
                return true;
            }

            let data = if pending != 0 {
                stream.data_for_writing(max_len)
            } else {
                None
            };
            let should_send_fin = stream.should_send_fin();
            if data.is_none() && !should_send_fin {
                return true;
            }
            if should_send_fin {
                frame.fin = true;
                stream.sent_fin();
            }
            frame.data = data.unwrap_or_default();

            if !frame.fin && stream.is_flow_control_blocked() {
                tracing::debug!(target: "quic", stream_id = %frame.stream_id, "stream is blocked by flow control");
                blocked_queue.push(Frame::StreamBlocked(StreamBlockedFrame {
                    stream_id: frame.stream_id,
                }));
            }
            if connection.is_blocked() && !blocked_queue.contains(&Frame::Blocked(BlockedFrame)) {
                tracing::debug!(target: "quic", "connection is blocked by flow control");
                blocked_queue.push(Frame::Blocked(BlockedFrame));
            }

            current_len += header_len + frame.data_len();
            frames.push(frame);
            current_len != max_bytes
        });
        frames
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use qbase::{
        config::{Config, ConfigBuilder},
        role::Role,
        sid::StreamId,
    };

    use super::*;

    fn framer_with(config: Config) -> (StreamsMap, StreamFramer) {
        let connection = ArcConnectionFlowController::new(
            config.initial_connection_send_window(),
            config.initial_connection_receive_window(),
            config.window_update_threshold(),
        );
        let streams = StreamsMap::new(Role::Client, Version::V39, &config, connection.clone());
        let framer = StreamFramer::new(streams.clone(), connection, Version::V39);
        (streams, framer)
    }

    fn framer() -> (StreamsMap, StreamFramer) {
        framer_with(Config::default())
    }

    fn retransmission(offset: u64, data: &'static [u8]) -> StreamFrame {
        StreamFrame::new(StreamId::from(3), offset, Bytes::from_static(data))
    }

    #[test]
    fn test_pop_fresh_data() {
        let (streams, mut framer) = framer();
        let stream = streams.open_stream().unwrap();
        stream.write(b"foobar").unwrap();
        let frames = framer.pop_stream_frames(1000);
        assert_eq!(
            frames,
            [StreamFrame {
                stream_id: StreamId::from(3),
                offset: 0,
                data: Bytes::from_static(b"foobar"),
                fin: false,
                data_len_present: true,
            }]
        );
        assert!(framer.pop_stream_frames(1000).is_empty());
    }

    #[test]
    fn test_retransmissions_go_first() {
        let (streams, mut framer) = framer();
        let stream = streams.open_stream().unwrap();
        stream.write(b"foobar").unwrap();
        framer.add_frame_for_retransmission(retransmission(0x10, b"lost"));
        assert!(framer.has_frames_for_retransmission());

        let frames = framer.pop_stream_frames(1000);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "lost");
        assert!(frames[0].data_len_present);
        assert_eq!(frames[1].data, "foobar");
        assert!(!framer.has_frames_for_retransmission());
    }

    #[test]
    fn test_retransmission_exact_fit() {
        let (_, mut framer) = framer();
        framer.add_frame_for_retransmission(retransmission(0x10, b"foobar"));
        // type, stream id, 2 bytes offset and 2 bytes length
        let frames = framer.pop_stream_frames(6 + 6);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "foobar");
        assert!(!framer.has_frames_for_retransmission());
    }

    #[test]
    fn test_split_retransmission() {
        let (_, mut framer) = framer();
        framer.add_frame_for_retransmission(retransmission(0x10, b"foobar"));
        let frames = framer.pop_stream_frames(6 + 3);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].offset, 0x10);
        assert_eq!(frames[0].data, "foo");

        let frames = framer.pop_stream_frames(1000);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].offset, 0x13);
        assert_eq!(frames[0].data, "bar");
    }

    #[test]
    fn test_no_room_for_header() {
        let (_, mut framer) = framer();
        framer.add_frame_for_retransmission(retransmission(0x10, b"foobar"));
        assert!(framer.pop_stream_frames(6).is_empty());
        assert!(framer.has_frames_for_retransmission());
    }

    #[test]
    fn test_round_robin_between_streams() {
        let (streams, mut framer) = framer();
        for _ in 0..2 {
            streams.open_stream().unwrap().write(b"foobar").unwrap();
        }
        // type, stream id and length, without an offset
        let frames = framer.pop_stream_frames(4 + 3);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stream_id, StreamId::from(3));
        let frames = framer.pop_stream_frames(4 + 3);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stream_id, StreamId::from(5));

        let frames = framer.pop_stream_frames(1000);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|frame| frame.data == "bar" && frame.offset == 3));
    }

    #[test]
    fn test_fin_without_data() {
        let (streams, mut framer) = framer();
        let stream = streams.open_stream().unwrap();
        stream.close();
        let frames = framer.pop_stream_frames(1000);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].fin);
        assert!(frames[0].data.is_empty());
        assert!(framer.pop_stream_frames(1000).is_empty());
    }

    #[test]
    fn test_fin_with_last_data() {
        let (streams, mut framer) = framer();
        let stream = streams.open_stream().unwrap();
        stream.write(b"foobar").unwrap();
        stream.close();
        let frames = framer.pop_stream_frames(4 + 3);
        assert!(!frames[0].fin);
        let frames = framer.pop_stream_frames(1000);
        assert_eq!(frames[0].data, "bar");
        assert!(frames[0].fin);
    }

    #[test]
    fn test_stream_blocked() {
        let config = ConfigBuilder::default()
            .initial_stream_send_window(4u64)
            .build()
            .unwrap();
        let (streams, mut framer) = framer_with(config);
        let stream = streams.open_stream().unwrap();
        stream.write(b"foobar").unwrap();
        let frames = framer.pop_stream_frames(1000);
        assert_eq!(frames[0].data, "foob");
        assert_eq!(
            framer.pop_blocked_frames(),
            [Frame::StreamBlocked(StreamBlockedFrame {
                stream_id: StreamId::from(3),
            })]
        );
        assert!(framer.pop_blocked_frames().is_empty());
        // nothing more until the window grows
        assert!(framer.pop_stream_frames(1000).is_empty());
        stream.update_send_window(100);
        assert_eq!(framer.pop_stream_frames(1000)[0].data, "ar");
    }

    #[test]
    fn test_connection_blocked() {
        let config = ConfigBuilder::default()
            .initial_connection_send_window(4u64)
            .build()
            .unwrap();
        let (streams, mut framer) = framer_with(config);
        streams.open_stream().unwrap().write(b"foo").unwrap();
        streams.open_stream().unwrap().write(b"bar").unwrap();
        let frames = framer.pop_stream_frames(1000);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "foo");
        assert_eq!(frames[1].data, "b");
        assert_eq!(framer.pop_blocked_frames(), [Frame::Blocked(BlockedFrame)]);
    }

    #[test]
    fn test_crypto_stream_frame() {
        let (streams, mut framer) = framer();
        assert!(!framer.has_crypto_stream_data());
        streams.crypto_stream().write(b"chlo").unwrap();
        assert!(framer.has_crypto_stream_data());
        // the crypto stream is not part of the round robin
        assert!(framer.pop_stream_frames(1000).is_empty());

        // type and stream id, no offset and no length
        let frame = framer.pop_crypto_stream_frame(2 + 2).unwrap();
        assert_eq!(frame.stream_id, StreamId::from(1));
        assert_eq!(frame.data, "ch");
        assert!(!frame.data_len_present);
        let frame = framer.pop_crypto_stream_frame(1000).unwrap();
        assert_eq!(frame.offset, 2);
        assert_eq!(frame.data, "lo");
        assert_eq!(framer.pop_crypto_stream_frame(1000), None);
    }
}
