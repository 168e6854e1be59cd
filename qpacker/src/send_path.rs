use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use qbase::{
    cid::ConnectionId,
    config::Config,
    error::QuicError,
    flow::ArcConnectionFlowController,
    frame::{AckFrame, ConnectionCloseFrame, Frame, PingFrame},
    handshake::CryptoSetup,
    packet::EncryptionLevel,
    role::Role,
    version::Version,
};
use qcongestion::{Control, NewReno};
use qrecovery::{
    framer::StreamFramer,
    sent::{Packet, SentPacketHandler},
    streams::StreamsMap,
};

use crate::{
    error::Error,
    packer::{PackedPacket, PacketPacker},
};

/// The send half of a connection.
///
/// Owned by the single task that sends for the connection. Each call to
/// [`SendPath::send`] drains whatever may be sent right now: retransmissions
/// first, then control frames, then stream data, until the congestion window
/// or the data runs out.
#[derive(Debug)]
pub struct SendPath {
    packer: PacketPacker,
    streams: StreamsMap,
    connection: ArcConnectionFlowController,
    sent_packet_handler: SentPacketHandler,
    pending_ack: Option<AckFrame>,
    handshake_complete: bool,
}

impl SendPath {
    pub fn new(
        connection_id: ConnectionId,
        role: Role,
        version: Version,
        crypto_setup: Arc<dyn CryptoSetup>,
        config: &Config,
    ) -> Self {
        Self::with_congestion_control(
            connection_id,
            role,
            version,
            crypto_setup,
            config,
            Box::new(NewReno::new()),
        )
    }

    pub fn with_congestion_control(
        connection_id: ConnectionId,
        role: Role,
        version: Version,
        crypto_setup: Arc<dyn CryptoSetup>,
        config: &Config,
        congestion: Box<dyn Control>,
    ) -> Self {
        let connection = ArcConnectionFlowController::new(
            config.initial_connection_send_window(),
            config.initial_connection_receive_window(),
            config.window_update_threshold(),
        );
        let streams = StreamsMap::new(role, version, config, connection.clone());
        let framer = StreamFramer::new(streams.clone(), connection.clone(), version);
        let packer = PacketPacker::new(connection_id, role, version, crypto_setup, framer, config);
        Self {
            packer,
            streams,
            connection,
            sent_packet_handler: SentPacketHandler::new(config, congestion),
            pending_ack: None,
            handshake_complete: false,
        }
    }

    pub fn streams(&self) -> &StreamsMap {
        &self.streams
    }

    pub fn sent_packet_handler(&self) -> &SentPacketHandler {
        &self.sent_packet_handler
    }

    /// An ACK the receive side wants sent, with a packet of its own if
    /// need be.
    pub fn queue_ack(&mut self, frame: AckFrame) {
        self.pending_ack = Some(frame);
    }

    /// An ACK that only goes out with a packet sent anyway.
    pub fn piggyback_ack(&mut self, frame: AckFrame) {
        self.packer.piggyback_ack(frame);
    }

    pub fn queue_control_frame(&mut self, frame: Frame) {
        self.packer.queue_control_frame(frame);
    }

    pub fn set_omit_connection_id(&mut self) {
        self.packer.set_omit_connection_id();
    }

    /// Handshake packets are neither acknowledged nor retransmitted from now
    /// on.
    pub fn set_handshake_complete(&mut self) {
        self.handshake_complete = true;
        self.sent_packet_handler.set_handshake_complete();
    }

    /// Pack and record everything that may be sent at `now`.
    pub fn send(&mut self, now: Instant) -> Result<Vec<PackedPacket>, Error> {
        let mut packets = Vec::new();
        self.packer
            .set_least_unacked(self.sent_packet_handler.least_unacked());
        for frame in self.streams.window_update_frames() {
            self.packer.queue_control_frame(frame);
        }
        let mut ack = self.pending_ack.take();
        if let Some(frame) = &ack {
            self.packer.queue_control_frame(Frame::Ack(frame.clone()));
        }
        // the peer has to acknowledge something now and then
        if self.sent_packet_handler.should_send_retransmittable_packet() {
            self.packer.queue_control_frame(Frame::Ping(PingFrame));
        }

        loop {
            if !self.sent_packet_handler.sending_allowed() {
                // an ACK still goes out, nothing else does
                if ack.is_some() {
                    self.queue_stop_waiting(false);
                    let packet = self.packer.pack_ack_packet()?;
                    self.record(packet, now, &mut packets)?;
                }
                break;
            }

            while let Some(packet) = self.sent_packet_handler.dequeue_packet_for_retransmission() {
                if packet.encryption_level != EncryptionLevel::ForwardSecure {
                    if self.handshake_complete {
                        continue;
                    }
                    tracing::debug!(
                        target: "quic",
                        packet_number = packet.packet_number,
                        "dequeue handshake retransmission"
                    );
                    self.queue_stop_waiting(true);
                    let packed = self.packer.pack_handshake_retransmission(&packet)?;
                    self.record(packed, now, &mut packets)?;
                    continue;
                }
                tracing::debug!(
                    target: "quic",
                    packet_number = packet.packet_number,
                    "dequeue retransmission"
                );
                self.requeue(packet);
            }

            let has_retransmission = self.packer.framer().has_frames_for_retransmission();
            if ack.is_some() || has_retransmission {
                self.queue_stop_waiting(has_retransmission);
            }

            let Some(packet) = self.packer.pack_packet()? else {
                break;
            };
            self.record(packet, now, &mut packets)?;
            ack = None;
        }

        self.streams.delete_closed_streams();
        Ok(packets)
    }

    /// Pack a CONNECTION_CLOSE for `error`. The packet is not tracked, the
    /// connection is gone after it.
    pub fn close(&mut self, error: QuicError) -> Result<PackedPacket, Error> {
        tracing::debug!(target: "quic", kind = ?error.kind(), reason = error.reason(), "close connection");
        self.packer
            .pack_connection_close(ConnectionCloseFrame::from(error))
    }

    /// Route a frame received from the peer to the part of the send path
    /// it concerns.
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        packet_number: u64,
        encryption_level: EncryptionLevel,
        rcv_time: Instant,
    ) -> Result<(), Error> {
        match frame {
            Frame::Ack(frame) => self.on_ack(frame, packet_number, encryption_level, rcv_time)?,
            Frame::Stream(frame) => self.streams.recv_stream_frame(frame)?,
            Frame::RstStream(frame) => self.streams.recv_rst_stream_frame(frame)?,
            Frame::MaxData(frame) => {
                if self.connection.recv_max_data_frame(frame) {
                    tracing::trace!(target: "quic", max_data = frame.max_data, "connection send window raised");
                }
            }
            Frame::MaxStreamData(frame) => self.streams.recv_max_stream_data_frame(frame)?,
            Frame::MaxStreamId(frame) => self.streams.recv_max_stream_id_frame(frame),
            Frame::Blocked(_) => tracing::debug!(target: "quic", "peer is blocked by connection flow control"),
            Frame::StreamBlocked(frame) => {
                tracing::debug!(target: "quic", stream_id = %frame.stream_id, "peer is blocked by stream flow control")
            }
            Frame::StopWaiting(_) | Frame::Ping(_) | Frame::ConnectionClose(_) => {}
        }
        Ok(())
    }

    pub fn on_ack(
        &mut self,
        frame: &AckFrame,
        packet_number: u64,
        encryption_level: EncryptionLevel,
        rcv_time: Instant,
    ) -> Result<(), Error> {
        self.sent_packet_handler
            .received_ack(frame, packet_number, encryption_level, rcv_time)?;
        Ok(())
    }

    pub fn alarm_timeout(&self) -> Option<Instant> {
        self.sent_packet_handler.alarm_timeout()
    }

    /// Fire the retransmission alarm if it is due. Returns whether it fired.
    pub fn on_alarm(&mut self, now: Instant) -> bool {
        if !self.sent_packet_handler.is_alarm_expired(now) {
            return false;
        }
        self.sent_packet_handler.on_alarm(now);
        true
    }

    pub fn time_until_send(&mut self, now: Instant) -> Duration {
        self.sent_packet_handler.time_until_send(now)
    }

    fn queue_stop_waiting(&mut self, force: bool) {
        if let Some(frame) = self.sent_packet_handler.stop_waiting_frame(force) {
            self.packer.queue_control_frame(Frame::StopWaiting(frame));
        }
    }

    fn requeue(&mut self, packet: Packet) {
        let streams = &self.streams;
        let frames = packet.frames.into_iter().filter(|frame| match frame {
            // a window update for a stream that is gone is moot
            Frame::MaxStreamData(frame) => streams.get(frame.stream_id).is_some(),
            _ => true,
        });
        self.packer.requeue(frames);
    }

    fn record(&mut self, packet: PackedPacket, now: Instant, packets: &mut Vec<PackedPacket>) -> Result<(), Error> {
        self.sent_packet_handler
            .sent_packet(packet.clone().into_packet(now))?;
        packets.push(packet);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use qbase::{
        error::ErrorKind,
        frame::{MaxDataFrame, MaxStreamDataFrame, StreamFrame},
        handshake::{ArcSealer, Sealer},
        packet::PacketType,
        sid::StreamId,
    };

    use super::*;

    struct NullSealer;

    impl Sealer for NullSealer {
        fn seal(&self, dst: &mut Vec<u8>, plaintext: &[u8], _pn: u64, _ad: &[u8]) {
            dst.extend_from_slice(plaintext);
            dst.extend_from_slice(&[0; 12]);
        }

        fn overhead(&self) -> usize {
            12
        }
    }

    struct MockCryptoSetup {
        level: Mutex<EncryptionLevel>,
        sealer: ArcSealer,
    }

    impl CryptoSetup for MockCryptoSetup {
        fn sealer(&self) -> (EncryptionLevel, ArcSealer) {
            (*self.level.lock().unwrap(), self.sealer.clone())
        }

        fn sealer_for_crypto_stream(&self) -> (EncryptionLevel, ArcSealer) {
            self.sealer()
        }

        fn sealer_with_encryption_level(&self, _level: EncryptionLevel) -> Option<ArcSealer> {
            Some(self.sealer.clone())
        }

        fn diversification_nonce(&self) -> Option<[u8; 32]> {
            None
        }

        fn next_packet_type(&self) -> PacketType {
            PacketType::CLIENT_CLEARTEXT
        }
    }

    fn send_path(role: Role, level: EncryptionLevel) -> (SendPath, Arc<MockCryptoSetup>) {
        let crypto = Arc::new(MockCryptoSetup {
            level: Mutex::new(level),
            sealer: ArcSealer::new(NullSealer),
        });
        let path = SendPath::new(
            ConnectionId::new(42),
            role,
            Version::V39,
            crypto.clone(),
            &Config::default(),
        );
        (path, crypto)
    }

    // skipped packet numbers must stay out of the ranges
    fn ack_all(packets: &[PackedPacket]) -> AckFrame {
        let mut ranges = Vec::new();
        let mut numbers = packets.iter().map(PackedPacket::packet_number).rev().peekable();
        while let Some(high) = numbers.next() {
            let mut low = high;
            while numbers.next_if_eq(&(low - 1)).is_some() {
                low -= 1;
            }
            ranges.push(low..=high);
        }
        AckFrame::new(ranges)
    }

    #[test]
    fn test_nothing_to_send() {
        let (mut path, _) = send_path(Role::Server, EncryptionLevel::ForwardSecure);
        assert!(path.send(Instant::now()).unwrap().is_empty());
    }

    #[test]
    fn test_send_stream_data() {
        let (mut path, _) = send_path(Role::Server, EncryptionLevel::ForwardSecure);
        let stream = path.streams().open_stream().unwrap();
        stream.write(&[0xab; 3000]).unwrap();
        let packets = path.send(Instant::now()).unwrap();
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|packet| packet.raw.len() <= 1350));
        let sent = packets
            .iter()
            .flat_map(|packet| &packet.frames)
            .map(|frame| match frame {
                Frame::Stream(frame) => frame.data.len(),
                frame => panic!("unexpected frame {frame:?}"),
            })
            .sum::<usize>();
        assert_eq!(sent, 3000);
        let in_flight = packets.iter().map(|packet| packet.raw.len() as u64).sum::<u64>();
        assert_eq!(path.sent_packet_handler().bytes_in_flight(), in_flight);
    }

    #[test]
    fn test_queued_ack_is_sent_alone() {
        let (mut path, _) = send_path(Role::Server, EncryptionLevel::ForwardSecure);
        path.queue_ack(AckFrame::new(vec![1..=3]));
        let packets = path.send(Instant::now()).unwrap();
        assert_eq!(packets.len(), 1);
        assert!(matches!(&packets[0].frames[..], [Frame::Ack(_)]));
        // not retransmittable, nothing in flight
        assert_eq!(path.sent_packet_handler().bytes_in_flight(), 0);
        assert!(path.send(Instant::now()).unwrap().is_empty());
    }

    #[test]
    fn test_ack_clears_bytes_in_flight() {
        let (mut path, _) = send_path(Role::Server, EncryptionLevel::ForwardSecure);
        let now = Instant::now();
        path.streams().open_stream().unwrap().write(b"foobar").unwrap();
        let packets = path.send(now).unwrap();
        assert_eq!(packets.len(), 1);

        let ack = Frame::Ack(ack_all(&packets));
        path.handle_frame(
            &ack,
            1,
            EncryptionLevel::ForwardSecure,
            now + Duration::from_millis(20),
        )
        .unwrap();
        assert_eq!(path.sent_packet_handler().bytes_in_flight(), 0);
        assert_eq!(
            path.sent_packet_handler().rtt_stats().latest_rtt(),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_ack_for_unsent_packet() {
        let (mut path, _) = send_path(Role::Server, EncryptionLevel::ForwardSecure);
        let error = path
            .on_ack(
                &AckFrame::new(vec![1..=100]),
                1,
                EncryptionLevel::ForwardSecure,
                Instant::now(),
            )
            .unwrap_err();
        let Error::Quic(error) = error else {
            panic!("expected a protocol violation, got {error:?}");
        };
        assert_eq!(error.kind(), ErrorKind::InvalidAckData);
    }

    #[test]
    fn test_retransmission_after_timeout() {
        let (mut path, _) = send_path(Role::Server, EncryptionLevel::ForwardSecure);
        path.set_handshake_complete();
        let now = Instant::now();
        path.streams().open_stream().unwrap().write(b"foobar").unwrap();
        let first = path.send(now).unwrap();
        assert_eq!(first.len(), 1);

        let alarm = path.alarm_timeout().unwrap();
        assert!(!path.on_alarm(now));
        assert!(path.on_alarm(alarm));

        let retransmission = path.send(alarm).unwrap();
        assert_eq!(retransmission.len(), 1);
        assert!(retransmission[0].packet_number() > first[0].packet_number());
        let stream_frames = retransmission[0]
            .frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Stream(frame) => Some(frame),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(stream_frames.len(), 1);
        assert_eq!(stream_frames[0].data, "foobar");
        // led by a STOP_WAITING frame for the lost packet
        assert!(matches!(
            &retransmission[0].frames[0],
            Frame::StopWaiting(frame) if frame.least_unacked > first[0].packet_number()
        ));
    }

    #[test]
    fn test_handshake_retransmission() {
        let (mut path, crypto) = send_path(Role::Client, EncryptionLevel::Unencrypted);
        let now = Instant::now();
        path.streams().crypto_stream().write(b"chlo").unwrap();
        let first = path.send(now).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].encryption_level, EncryptionLevel::Unencrypted);

        *crypto.level.lock().unwrap() = EncryptionLevel::Secure;
        let alarm = path.alarm_timeout().unwrap();
        assert!(path.on_alarm(alarm));
        let retransmission = path.send(alarm).unwrap();
        assert_eq!(retransmission.len(), 1);
        // still sealed at the level of the lost packet
        assert_eq!(retransmission[0].encryption_level, EncryptionLevel::Unencrypted);
        assert!(matches!(
            &retransmission[0].frames[..],
            [Frame::StopWaiting(_), Frame::Stream(frame)] if frame.data == "chlo"
        ));
    }

    #[test]
    fn test_no_handshake_retransmission_after_handshake() {
        let (mut path, _) = send_path(Role::Client, EncryptionLevel::Unencrypted);
        let now = Instant::now();
        path.streams().crypto_stream().write(b"chlo").unwrap();
        assert_eq!(path.send(now).unwrap().len(), 1);
        let alarm = path.alarm_timeout().unwrap();
        assert!(path.on_alarm(alarm));
        path.set_handshake_complete();
        assert!(path.send(alarm).unwrap().is_empty());
        assert_eq!(path.sent_packet_handler().bytes_in_flight(), 0);
    }

    #[test]
    fn test_window_updates() {
        let (mut path, _) = send_path(Role::Server, EncryptionLevel::ForwardSecure);
        let now = Instant::now();
        // the peer opens stream 3 and fills most of its window
        let frame = StreamFrame::new(StreamId::from(3), 0, Bytes::from(vec![0; 30 * 1024]));
        path.handle_frame(&Frame::Stream(frame), 1, EncryptionLevel::ForwardSecure, now)
            .unwrap();
        let stream = path.streams().accept_stream().unwrap();
        let mut buf = vec![0; 30 * 1024];
        assert_eq!(stream.read(&mut buf).unwrap(), 30 * 1024);

        let packets = path.send(now).unwrap();
        assert_eq!(packets.len(), 1);
        assert!(
            packets[0]
                .frames
                .iter()
                .any(|frame| matches!(frame, Frame::MaxStreamData(frame) if frame.stream_id == StreamId::from(3)))
        );
        // announced once
        assert!(path.send(now).unwrap().is_empty());
    }

    #[test]
    fn test_flow_control_frames_from_peer() {
        let (mut path, _) = send_path(Role::Server, EncryptionLevel::ForwardSecure);
        let now = Instant::now();
        let stream = path.streams().open_stream().unwrap();
        path.handle_frame(
            &Frame::MaxData(MaxDataFrame { max_data: 1 << 20 }),
            1,
            EncryptionLevel::ForwardSecure,
            now,
        )
        .unwrap();
        path.handle_frame(
            &Frame::MaxStreamData(MaxStreamDataFrame {
                stream_id: stream.stream_id(),
                max_stream_data: 1 << 20,
            }),
            2,
            EncryptionLevel::ForwardSecure,
            now,
        )
        .unwrap();
        assert_eq!(stream.send_window_size(), 1 << 20);
    }

    #[test]
    fn test_close() {
        let (mut path, _) = send_path(Role::Server, EncryptionLevel::ForwardSecure);
        let error = QuicError::with_default_fty(ErrorKind::InvalidAckData, "foobar");
        let packet = path.close(error.clone()).unwrap();
        assert_eq!(
            packet.frames,
            [Frame::ConnectionClose(ConnectionCloseFrame::from(error))]
        );
        assert_eq!(path.sent_packet_handler().bytes_in_flight(), 0);
    }

    #[test]
    fn test_ping_after_many_ack_only_packets() {
        let (mut path, _) = send_path(Role::Server, EncryptionLevel::ForwardSecure);
        let now = Instant::now();
        for i in 0..19 {
            path.queue_ack(AckFrame::new(vec![1..=i + 1]));
            let packets = path.send(now).unwrap();
            assert_eq!(packets.len(), 1);
            assert!(matches!(&packets[0].frames[..], [Frame::Ack(_)]));
        }
        // the PING rides with the next ACK instead of a packet of its own
        path.queue_ack(AckFrame::new(vec![1..=20]));
        let packets = path.send(now).unwrap();
        assert_eq!(packets.len(), 1);
        assert!(packets[0].frames.contains(&Frame::Ping(PingFrame)));
        assert!(!path.sent_packet_handler().should_send_retransmittable_packet());
        assert!(path.send(now).unwrap().is_empty());
    }
}
