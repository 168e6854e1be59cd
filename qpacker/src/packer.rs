use std::{fmt, sync::Arc, time::Instant};

use bytes::Bytes;
use qbase::{
    cid::ConnectionId,
    config::Config,
    frame::{
        AckFrame, BeFrame, ConnectionCloseFrame, DATA_LEN_SIZE, Frame, StopWaitingFrame,
        io::WriteFrame,
    },
    handshake::{ArcSealer, CryptoSetup},
    packet::{
        EncodeHeader, EncryptionLevel, Header, LongHeader, PacketNumberLen, PacketType,
        PublicHeader, ShortHeader, WriteHeader,
    },
    role::Role,
    version::Version,
};
use qrecovery::{framer::StreamFramer, number::PacketNumberGenerator, sent::Packet};

use crate::error::{Bug, Error};

fn bug(bug: Bug) -> Error {
    tracing::error!(target: "quic", "{bug}");
    Error::Bug(bug)
}

/// A sealed packet ready for the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedPacket {
    pub header: Header,
    pub raw: Bytes,
    pub frames: Vec<Frame>,
    pub encryption_level: EncryptionLevel,
}

impl PackedPacket {
    pub fn packet_number(&self) -> u64 {
        self.header.packet_number()
    }

    /// What the sent packet handler keeps of this packet.
    pub fn into_packet(self, send_time: Instant) -> Packet {
        Packet {
            packet_number: self.header.packet_number(),
            frames: self.frames,
            length: self.raw.len() as u64,
            encryption_level: self.encryption_level,
            send_time,
        }
    }
}

/// Turns queued frames and stream data into sealed packets.
///
/// The header shape follows the version and the encryption level, the
/// payload is bounded by the configured packet size minus the header and the
/// sealing overhead. A packet number is only consumed by a packet that is
/// actually produced.
pub struct PacketPacker {
    connection_id: ConnectionId,
    role: Role,
    version: Version,
    crypto_setup: Arc<dyn CryptoSetup>,
    packet_number_generator: PacketNumberGenerator,
    framer: StreamFramer,

    control_frames: Vec<Frame>,
    stop_waiting: Option<StopWaitingFrame>,
    ack: Option<AckFrame>,
    // a lone ACK is only worth a packet if somebody asked for it
    ack_requested: bool,

    least_unacked: u64,
    omit_connection_id: bool,
    has_sent_packet: bool,
    max_packet_size: usize,
    non_forward_secure_packet_size_reduction: usize,
}

impl fmt::Debug for PacketPacker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketPacker")
            .field("connection_id", &self.connection_id)
            .field("role", &self.role)
            .field("version", &self.version)
            .field("next_packet_number", &self.packet_number_generator.peek())
            .field("control_frames", &self.control_frames.len())
            .field("stop_waiting", &self.stop_waiting)
            .field("ack", &self.ack)
            .finish()
    }
}

impl PacketPacker {
    pub fn new(
        connection_id: ConnectionId,
        role: Role,
        version: Version,
        crypto_setup: Arc<dyn CryptoSetup>,
        framer: StreamFramer,
        config: &Config,
    ) -> Self {
        Self {
            connection_id,
            role,
            version,
            crypto_setup,
            packet_number_generator: PacketNumberGenerator::new(config.skip_packet_average_period()),
            framer,
            control_frames: Vec::new(),
            stop_waiting: None,
            ack: None,
            ack_requested: false,
            least_unacked: 0,
            omit_connection_id: false,
            has_sent_packet: false,
            max_packet_size: config.max_packet_size(),
            non_forward_secure_packet_size_reduction: config
                .non_forward_secure_packet_size_reduction(),
        }
    }

    pub fn framer(&self) -> &StreamFramer {
        &self.framer
    }

    pub fn framer_mut(&mut self) -> &mut StreamFramer {
        &mut self.framer
    }

    /// The number the next packet will carry.
    pub fn next_packet_number(&self) -> u64 {
        self.packet_number_generator.peek()
    }

    /// Queue a frame for the next packet. A STOP_WAITING or ACK frame
    /// replaces the one queued before, an ACK queued here is sent even
    /// if nothing else is.
    pub fn queue_control_frame(&mut self, frame: Frame) {
        match frame {
            Frame::StopWaiting(frame) => self.stop_waiting = Some(frame),
            Frame::Ack(frame) => {
                self.ack = Some(frame);
                self.ack_requested = true;
            }
            frame => self.control_frames.push(frame),
        }
    }

    /// Offer an ACK that only rides along in a packet sent anyway.
    pub fn piggyback_ack(&mut self, frame: AckFrame) {
        self.ack = Some(frame);
    }

    /// Queue the frames of a lost packet again.
    pub fn requeue(&mut self, frames: impl IntoIterator<Item = Frame>) {
        for frame in frames {
            match frame {
                Frame::Stream(frame) => self.framer.add_frame_for_retransmission(frame),
                Frame::Ack(_) | Frame::StopWaiting(_) => {}
                frame => self.control_frames.push(frame),
            }
        }
    }

    pub fn set_least_unacked(&mut self, least_unacked: u64) {
        self.least_unacked = least_unacked;
    }

    /// The peer agreed to forward-secure packets without a connection ID.
    pub fn set_omit_connection_id(&mut self) {
        self.omit_connection_id = true;
    }

    /// Pack the next packet. `None` if there is nothing worth sending.
    pub fn pack_packet(&mut self) -> Result<Option<PackedPacket>, Error> {
        if self.framer.has_crypto_stream_data()
            && let Some(packet) = self.pack_crypto_packet()?
        {
            return Ok(Some(packet));
        }

        let (encryption_level, sealer) = self.crypto_setup.sealer();
        let header = self.header(encryption_level);
        self.update_stop_waiting(&header);
        let max_size = self
            .max_packet_size
            .saturating_sub(sealer.overhead() + header.size());
        let can_send_data = self.can_send_data(encryption_level);
        let frames = self.compose_next_packet(max_size, can_send_data)?;

        if !self.is_worth_sending(&frames) {
            tracing::trace!(target: "quic", frames = frames.len(), "nothing worth a packet");
            return Ok(None);
        }
        self.stop_waiting = None;
        self.ack = None;
        self.ack_requested = false;

        let raw = self.write_and_seal(&header, &frames, &sealer)?;
        Ok(Some(PackedPacket {
            header,
            raw,
            frames,
            encryption_level,
        }))
    }

    fn pack_crypto_packet(&mut self) -> Result<Option<PackedPacket>, Error> {
        let (encryption_level, sealer) = self.crypto_setup.sealer_for_crypto_stream();
        let header = self.header(encryption_level);
        // room to retransmit it later with a longer header
        let max_len = self.max_packet_size.saturating_sub(
            sealer.overhead() + self.non_forward_secure_packet_size_reduction + header.size(),
        );
        let Some(frame) = self.framer.pop_crypto_stream_frame(max_len) else {
            return Ok(None);
        };
        let frames = vec![Frame::Stream(frame)];
        let raw = self.write_and_seal(&header, &frames, &sealer)?;
        Ok(Some(PackedPacket {
            header,
            raw,
            frames,
            encryption_level,
        }))
    }

    /// Pack the queued ACK frame, with the STOP_WAITING frame if one is
    /// queued, and nothing else.
    pub fn pack_ack_packet(&mut self) -> Result<PackedPacket, Error> {
        let Some(mut ack) = self.ack.take() else {
            return Err(bug(Bug::NoAckFrame));
        };
        self.ack_requested = false;
        ack.delay.get_or_insert(AckFrame::MAX_DELAY);

        let (encryption_level, sealer) = self.crypto_setup.sealer();
        let header = self.header(encryption_level);
        self.update_stop_waiting(&header);
        let mut frames = Vec::with_capacity(2);
        frames.extend(self.stop_waiting.take().map(Frame::StopWaiting));
        frames.push(Frame::Ack(ack));

        let raw = self.write_and_seal(&header, &frames, &sealer)?;
        Ok(PackedPacket {
            header,
            raw,
            frames,
            encryption_level,
        })
    }

    /// Pack a CONNECTION_CLOSE frame alone. Queued frames stay queued.
    pub fn pack_connection_close(&mut self, frame: ConnectionCloseFrame) -> Result<PackedPacket, Error> {
        let (encryption_level, sealer) = self.crypto_setup.sealer();
        let header = self.header(encryption_level);
        let frames = vec![Frame::ConnectionClose(frame)];
        let raw = self.write_and_seal(&header, &frames, &sealer)?;
        Ok(PackedPacket {
            header,
            raw,
            frames,
            encryption_level,
        })
    }

    /// Send the frames of a lost handshake packet again, sealed at the level
    /// it was sent at and led by the queued STOP_WAITING frame.
    pub fn pack_handshake_retransmission(&mut self, packet: &Packet) -> Result<PackedPacket, Error> {
        let encryption_level = packet.encryption_level;
        if encryption_level == EncryptionLevel::ForwardSecure {
            return Err(bug(Bug::ForwardSecureHandshakeRetransmission));
        }
        let sealer = self
            .crypto_setup
            .sealer_with_encryption_level(encryption_level)
            .ok_or(Error::NoSealer(encryption_level))?;
        if self.stop_waiting.is_none() {
            return Err(bug(Bug::MissingStopWaiting));
        }

        let header = self.header(encryption_level);
        self.update_stop_waiting(&header);
        let mut frames = Vec::with_capacity(packet.frames.len() + 1);
        frames.extend(self.stop_waiting.take().map(Frame::StopWaiting));
        frames.extend(packet.frames_for_retransmission().cloned());

        tracing::debug!(
            target: "quic",
            packet_number = packet.packet_number,
            %encryption_level,
            "retransmit handshake packet"
        );
        let raw = self.write_and_seal(&header, &frames, &sealer)?;
        Ok(PackedPacket {
            header,
            raw,
            frames,
            encryption_level,
        })
    }

    /// The client may send data as soon as the connection is secure, the
    /// server has to wait for forward security.
    fn can_send_data(&self, encryption_level: EncryptionLevel) -> bool {
        match self.role {
            Role::Client => encryption_level >= EncryptionLevel::Secure,
            Role::Server => encryption_level == EncryptionLevel::ForwardSecure,
        }
    }

    /// An empty packet, a lone STOP_WAITING and a lone ACK nobody asked
    /// for are not sent.
    fn is_worth_sending(&self, frames: &[Frame]) -> bool {
        match frames {
            [] | [Frame::StopWaiting(_)] => false,
            [Frame::Ack(_)] => self.ack_requested,
            _ => true,
        }
    }

    fn header(&self, encryption_level: EncryptionLevel) -> Header {
        let packet_number = self.packet_number_generator.peek();
        let packet_number_len = PacketNumberLen::for_header(packet_number, self.least_unacked);
        let forward_secure = encryption_level == EncryptionLevel::ForwardSecure;
        let connection_id = (!(self.omit_connection_id && forward_secure)).then_some(self.connection_id);

        if self.version.uses_ietf_header() {
            if !forward_secure {
                let packet_type = if !self.has_sent_packet && self.role == Role::Client {
                    PacketType::CLIENT_INITIAL
                } else {
                    self.crypto_setup.next_packet_type()
                };
                return Header::Long(LongHeader {
                    packet_type,
                    connection_id: self.connection_id,
                    packet_number,
                    version: self.version,
                });
            }
            return Header::Short(ShortHeader {
                connection_id,
                key_phase: false,
                packet_number,
                packet_number_len: packet_number_len.min(PacketNumberLen::Len4),
            });
        }

        let diversification_nonce = match (self.role, encryption_level) {
            (Role::Server, EncryptionLevel::Secure) => self.crypto_setup.diversification_nonce(),
            _ => None,
        };
        let version = (self.role == Role::Client && !forward_secure).then_some(self.version);
        Header::Public(PublicHeader {
            connection_id,
            version,
            diversification_nonce,
            packet_number,
            packet_number_len,
        })
    }

    // the delta of a STOP_WAITING frame is relative to the carrying packet
    fn update_stop_waiting(&mut self, header: &Header) {
        if let Some(frame) = self.stop_waiting.as_mut() {
            frame.packet_number = header.packet_number();
            frame.packet_number_len = header.packet_number_len();
        }
    }

    fn compose_next_packet(&mut self, max_frame_size: usize, can_send_data: bool) -> Result<Vec<Frame>, Error> {
        let mut frames = Vec::new();
        let mut payload_len = 0;

        if let Some(frame) = self.stop_waiting {
            payload_len += frame.min_length(self.version);
            frames.push(Frame::StopWaiting(frame));
        }
        if let Some(frame) = &self.ack {
            let mut frame = frame.clone();
            frame.delay.get_or_insert(AckFrame::MAX_DELAY);
            payload_len += frame.min_length(self.version);
            frames.push(Frame::Ack(frame));
        }
        // newest first
        while let Some(frame) = self.control_frames.last() {
            let len = frame.min_length(self.version);
            if payload_len + len > max_frame_size {
                break;
            }
            payload_len += len;
            frames.extend(self.control_frames.pop());
        }
        if payload_len > max_frame_size {
            return Err(bug(Bug::PayloadTooLarge));
        }
        if !can_send_data {
            return Ok(frames);
        }

        // every stream frame is sized with its data length, but the last one
        // goes without it
        let budget = max_frame_size + DATA_LEN_SIZE - payload_len;
        let mut stream_frames = self.framer.pop_stream_frames(budget);
        if let Some(last) = stream_frames.last_mut() {
            last.data_len_present = false;
        }
        frames.extend(stream_frames.into_iter().map(Frame::Stream));
        self.control_frames.extend(self.framer.pop_blocked_frames());
        Ok(frames)
    }

    fn write_and_seal(&mut self, header: &Header, frames: &[Frame], sealer: &ArcSealer) -> Result<Bytes, Error> {
        let mut header_buf = Vec::with_capacity(header.size());
        header_buf.put_header(header, self.version);
        let mut payload = Vec::with_capacity(self.max_packet_size);
        for frame in frames {
            payload.put_frame(frame, self.version);
        }
        if header_buf.len() + payload.len() + sealer.overhead() > self.max_packet_size {
            return Err(bug(Bug::PacketTooLarge));
        }

        let mut raw = Vec::with_capacity(header_buf.len() + payload.len() + sealer.overhead());
        raw.extend_from_slice(&header_buf);
        sealer.seal(&mut raw, &payload, header.packet_number(), &header_buf);

        let packet_number = self.packet_number_generator.pop();
        if packet_number != header.packet_number() {
            return Err(bug(Bug::PacketNumberMismatch));
        }
        self.has_sent_packet = true;
        tracing::trace!(
            target: "quic",
            packet_number,
            len = raw.len(),
            frames = frames.len(),
            "packed packet"
        );
        Ok(Bytes::from(raw))
    }
}
