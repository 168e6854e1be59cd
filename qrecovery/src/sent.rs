use std::{
    collections::VecDeque,
    fmt,
    time::{Duration, Instant},
};

use deref_derive::{Deref, DerefMut};
use qbase::{
    config::Config,
    error::{ErrorKind, QuicError},
    frame::{AckFrame, Frame, StopWaitingFrame},
    packet::EncryptionLevel,
};
use qcongestion::{ConnectionStats, Control, RttStats};
use thiserror::Error;

/// The smoothed RTT assumed for the handshake timer before the first sample.
const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(100);

/// A packet that left, as the handler tracks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_number: u64,
    pub frames: Vec<Frame>,
    /// Size on the wire.
    pub length: u64,
    pub encryption_level: EncryptionLevel,
    pub send_time: Instant,
}

impl Packet {
    /// The frames worth sending again after this packet got lost.
    pub fn frames_for_retransmission(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().filter(|frame| frame.is_retransmittable())
    }
}

/// Misuse of the handler by the sending side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SentPacketError {
    #[error("packet number {packet_number} is not above the last sent packet number {last_sent}")]
    NotIncreasing { packet_number: u64, last_sent: u64 },
    #[error("too many outstanding packets")]
    TooManyTracked,
}

/// Outstanding retransmittable packets, ordered by packet number.
#[derive(Debug, Default, Deref, DerefMut)]
struct PacketHistory {
    #[deref]
    packets: VecDeque<Packet>,
}

impl PacketHistory {
    fn position(&self, packet_number: u64) -> Option<usize> {
        self.packets
            .binary_search_by_key(&packet_number, |packet| packet.packet_number)
            .ok()
    }

    fn get(&self, packet_number: u64) -> Option<&Packet> {
        self.position(packet_number).and_then(|i| self.packets.get(i))
    }

    fn remove_packet(&mut self, packet_number: u64) -> Option<Packet> {
        self.position(packet_number)
            .and_then(|i| self.packets.remove(i))
    }
}

/// Decides when the peer has to be told to stop waiting for packets that
/// will never come.
#[derive(Debug, Default)]
struct StopWaitingManager {
    largest_least_unacked_sent: u64,
    next_least_unacked: u64,
    last_frame: Option<StopWaitingFrame>,
}

impl StopWaitingManager {
    fn stop_waiting_frame(&mut self, force: bool) -> Option<StopWaitingFrame> {
        if self.next_least_unacked <= self.largest_least_unacked_sent {
            return if force { self.last_frame } else { None };
        }
        self.largest_least_unacked_sent = self.next_least_unacked;
        let frame = StopWaitingFrame::new(self.next_least_unacked);
        self.last_frame = Some(frame);
        Some(frame)
    }

    fn received_ack(&mut self, ack: &AckFrame) {
        self.next_least_unacked = self.next_least_unacked.max(ack.largest_acked() + 1);
    }

    fn queued_retransmission(&mut self, packet_number: u64) {
        self.next_least_unacked = self.next_least_unacked.max(packet_number + 1);
    }
}

/// Tracks every sent packet until it is acknowledged or declared lost, and
/// drives the congestion controller with what it learns.
///
/// Lost packets wait in a retransmission queue until the send path takes
/// their frames out with [`SentPacketHandler::dequeue_packet_for_retransmission`].
pub struct SentPacketHandler {
    last_sent_packet_number: u64,
    skipped_packets: VecDeque<u64>,
    num_non_retransmittable_packets: usize,

    largest_acked: u64,
    largest_received_packet_with_ack: u64,

    packet_history: PacketHistory,
    retransmission_queue: VecDeque<Packet>,
    stop_waiting: StopWaitingManager,
    bytes_in_flight: u64,

    congestion: Box<dyn Control>,
    rtt: RttStats,

    handshake_complete: bool,
    // consecutive handshake and RTO alarms without an acknowledgment
    handshake_count: u32,
    rto_count: u32,
    loss_time: Option<Instant>,
    alarm: Option<Instant>,

    max_tracked_skipped_packets: usize,
    max_tracked_sent_packets: usize,
    max_non_retransmittable_packets: usize,
    reordering_threshold: u64,
    time_reordering_fraction: f64,
    min_retransmission_time: Duration,
    max_retransmission_time: Duration,
    default_retransmission_time: Duration,
    min_handshake_timeout: Duration,
}

impl fmt::Debug for SentPacketHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentPacketHandler")
            .field("last_sent_packet_number", &self.last_sent_packet_number)
            .field("largest_acked", &self.largest_acked)
            .field("outstanding", &self.packet_history.len())
            .field("retransmission_queue", &self.retransmission_queue.len())
            .field("bytes_in_flight", &self.bytes_in_flight)
            .field("rtt", &self.rtt)
            .finish()
    }
}

impl SentPacketHandler {
    pub fn new(config: &Config, congestion: Box<dyn Control>) -> Self {
        Self {
            last_sent_packet_number: 0,
            skipped_packets: VecDeque::new(),
            num_non_retransmittable_packets: 0,
            largest_acked: 0,
            largest_received_packet_with_ack: 0,
            packet_history: PacketHistory::default(),
            retransmission_queue: VecDeque::new(),
            stop_waiting: StopWaitingManager::default(),
            bytes_in_flight: 0,
            congestion,
            rtt: RttStats::new(),
            handshake_complete: false,
            handshake_count: 0,
            rto_count: 0,
            loss_time: None,
            alarm: None,
            max_tracked_skipped_packets: config.max_tracked_skipped_packets(),
            max_tracked_sent_packets: config.max_tracked_sent_packets(),
            max_non_retransmittable_packets: config.max_non_retransmittable_packets(),
            reordering_threshold: config.reordering_threshold(),
            time_reordering_fraction: config.time_reordering_fraction(),
            min_retransmission_time: config.min_retransmission_time(),
            max_retransmission_time: config.max_retransmission_time(),
            default_retransmission_time: config.default_retransmission_time(),
            min_handshake_timeout: config.min_handshake_timeout(),
        }
    }

    /// Record a packet that was just sent. Acknowledgment and stop waiting
    /// frames are dropped from it, a packet left without frames is not
    /// tracked at all.
    pub fn sent_packet(&mut self, mut packet: Packet) -> Result<(), SentPacketError> {
        let packet_number = packet.packet_number;
        if packet_number <= self.last_sent_packet_number {
            return Err(SentPacketError::NotIncreasing {
                packet_number,
                last_sent: self.last_sent_packet_number,
            });
        }
        if self.retransmission_queue.len() + self.packet_history.len() + 1
            > self.max_tracked_sent_packets
        {
            return Err(SentPacketError::TooManyTracked);
        }

        for skipped in self.last_sent_packet_number + 1..packet_number {
            self.skipped_packets.push_back(skipped);
            if self.skipped_packets.len() > self.max_tracked_skipped_packets {
                self.skipped_packets.pop_front();
            }
        }
        self.last_sent_packet_number = packet_number;

        let now = packet.send_time;
        let length = packet.length;
        packet.frames.retain(Frame::is_retransmittable);
        let is_retransmittable = !packet.frames.is_empty();
        if is_retransmittable {
            self.bytes_in_flight += length;
            self.packet_history.push_back(packet);
            self.num_non_retransmittable_packets = 0;
        } else {
            self.num_non_retransmittable_packets += 1;
        }
        tracing::trace!(
            target: "quic",
            packet_number,
            length,
            is_retransmittable,
            bytes_in_flight = self.bytes_in_flight,
            "sent packet"
        );

        self.congestion.on_packet_sent(
            now,
            self.bytes_in_flight,
            packet_number,
            length,
            is_retransmittable,
        );
        self.update_loss_detection_alarm(now);
        Ok(())
    }

    /// Process an ACK frame carried by packet `with_packet_number`, received
    /// at `encryption_level`.
    pub fn received_ack(
        &mut self,
        ack: &AckFrame,
        with_packet_number: u64,
        encryption_level: EncryptionLevel,
        rcv_time: Instant,
    ) -> Result<(), QuicError> {
        let largest_acked = ack.largest_acked();
        if largest_acked > self.last_sent_packet_number {
            tracing::warn!(target: "quic", largest_acked, "ack for a packet never sent");
            return Err(QuicError::with_default_fty(
                ErrorKind::InvalidAckData,
                "Received ACK for an unsent package",
            ));
        }
        if with_packet_number <= self.largest_received_packet_with_ack {
            tracing::debug!(target: "quic", with_packet_number, "ignore duplicate or reordered ack");
            return Ok(());
        }
        self.largest_received_packet_with_ack = with_packet_number;

        // nothing new in this one
        if largest_acked < self.least_unacked() {
            return Ok(());
        }
        self.largest_acked = largest_acked;

        if self.skipped_packets.iter().any(|&pn| ack.acks_packet(pn)) {
            tracing::warn!(target: "quic", "ack for a skipped packet number");
            return Err(QuicError::with_default_fty(
                ErrorKind::InvalidAckData,
                "Received an ACK for a skipped packet number",
            ));
        }

        if self.maybe_update_rtt(largest_acked, ack.delay, rcv_time) {
            self.congestion.maybe_exit_slow_start(&self.rtt);
        }

        let acked = self
            .packet_history
            .iter()
            .take_while(|packet| packet.packet_number <= largest_acked)
            .filter(|packet| ack.acks_packet(packet.packet_number))
            .map(|packet| (packet.packet_number, packet.encryption_level))
            .collect::<Vec<_>>();
        for (packet_number, packet_level) in acked {
            if encryption_level < packet_level {
                tracing::warn!(
                    target: "quic",
                    packet_number,
                    %encryption_level,
                    %packet_level,
                    "ack at a lower encryption level than the acked packet"
                );
                return Err(QuicError::with_default_fty(
                    ErrorKind::InvalidAckData,
                    format!(
                        "Received ACK with encryption level {encryption_level} that acks a packet {packet_number} (encryption level {packet_level})"
                    ),
                ));
            }
            if let Some(packet) = self.packet_history.remove_packet(packet_number) {
                self.on_packet_acked(&packet);
            }
        }

        self.detect_lost_packets(rcv_time);
        self.update_loss_detection_alarm(rcv_time);
        let least_unacked = self.least_unacked();
        self.skipped_packets.retain(|&pn| pn >= least_unacked);
        self.stop_waiting.received_ack(ack);
        Ok(())
    }

    fn maybe_update_rtt(&mut self, largest_acked: u64, ack_delay: Option<Duration>, rcv_time: Instant) -> bool {
        let Some(packet) = self.packet_history.get(largest_acked) else {
            return false;
        };
        let send_delta = rcv_time.saturating_duration_since(packet.send_time);
        self.rtt.update(send_delta, ack_delay.unwrap_or_default());
        tracing::debug!(
            target: "quic",
            latest_rtt = ?self.rtt.latest_rtt(),
            smoothed_rtt = ?self.rtt.smoothed_rtt(),
            "rtt sample"
        );
        true
    }

    fn on_packet_acked(&mut self, packet: &Packet) {
        self.bytes_in_flight -= packet.length;
        self.rto_count = 0;
        self.handshake_count = 0;
        self.congestion
            .on_packet_acked(packet.packet_number, packet.length, self.bytes_in_flight);
    }

    fn detect_lost_packets(&mut self, now: Instant) {
        self.loss_time = None;
        let delay_until_lost = self.rtt.loss_delay(self.time_reordering_fraction);

        let mut lost = Vec::new();
        for packet in self.packet_history.iter() {
            if packet.packet_number > self.largest_acked {
                break;
            }
            let time_since_sent = now.saturating_duration_since(packet.send_time);
            let reordered = self.largest_acked - packet.packet_number >= self.reordering_threshold;
            if time_since_sent >= delay_until_lost || reordered {
                lost.push(packet.packet_number);
            } else if self.loss_time.is_none() {
                self.loss_time = Some(now + (delay_until_lost - time_since_sent));
            }
        }

        for packet_number in lost {
            if let Some(length) = self.queue_packet_for_retransmission(packet_number) {
                tracing::debug!(target: "quic", packet_number, "packet lost");
                self.congestion
                    .on_packet_lost(packet_number, length, self.bytes_in_flight);
            }
        }
    }

    /// Move a packet from the history to the retransmission queue, returning
    /// its length.
    fn queue_packet_for_retransmission(&mut self, packet_number: u64) -> Option<u64> {
        let packet = self.packet_history.remove_packet(packet_number)?;
        let length = packet.length;
        self.bytes_in_flight -= length;
        self.retransmission_queue.push_back(packet);
        self.stop_waiting.queued_retransmission(packet_number);
        Some(length)
    }

    fn update_loss_detection_alarm(&mut self, now: Instant) {
        self.alarm = if self.packet_history.is_empty() {
            None
        } else if !self.handshake_complete {
            Some(now + self.handshake_timeout())
        } else if let Some(loss_time) = self.loss_time {
            Some(loss_time)
        } else {
            Some(now + self.retransmission_timeout())
        };
    }

    fn handshake_timeout(&self) -> Duration {
        let mut duration = self.rtt.smoothed_rtt() * 2;
        if duration.is_zero() {
            duration = DEFAULT_INITIAL_RTT * 2;
        }
        backoff(duration.max(self.min_handshake_timeout), self.handshake_count)
    }

    fn retransmission_timeout(&self) -> Duration {
        let mut rto = Duration::ZERO;
        if self.rtt.has_sample() {
            rto = self.rtt.smoothed_rtt() + self.rtt.rttvar() * 4;
        }
        if rto.is_zero() {
            rto = self.default_retransmission_time;
        }
        backoff(rto.max(self.min_retransmission_time), self.rto_count)
            .min(self.max_retransmission_time)
    }

    /// When the loss detection alarm fires, if anything is outstanding.
    pub fn alarm_timeout(&self) -> Option<Instant> {
        self.alarm
    }

    pub fn is_alarm_expired(&self, now: Instant) -> bool {
        self.alarm.is_some_and(|alarm| alarm <= now)
    }

    /// React to the expired alarm: retransmit the handshake, declare the
    /// packets past their loss time lost, or retransmit after a timeout.
    pub fn on_alarm(&mut self, now: Instant) {
        if !self.handshake_complete {
            self.queue_handshake_packets_for_retransmission();
            self.handshake_count += 1;
        } else if self.loss_time.is_some() {
            self.detect_lost_packets(now);
        } else {
            self.retransmit_oldest_two_packets();
            self.rto_count += 1;
        }
        self.update_loss_detection_alarm(now);
    }

    fn queue_handshake_packets_for_retransmission(&mut self) {
        let handshake_packets = self
            .packet_history
            .iter()
            .filter(|packet| packet.encryption_level < EncryptionLevel::ForwardSecure)
            .map(|packet| packet.packet_number)
            .collect::<Vec<_>>();
        tracing::debug!(target: "quic", count = handshake_packets.len(), "handshake alarm");
        for packet_number in handshake_packets {
            self.queue_packet_for_retransmission(packet_number);
        }
    }

    fn retransmit_oldest_two_packets(&mut self) {
        for _ in 0..2 {
            let Some(packet_number) = self.packet_history.front().map(|packet| packet.packet_number)
            else {
                break;
            };
            tracing::debug!(target: "quic", packet_number, rto_count = self.rto_count, "retransmission timeout");
            if let Some(length) = self.queue_packet_for_retransmission(packet_number) {
                self.congestion
                    .on_packet_lost(packet_number, length, self.bytes_in_flight);
                self.congestion.on_retransmission_timeout(true);
            }
        }
    }

    /// Forget everything sent before forward security, those packets can
    /// never be acknowledged at a level the peer still accepts.
    pub fn set_handshake_complete(&mut self) {
        self.retransmission_queue
            .retain(|packet| packet.encryption_level == EncryptionLevel::ForwardSecure);
        let bytes_in_flight = &mut self.bytes_in_flight;
        self.packet_history.retain(|packet| {
            let keep = packet.encryption_level == EncryptionLevel::ForwardSecure;
            if !keep {
                *bytes_in_flight -= packet.length;
            }
            keep
        });
        self.handshake_complete = true;
    }

    pub fn dequeue_packet_for_retransmission(&mut self) -> Option<Packet> {
        self.retransmission_queue.pop_front()
    }

    pub fn has_packets_for_retransmission(&self) -> bool {
        !self.retransmission_queue.is_empty()
    }

    /// The lowest packet number that may still be acknowledged.
    pub fn least_unacked(&self) -> u64 {
        match self.packet_history.front() {
            Some(packet) => packet.packet_number,
            None => self.largest_acked + 1,
        }
    }

    pub fn stop_waiting_frame(&mut self, force: bool) -> Option<StopWaitingFrame> {
        self.stop_waiting.stop_waiting_frame(force)
    }

    /// Whether the congestion window and the tracking limit allow another
    /// packet. Retransmissions are always allowed.
    pub fn sending_allowed(&self) -> bool {
        let congestion_limited = self.bytes_in_flight > self.congestion.congestion_window();
        let max_tracked_limited = self.retransmission_queue.len() + self.packet_history.len()
            >= self.max_tracked_sent_packets;
        if congestion_limited {
            tracing::debug!(
                target: "quic",
                bytes_in_flight = self.bytes_in_flight,
                congestion_window = self.congestion.congestion_window(),
                "congestion limited"
            );
        }
        !max_tracked_limited && (!congestion_limited || !self.retransmission_queue.is_empty())
    }

    /// After a row of packets without retransmittable frames, the next one
    /// should carry one so that the peer acknowledges it.
    pub fn should_send_retransmittable_packet(&self) -> bool {
        self.num_non_retransmittable_packets >= self.max_non_retransmittable_packets
    }

    pub fn time_until_send(&mut self, now: Instant) -> Duration {
        self.congestion
            .time_until_send(now, self.bytes_in_flight, &self.rtt)
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    pub fn largest_acked(&self) -> u64 {
        self.largest_acked
    }

    pub fn rtt_stats(&self) -> &RttStats {
        &self.rtt
    }

    pub fn congestion_stats(&self) -> ConnectionStats {
        self.congestion.stats()
    }
}

fn backoff(duration: Duration, count: u32) -> Duration {
    duration.saturating_mul(1u32.checked_shl(count).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use qbase::{
        config::ConfigBuilder,
        frame::{PingFrame, StreamFrame},
        sid::StreamId,
    };
    use qcongestion::NewReno;

    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn handler() -> SentPacketHandler {
        SentPacketHandler::new(&Config::default(), Box::new(NewReno::new()))
    }

    fn packet(packet_number: u64, send_time: Instant) -> Packet {
        Packet {
            packet_number,
            frames: vec![Frame::Ping(PingFrame)],
            length: 100,
            encryption_level: EncryptionLevel::ForwardSecure,
            send_time,
        }
    }

    fn ack(ranges: Vec<std::ops::RangeInclusive<u64>>) -> AckFrame {
        AckFrame {
            ranges,
            delay: Some(Duration::ZERO),
        }
    }

    fn send_all(handler: &mut SentPacketHandler, packets: impl IntoIterator<Item = u64>, now: Instant) {
        for pn in packets {
            handler.sent_packet(packet(pn, now)).unwrap();
        }
    }

    fn queued(handler: &mut SentPacketHandler) -> Vec<u64> {
        std::iter::from_fn(|| handler.dequeue_packet_for_retransmission())
            .map(|packet| packet.packet_number)
            .collect()
    }

    #[test]
    fn test_packet_numbers_must_increase() {
        let mut handler = handler();
        let now = Instant::now();
        handler.sent_packet(packet(1, now)).unwrap();
        assert_eq!(
            handler.sent_packet(packet(1, now)),
            Err(SentPacketError::NotIncreasing {
                packet_number: 1,
                last_sent: 1,
            })
        );
    }

    #[test]
    fn test_too_many_tracked_packets() {
        let config = ConfigBuilder::default()
            .max_tracked_sent_packets(2usize)
            .build()
            .unwrap();
        let mut handler = SentPacketHandler::new(&config, Box::new(NewReno::new()));
        let now = Instant::now();
        send_all(&mut handler, 1..=2, now);
        assert!(!handler.sending_allowed());
        assert_eq!(
            handler.sent_packet(packet(3, now)),
            Err(SentPacketError::TooManyTracked)
        );
    }

    #[test]
    fn test_debug_output() {
        let mut handler = handler();
        handler.sent_packet(packet(1, Instant::now())).unwrap();
        let debug = format!("{handler:?}");
        assert!(debug.starts_with("SentPacketHandler {"));
        assert!(debug.contains("bytes_in_flight: 100"));
    }

    #[test]
    fn test_bytes_in_flight() {
        let mut handler = handler();
        let now = Instant::now();
        send_all(&mut handler, 1..=3, now);
        assert_eq!(handler.bytes_in_flight(), 300);
        handler
            .received_ack(&ack(vec![1..=2]), 1, EncryptionLevel::ForwardSecure, now + 10 * MS)
            .unwrap();
        assert_eq!(handler.bytes_in_flight(), 100);
        assert_eq!(handler.least_unacked(), 3);
        assert_eq!(handler.rtt_stats().latest_rtt(), 10 * MS);
    }

    #[test]
    fn test_non_retransmittable_packets() {
        let mut handler = handler();
        let now = Instant::now();
        for pn in 1..=19 {
            let packet = Packet {
                frames: vec![Frame::Ack(ack(vec![1..=1]))],
                ..packet(pn, now)
            };
            handler.sent_packet(packet).unwrap();
        }
        assert_eq!(handler.bytes_in_flight(), 0);
        assert_eq!(handler.alarm_timeout(), None);
        assert!(handler.should_send_retransmittable_packet());
        handler.sent_packet(packet(20, now)).unwrap();
        assert!(!handler.should_send_retransmittable_packet());
    }

    #[test]
    fn test_frames_for_retransmission() {
        let stream = StreamFrame::new(StreamId::from(3), 0, bytes::Bytes::from_static(b"foo"));
        let packet = Packet {
            frames: vec![
                Frame::StopWaiting(StopWaitingFrame::new(1)),
                Frame::Stream(stream.clone()),
                Frame::Ack(ack(vec![1..=1])),
            ],
            ..packet(2, Instant::now())
        };
        let frames = packet.frames_for_retransmission().collect::<Vec<_>>();
        assert_eq!(frames, [&Frame::Stream(stream)]);
    }

    #[test]
    fn test_ack_for_unsent_packet() {
        let mut handler = handler();
        let now = Instant::now();
        send_all(&mut handler, 1..=2, now);
        let error = handler
            .received_ack(&ack(vec![1..=3]), 1, EncryptionLevel::ForwardSecure, now)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidAckData);
    }

    #[test]
    fn test_ack_for_skipped_packet() {
        let mut handler = handler();
        let now = Instant::now();
        send_all(&mut handler, [1, 3], now);
        let error = handler
            .received_ack(&ack(vec![1..=3]), 1, EncryptionLevel::ForwardSecure, now)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidAckData);
        assert_eq!(error.reason(), "Received an ACK for a skipped packet number");
    }

    #[test]
    fn test_skipped_packets_are_forgotten() {
        let mut handler = handler();
        let now = Instant::now();
        send_all(&mut handler, [1, 3, 4], now);
        handler
            .received_ack(&ack(vec![3..=3, 1..=1]), 1, EncryptionLevel::ForwardSecure, now)
            .unwrap();
        // 2 is below the least unacked packet now
        handler
            .received_ack(&ack(vec![1..=4]), 2, EncryptionLevel::ForwardSecure, now)
            .unwrap();
        assert_eq!(handler.bytes_in_flight(), 0);
    }

    #[test]
    fn test_reordered_ack_is_ignored() {
        let mut handler = handler();
        let now = Instant::now();
        send_all(&mut handler, 1..=3, now);
        handler
            .received_ack(&ack(vec![1..=1]), 10, EncryptionLevel::ForwardSecure, now)
            .unwrap();
        handler
            .received_ack(&ack(vec![1..=2]), 9, EncryptionLevel::ForwardSecure, now)
            .unwrap();
        assert_eq!(handler.bytes_in_flight(), 200);
    }

    #[test]
    fn test_ack_at_lower_encryption_level() {
        let mut handler = handler();
        let now = Instant::now();
        handler
            .sent_packet(Packet {
                encryption_level: EncryptionLevel::Secure,
                ..packet(1, now)
            })
            .unwrap();
        let error = handler
            .received_ack(&ack(vec![1..=1]), 1, EncryptionLevel::Unencrypted, now)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidAckData);
    }

    #[test]
    fn test_loss_detection() {
        let mut handler = handler();
        handler.set_handshake_complete();
        let now = Instant::now();
        send_all(&mut handler, 1..=5, now);
        let rcv_time = now + 10 * MS;
        handler
            .received_ack(&ack(vec![5..=5]), 1, EncryptionLevel::ForwardSecure, rcv_time)
            .unwrap();
        // 1 and 2 are three packets behind the acknowledged one
        assert_eq!(handler.bytes_in_flight(), 200);
        let loss_time = handler.alarm_timeout().unwrap();
        assert!(loss_time > rcv_time);
        assert!(loss_time < rcv_time + 2 * MS);

        handler.on_alarm(rcv_time + 2 * MS);
        assert_eq!(handler.bytes_in_flight(), 0);
        assert_eq!(handler.alarm_timeout(), None);
        assert_eq!(queued(&mut handler), [1, 2, 3, 4]);
        assert_eq!(handler.congestion_stats().slowstart_packets_lost, 4);
    }

    #[test]
    fn test_retransmission_timeout() {
        let mut handler = handler();
        handler.set_handshake_complete();
        let now = Instant::now();
        send_all(&mut handler, 1..=3, now);
        // no RTT sample yet, the default timeout applies
        assert_eq!(handler.alarm_timeout(), Some(now + 500 * MS));
        assert!(!handler.is_alarm_expired(now + 499 * MS));
        assert!(handler.is_alarm_expired(now + 500 * MS));

        let fired = now + 500 * MS;
        handler.on_alarm(fired);
        assert_eq!(queued(&mut handler), [1, 2]);
        // doubled for the second timeout
        assert_eq!(handler.alarm_timeout(), Some(fired + 1000 * MS));
        assert_eq!(handler.bytes_in_flight(), 100);
    }

    #[test]
    fn test_retransmission_timeout_is_capped() {
        let mut handler = handler();
        handler.set_handshake_complete();
        let mut now = Instant::now();
        send_all(&mut handler, 1..=20, now);
        for _ in 0..8 {
            now = handler.alarm_timeout().unwrap();
            handler.on_alarm(now);
        }
        assert_eq!(handler.alarm_timeout(), Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_handshake_retransmission() {
        let mut handler = handler();
        let now = Instant::now();
        for (pn, level) in [(1, EncryptionLevel::Unencrypted), (2, EncryptionLevel::Secure)] {
            handler
                .sent_packet(Packet {
                    encryption_level: level,
                    ..packet(pn, now)
                })
                .unwrap();
        }
        assert_eq!(handler.alarm_timeout(), Some(now + 200 * MS));
        handler.on_alarm(now + 200 * MS);
        assert_eq!(handler.alarm_timeout(), None);
        assert_eq!(queued(&mut handler), [1, 2]);

        // the timer doubles until an acknowledgment arrives
        handler
            .sent_packet(Packet {
                encryption_level: EncryptionLevel::Secure,
                ..packet(3, now)
            })
            .unwrap();
        assert_eq!(handler.alarm_timeout(), Some(now + 400 * MS));
    }

    #[test]
    fn test_set_handshake_complete() {
        let mut handler = handler();
        let now = Instant::now();
        handler
            .sent_packet(Packet {
                encryption_level: EncryptionLevel::Secure,
                ..packet(1, now)
            })
            .unwrap();
        handler.sent_packet(packet(2, now)).unwrap();
        handler
            .sent_packet(Packet {
                encryption_level: EncryptionLevel::Unencrypted,
                ..packet(3, now)
            })
            .unwrap();
        handler.on_alarm(now + 200 * MS);
        handler
            .sent_packet(Packet {
                encryption_level: EncryptionLevel::Secure,
                ..packet(4, now)
            })
            .unwrap();

        handler.set_handshake_complete();
        assert_eq!(handler.bytes_in_flight(), 100);
        assert_eq!(handler.least_unacked(), 2);
        assert!(!handler.has_packets_for_retransmission());
    }

    #[test]
    fn test_stop_waiting_frames() {
        let mut handler = handler();
        let now = Instant::now();
        assert_eq!(handler.stop_waiting_frame(false), None);
        send_all(&mut handler, 1..=4, now);
        handler
            .received_ack(&ack(vec![3..=3]), 1, EncryptionLevel::ForwardSecure, now)
            .unwrap();
        let frame = handler.stop_waiting_frame(false).unwrap();
        assert_eq!(frame.least_unacked, 4);
        assert_eq!(handler.stop_waiting_frame(false), None);
        assert_eq!(handler.stop_waiting_frame(true), Some(frame));
    }

    #[test]
    fn test_stop_waiting_after_retransmission() {
        let mut handler = handler();
        handler.set_handshake_complete();
        let now = Instant::now();
        send_all(&mut handler, 1..=2, now);
        handler.on_alarm(now + 500 * MS);
        assert_eq!(handler.stop_waiting_frame(false).unwrap().least_unacked, 3);
    }

    #[test]
    fn test_congestion_limited() {
        let mut handler = handler();
        handler.set_handshake_complete();
        let now = Instant::now();
        let cwnd = 32 * qcongestion::MSS as u64;
        handler
            .sent_packet(Packet {
                length: cwnd + 1,
                ..packet(1, now)
            })
            .unwrap();
        assert!(!handler.sending_allowed());
        assert_eq!(handler.time_until_send(now), Duration::MAX);

        // retransmissions are sent anyway
        handler.on_alarm(handler.alarm_timeout().unwrap());
        assert!(handler.has_packets_for_retransmission());
        assert!(handler.sending_allowed());
    }
}
