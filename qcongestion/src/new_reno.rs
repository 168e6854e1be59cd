use std::time::{Duration, Instant};

use crate::{Control, MSS, Pacer, RttStats, stats::ConnectionStats};

const MSS_BYTES: u64 = MSS as u64;
const INITIAL_CONGESTION_WINDOW: u64 = 32 * MSS_BYTES;
const MAX_CONGESTION_WINDOW: u64 = 1000 * MSS_BYTES;
const MINIMUM_WINDOW: u64 = 2 * MSS_BYTES;
// window left over below which the sender counts as limited by the window
const MAX_BURST_BYTES: u64 = 3 * MSS_BYTES;
const RENO_BETA: f64 = 0.7;

// hybrid slow start exits early once the delay grows by this much
const HYBRID_START_LOW_WINDOW: u64 = 16 * MSS_BYTES;
const HYBRID_START_DELAY_MIN_THRESHOLD: Duration = Duration::from_millis(4);
const HYBRID_START_DELAY_MAX_THRESHOLD: Duration = Duration::from_millis(16);

/// TCP NewReno, counted in bytes.
///
/// A loss shrinks the window once per window of data: losses of packets sent
/// before the last cutback belong to the same congestion event.
#[derive(Debug)]
pub struct NewReno {
    congestion_window: u64,
    slowstart_threshold: u64,
    largest_sent_packet_number: Option<u64>,
    largest_acked_packet_number: Option<u64>,
    largest_sent_at_last_cutback: Option<u64>,
    last_cutback_exited_slowstart: bool,
    acked_bytes_in_avoidance: u64,
    stats: ConnectionStats,
    pacer: Option<Pacer>,
}

impl Default for NewReno {
    fn default() -> Self {
        Self::new()
    }
}

impl NewReno {
    pub fn new() -> Self {
        NewReno {
            congestion_window: INITIAL_CONGESTION_WINDOW,
            slowstart_threshold: MAX_CONGESTION_WINDOW,
            largest_sent_packet_number: None,
            largest_acked_packet_number: None,
            largest_sent_at_last_cutback: None,
            last_cutback_exited_slowstart: false,
            acked_bytes_in_avoidance: 0,
            stats: ConnectionStats::default(),
            pacer: None,
        }
    }

    fn in_recovery(&self) -> bool {
        match (self.largest_acked_packet_number, self.largest_sent_at_last_cutback) {
            (Some(acked), Some(cutback)) => acked <= cutback,
            _ => false,
        }
    }

    fn is_cwnd_limited(&self, bytes_in_flight: u64) -> bool {
        if bytes_in_flight >= self.congestion_window {
            return true;
        }
        let available = self.congestion_window - bytes_in_flight;
        let slow_start_limited = self.in_slow_start() && bytes_in_flight > self.congestion_window / 2;
        slow_start_limited || available <= MAX_BURST_BYTES
    }

    fn maybe_increase_cwnd(&mut self, acked_bytes: u64, bytes_in_flight: u64) {
        // an application that does not fill the window learns nothing about it
        if !self.is_cwnd_limited(bytes_in_flight) {
            return;
        }
        if self.congestion_window >= MAX_CONGESTION_WINDOW {
            return;
        }
        if self.in_slow_start() {
            self.congestion_window += MSS_BYTES;
            return;
        }
        // one segment per window of acknowledged data
        self.acked_bytes_in_avoidance += acked_bytes;
        if self.acked_bytes_in_avoidance >= self.congestion_window {
            self.acked_bytes_in_avoidance -= self.congestion_window;
            self.congestion_window += MSS_BYTES;
        }
    }
}

impl Control for NewReno {
    fn time_until_send(&mut self, now: Instant, bytes_in_flight: u64, rtt: &RttStats) -> Duration {
        if bytes_in_flight >= self.congestion_window {
            return Duration::MAX;
        }
        let cwnd = self.congestion_window;
        let pacer = self
            .pacer
            .get_or_insert_with(|| Pacer::new(rtt.smoothed_rtt(), cwnd, MSS, now));
        pacer.delay(rtt.smoothed_rtt(), cwnd, now)
    }

    fn on_packet_sent(
        &mut self,
        _sent_time: Instant,
        _bytes_in_flight: u64,
        packet_number: u64,
        bytes: u64,
        is_retransmittable: bool,
    ) -> bool {
        // packets carrying only acknowledgments are not congestion controlled
        if !is_retransmittable {
            return false;
        }
        self.largest_sent_packet_number = Some(packet_number);
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.on_sent(bytes as usize);
        }
        true
    }

    fn on_packet_acked(&mut self, packet_number: u64, acked_bytes: u64, bytes_in_flight: u64) {
        self.largest_acked_packet_number = Some(
            self.largest_acked_packet_number
                .map_or(packet_number, |largest| largest.max(packet_number)),
        );
        if self.in_recovery() {
            return;
        }
        self.maybe_increase_cwnd(acked_bytes, bytes_in_flight);
    }

    fn on_packet_lost(&mut self, packet_number: u64, lost_bytes: u64, _bytes_in_flight: u64) {
        if self
            .largest_sent_at_last_cutback
            .is_some_and(|cutback| packet_number <= cutback)
        {
            // part of the congestion event already reacted to
            if self.last_cutback_exited_slowstart {
                self.stats.slowstart_packets_lost += 1;
                self.stats.slowstart_bytes_lost += lost_bytes;
            }
            return;
        }

        self.last_cutback_exited_slowstart = self.in_slow_start();
        if self.in_slow_start() {
            self.stats.slowstart_packets_lost += 1;
            self.stats.slowstart_bytes_lost += lost_bytes;
        }

        let reduced = (self.congestion_window as f64 * RENO_BETA) as u64;
        self.congestion_window = reduced.max(MINIMUM_WINDOW);
        self.slowstart_threshold = self.congestion_window;
        self.largest_sent_at_last_cutback = self.largest_sent_packet_number;
        self.acked_bytes_in_avoidance = 0;
        tracing::debug!(
            target: "quic",
            packet_number,
            cwnd = self.congestion_window,
            "congestion window reduced after a loss"
        );
    }

    fn maybe_exit_slow_start(&mut self, rtt: &RttStats) {
        if !self.in_slow_start()
            || self.congestion_window < HYBRID_START_LOW_WINDOW
            || !rtt.has_sample()
        {
            return;
        }
        let threshold = (rtt.min_rtt() / 8).clamp(
            HYBRID_START_DELAY_MIN_THRESHOLD,
            HYBRID_START_DELAY_MAX_THRESHOLD,
        );
        if rtt.latest_rtt() > rtt.min_rtt() + threshold {
            self.slowstart_threshold = self.congestion_window;
            tracing::debug!(
                target: "quic",
                cwnd = self.congestion_window,
                latest_rtt = ?rtt.latest_rtt(),
                min_rtt = ?rtt.min_rtt(),
                "exit slow start on growing delay"
            );
        }
    }

    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool) {
        self.largest_sent_at_last_cutback = None;
        if !packets_retransmitted {
            return;
        }
        self.slowstart_threshold = self.congestion_window / 2;
        self.congestion_window = MINIMUM_WINDOW;
    }

    fn congestion_window(&self) -> u64 {
        self.congestion_window
    }

    fn in_slow_start(&self) -> bool {
        self.congestion_window < self.slowstart_threshold
    }

    fn stats(&self) -> ConnectionStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(reno: &mut NewReno, packets: std::ops::RangeInclusive<u64>) {
        let now = Instant::now();
        for pn in packets {
            assert!(reno.on_packet_sent(now, 0, pn, MSS_BYTES, true));
        }
    }

    #[test]
    fn test_slow_start_grows_per_ack() {
        let mut reno = NewReno::new();
        send(&mut reno, 1..=32);
        let in_flight = reno.congestion_window();
        for pn in 1..=4 {
            reno.on_packet_acked(pn, MSS_BYTES, in_flight);
        }
        assert_eq!(reno.congestion_window(), INITIAL_CONGESTION_WINDOW + 4 * MSS_BYTES);
        assert!(reno.in_slow_start());
    }

    #[test]
    fn test_application_limited_does_not_grow() {
        let mut reno = NewReno::new();
        send(&mut reno, 1..=2);
        reno.on_packet_acked(1, MSS_BYTES, MSS_BYTES);
        assert_eq!(reno.congestion_window(), INITIAL_CONGESTION_WINDOW);
    }

    #[test]
    fn test_non_retransmittable_packets_are_not_in_flight() {
        let mut reno = NewReno::new();
        assert!(!reno.on_packet_sent(Instant::now(), 0, 1, 50, false));
    }

    #[test]
    fn test_loss_in_slow_start() {
        let mut reno = NewReno::new();
        send(&mut reno, 1..=10);
        reno.on_packet_lost(3, MSS_BYTES, 0);
        let reduced = (INITIAL_CONGESTION_WINDOW as f64 * RENO_BETA) as u64;
        assert_eq!(reno.congestion_window(), reduced);
        assert!(!reno.in_slow_start());
        assert_eq!(
            reno.stats(),
            ConnectionStats {
                slowstart_packets_lost: 1,
                slowstart_bytes_lost: MSS_BYTES,
            }
        );

        // same congestion event, no further reduction
        reno.on_packet_lost(5, MSS_BYTES, 0);
        assert_eq!(reno.congestion_window(), reduced);
        assert_eq!(reno.stats().slowstart_packets_lost, 2);

        // a packet sent after the cutback is a new event
        send(&mut reno, 11..=11);
        reno.on_packet_lost(11, MSS_BYTES, 0);
        assert_eq!(
            reno.congestion_window(),
            ((reduced as f64 * RENO_BETA) as u64).max(MINIMUM_WINDOW)
        );
        assert_eq!(reno.stats().slowstart_packets_lost, 2);
    }

    #[test]
    fn test_no_growth_in_recovery() {
        let mut reno = NewReno::new();
        send(&mut reno, 1..=10);
        reno.on_packet_lost(1, MSS_BYTES, 0);
        let cwnd = reno.congestion_window();
        reno.on_packet_acked(2, MSS_BYTES, cwnd);
        assert_eq!(reno.congestion_window(), cwnd);
    }

    #[test]
    fn test_retransmission_timeout() {
        let mut reno = NewReno::new();
        reno.on_retransmission_timeout(false);
        assert_eq!(reno.congestion_window(), INITIAL_CONGESTION_WINDOW);
        reno.on_retransmission_timeout(true);
        assert_eq!(reno.congestion_window(), MINIMUM_WINDOW);
        assert!(reno.in_slow_start());
    }

    #[test]
    fn test_exit_slow_start_on_delay_increase() {
        let mut reno = NewReno::new();
        let mut rtt = RttStats::new();
        rtt.update(Duration::from_millis(60), Duration::ZERO);
        reno.maybe_exit_slow_start(&rtt);
        assert!(reno.in_slow_start());

        rtt.update(Duration::from_millis(80), Duration::ZERO);
        reno.maybe_exit_slow_start(&rtt);
        assert!(!reno.in_slow_start());
    }

    #[test]
    fn test_time_until_send() {
        let mut reno = NewReno::new();
        let mut rtt = RttStats::new();
        rtt.update(Duration::from_millis(100), Duration::ZERO);
        let now = Instant::now();
        assert_eq!(reno.time_until_send(now, 0, &rtt), Duration::ZERO);
        assert_eq!(
            reno.time_until_send(now, reno.congestion_window(), &rtt),
            Duration::MAX
        );
    }
}
