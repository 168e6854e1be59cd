use std::time::{Duration, Instant};

/// Token bucket spreading a congestion window over a round trip.
#[derive(Debug)]
pub struct Pacer {
    capacity: u64,
    last_cwnd: u64,
    tokens: u64,
    last_refill: Instant,
    mtu: u64,
}

impl Pacer {
    pub fn new(smoothed_rtt: Duration, cwnd: u64, mtu: usize, now: Instant) -> Self {
        let mtu = mtu as u64;
        let capacity = Pacer::calculate_capacity(smoothed_rtt, cwnd, mtu);
        Pacer {
            capacity,
            last_cwnd: cwnd,
            tokens: capacity,
            last_refill: now,
            mtu,
        }
    }

    pub fn on_sent(&mut self, packet_size: usize) {
        self.tokens = self.tokens.saturating_sub(packet_size as u64);
    }

    /// How long to wait before a full sized packet may leave.
    pub fn delay(&mut self, smoothed_rtt: Duration, cwnd: u64, now: Instant) -> Duration {
        if self.last_cwnd != cwnd {
            self.capacity = Pacer::calculate_capacity(smoothed_rtt, cwnd, self.mtu);
            self.last_cwnd = cwnd;
            self.tokens = self.tokens.min(self.capacity);
        }

        let rate = Pacer::rate(smoothed_rtt, cwnd);
        let elapsed = now.saturating_duration_since(self.last_refill);
        let refill = (elapsed.as_secs_f64() * rate) as u64;
        if refill > 0 {
            self.tokens = self.tokens.saturating_add(refill).min(self.capacity);
            self.last_refill = now;
        }

        if self.tokens >= self.mtu || rate <= 0.0 {
            return Duration::ZERO;
        }
        let missing = (self.mtu - self.tokens) as f64;
        Duration::from_secs_f64(missing / rate)
    }

    // rate = N * congestion_window / smoothed_rtt, in bytes per second
    fn rate(smoothed_rtt: Duration, cwnd: u64) -> f64 {
        if smoothed_rtt.is_zero() {
            return 0.0;
        }
        N * cwnd as f64 / smoothed_rtt.as_secs_f64()
    }

    fn calculate_capacity(smoothed_rtt: Duration, cwnd: u64, mtu: u64) -> u64 {
        let rtt = smoothed_rtt.as_nanos().max(1);
        let capacity = ((cwnd as u128 * BURST_INTERVAL.as_nanos()) / rtt) as u64;
        capacity.clamp(MIN_BURST_SIZE * mtu, MAX_BURST_SIZE * mtu)
    }
}

const BURST_INTERVAL: Duration = Duration::from_millis(2);
const MIN_BURST_SIZE: u64 = 10;
const MAX_BURST_SIZE: u64 = 256;
const N: f64 = 5.0 / 4.0;
