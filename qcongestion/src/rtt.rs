use std::time::Duration;

/// Round trip time estimation.
///
/// Until the first sample arrives, every estimate is zero and callers fall
/// back to their defaults.
#[derive(Debug, Clone, Default)]
pub struct RttStats {
    latest_rtt: Duration,
    smoothed_rtt: Duration,
    rttvar: Duration,
    min_rtt: Duration,
}

impl RttStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a sample: `send_delta` is the time between sending a packet and
    /// receiving its acknowledgment, `ack_delay` how long the peer held back
    /// that acknowledgment.
    pub fn update(&mut self, send_delta: Duration, ack_delay: Duration) {
        if send_delta.is_zero() || send_delta == Duration::MAX {
            return;
        }

        // min_rtt ignores the acknowledgment delay
        if self.min_rtt.is_zero() || self.min_rtt > send_delta {
            self.min_rtt = send_delta;
        }

        // adjust for the acknowledgment delay if plausible
        let mut sample = send_delta;
        if self
            .min_rtt
            .checked_add(ack_delay)
            .is_some_and(|bound| sample >= bound)
        {
            sample -= ack_delay;
        }
        self.latest_rtt = sample;

        if self.smoothed_rtt.is_zero() {
            self.smoothed_rtt = sample;
            self.rttvar = sample / 2;
        } else {
            let abs_diff = self.smoothed_rtt.abs_diff(sample);
            // beta = 1/4, alpha = 1/8
            self.rttvar = self.rttvar * 3 / 4 + abs_diff / 4;
            self.smoothed_rtt = self.smoothed_rtt * 7 / 8 + sample / 8;
        }
    }

    pub fn has_sample(&self) -> bool {
        !self.smoothed_rtt.is_zero()
    }

    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    /// How long a packet may stay unacknowledged behind a later acknowledged
    /// one before it counts as lost.
    pub fn loss_delay(&self, time_reordering_fraction: f64) -> Duration {
        self.latest_rtt
            .max(self.smoothed_rtt)
            .mul_f64(1.0 + time_reordering_fraction)
    }
}
