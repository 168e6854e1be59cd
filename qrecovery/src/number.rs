use std::fmt;

use rand::{Rng, SeedableRng, rngs::StdRng};

/// Where the generator draws its skip distances from.
///
/// Any `u16` is valid, the generator scales it to the configured period.
pub trait SkipSource: Send {
    fn next_u16(&mut self) -> u16;
}

impl<F: FnMut() -> u16 + Send> SkipSource for F {
    fn next_u16(&mut self) -> u16 {
        self()
    }
}

/// Skips drawn from a generator seeded once from the OS.
pub struct RandomSkip(StdRng);

impl RandomSkip {
    pub fn new() -> Self {
        Self(StdRng::from_os_rng())
    }
}

impl Default for RandomSkip {
    fn default() -> Self {
        Self::new()
    }
}

impl SkipSource for RandomSkip {
    fn next_u16(&mut self) -> u16 {
        self.0.random()
    }
}

/// Hands out packet numbers, leaving out one every so often.
///
/// A peer that acknowledges a number that was never sent is acknowledging
/// optimistically, the sent packet handler detects that from the gaps.
/// Two consecutive numbers are never skipped.
pub struct PacketNumberGenerator {
    next: u64,
    next_to_skip: u64,
    average_period: u64,
    source: Box<dyn SkipSource>,
}

impl PacketNumberGenerator {
    /// The first packet number is 1.
    pub fn new(average_period: u64) -> Self {
        Self::with_source(average_period, RandomSkip::new())
    }

    pub fn with_source(average_period: u64, source: impl SkipSource + 'static) -> Self {
        let mut generator = Self {
            next: 1,
            next_to_skip: 0,
            average_period,
            source: Box::new(source),
        };
        generator.generate_new_skip();
        generator
    }

    /// The number the next packet will get.
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Take the next number.
    pub fn pop(&mut self) -> u64 {
        let next = self.next;
        self.next += 1;
        if self.next == self.next_to_skip {
            tracing::trace!(target: "quic", packet_number = self.next, "skip packet number");
            self.next += 1;
            self.generate_new_skip();
        }
        next
    }

    fn generate_new_skip(&mut self) {
        let num = self.source.next_u16() as u64;
        // uniform in [0, 2 * (period - 1)], so a skip every period on average
        let skip = num * self.average_period.saturating_sub(1) / (u16::MAX as u64 / 2);
        self.next_to_skip = self.next + 2 + skip;
    }
}

impl fmt::Debug for PacketNumberGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketNumberGenerator")
            .field("next", &self.next)
            .field("next_to_skip", &self.next_to_skip)
            .field("average_period", &self.average_period)
            .finish()
    }
}
