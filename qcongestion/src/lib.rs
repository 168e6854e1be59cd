use std::time::{Duration, Instant};

mod new_reno;
mod pacing;
mod rtt;
mod stats;

pub use new_reno::NewReno;
pub use pacing::Pacer;
pub use rtt::RttStats;
pub use stats::ConnectionStats;

/// The segment size congestion windows are counted in.
pub const MSS: usize = qbase::packet::MAX_PACKET_SIZE;

/// A congestion control algorithm as the sent packet handler drives it.
///
/// The handler owns all packet bookkeeping and reports every event with the
/// bytes in flight at that moment, the algorithm only decides how much may
/// be outstanding.
pub trait Control: Send {
    /// How long to wait before the next packet may be sent. [`Duration::MAX`]
    /// if the congestion window is full.
    fn time_until_send(&mut self, now: Instant, bytes_in_flight: u64, rtt: &RttStats) -> Duration;

    /// Returns whether the packet counts as in flight.
    fn on_packet_sent(
        &mut self,
        sent_time: Instant,
        bytes_in_flight: u64,
        packet_number: u64,
        bytes: u64,
        is_retransmittable: bool,
    ) -> bool;

    fn on_packet_acked(&mut self, packet_number: u64, acked_bytes: u64, bytes_in_flight: u64);

    fn on_packet_lost(&mut self, packet_number: u64, lost_bytes: u64, bytes_in_flight: u64);

    /// Leave slow start early if the round trip time starts to grow.
    fn maybe_exit_slow_start(&mut self, rtt: &RttStats);

    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool);

    fn congestion_window(&self) -> u64;

    fn in_slow_start(&self) -> bool;

    fn stats(&self) -> ConnectionStats;
}
