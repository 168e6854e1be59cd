use serde::{Deserialize, Serialize};

/// Losses seen while the congestion window was still growing exponentially.
///
/// Both counters only grow, resetting them is up to whoever reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub slowstart_packets_lost: u64,
    pub slowstart_bytes_lost: u64,
}
