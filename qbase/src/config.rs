use std::time::Duration;

use derive_builder::Builder;
use getset::CopyGetters;
use serde::{Deserialize, Serialize};

use crate::packet::{MAX_PACKET_SIZE, NON_FORWARD_SECURE_PACKET_SIZE_REDUCTION};

/// Tunables of the send path.
///
/// Every field has a default, so `ConfigBuilder::default().build()` yields
/// [`Config::default()`].
///
/// ```
/// use qbase::config::ConfigBuilder;
///
/// let config = ConfigBuilder::default()
///     .max_packet_size(1200usize)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_packet_size(), 1200);
/// assert_eq!(config.max_tracked_skipped_packets(), 10);
/// ```
#[derive(Builder, CopyGetters, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[builder(default, setter(into), build_fn(validate = "Self::validate"))]
#[getset(get_copy = "pub")]
#[serde(default)]
pub struct Config {
    /// Largest packet ever sent, header and sealing overhead included.
    max_packet_size: usize,
    /// Room kept free in packets sent before forward security, so they can
    /// be retransmitted with a different header without being split.
    non_forward_secure_packet_size_reduction: usize,
    /// On average one packet number out of this many is skipped.
    skip_packet_average_period: u64,
    initial_connection_receive_window: u64,
    initial_stream_receive_window: u64,
    /// Send window of the connection until the peer advertises its own.
    initial_connection_send_window: u64,
    /// Send window of every stream until the peer advertises its own.
    initial_stream_send_window: u64,
    /// A window update is sent once less than `1 - threshold` of the receive
    /// window is left.
    window_update_threshold: f64,
    max_tracked_skipped_packets: usize,
    /// After this many packets without retransmittable frames, a PING is due.
    max_non_retransmittable_packets: usize,
    max_tracked_sent_packets: usize,
    max_outgoing_streams: usize,
    /// A packet is lost once this many later packets are acknowledged.
    reordering_threshold: u64,
    time_reordering_fraction: f64,
    min_retransmission_time: Duration,
    max_retransmission_time: Duration,
    /// The retransmission timeout before the first RTT sample.
    default_retransmission_time: Duration,
    min_handshake_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            non_forward_secure_packet_size_reduction: NON_FORWARD_SECURE_PACKET_SIZE_REDUCTION,
            skip_packet_average_period: 500,
            initial_connection_receive_window: 48 * 1024,
            initial_stream_receive_window: 32 * 1024,
            initial_connection_send_window: 16 * 1024,
            initial_stream_send_window: 16 * 1024,
            window_update_threshold: 0.25,
            max_tracked_skipped_packets: 10,
            max_non_retransmittable_packets: 19,
            max_tracked_sent_packets: 2500,
            max_outgoing_streams: 100,
            reordering_threshold: 3,
            time_reordering_fraction: 1.0 / 8.0,
            min_retransmission_time: Duration::from_millis(200),
            max_retransmission_time: Duration::from_secs(60),
            default_retransmission_time: Duration::from_millis(500),
            min_handshake_timeout: Duration::from_millis(10),
        }
    }
}

impl ConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(threshold) = self.window_update_threshold {
            if !(threshold > 0.0 && threshold < 1.0) {
                return Err(format!("window update threshold {threshold} out of (0, 1)"));
            }
        }
        if let Some(period) = self.skip_packet_average_period {
            if period < 2 {
                return Err(format!("skip period {period} is too short"));
            }
        }
        let max_packet_size = self.max_packet_size.unwrap_or(MAX_PACKET_SIZE);
        let reduction = self
            .non_forward_secure_packet_size_reduction
            .unwrap_or(NON_FORWARD_SECURE_PACKET_SIZE_REDUCTION);
        if max_packet_size <= reduction {
            return Err(format!(
                "max packet size {max_packet_size} leaves no room after a reduction of {reduction}"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ConfigBuilder::default().build().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.max_packet_size(), 1350);
        assert_eq!(config.initial_connection_receive_window(), 49152);
        assert_eq!(config.max_retransmission_time(), Duration::from_secs(60));
    }

    #[test]
    fn test_builder_rejects_invalid_values() {
        assert!(
            ConfigBuilder::default()
                .window_update_threshold(1.5)
                .build()
                .is_err()
        );
        assert!(
            ConfigBuilder::default()
                .max_packet_size(40usize)
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_partial_config_from_json() {
        let config: Config =
            serde_json::from_str(r#"{ "max_packet_size": 1200, "reordering_threshold": 5 }"#)
                .unwrap();
        assert_eq!(config.max_packet_size(), 1200);
        assert_eq!(config.reordering_threshold(), 5);
        assert_eq!(config.skip_packet_average_period(), 500);
    }
}
