//! Network-level statistics.

/// Connection statistics for one RTSP client.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkStats {
    pub packets_received: u64,
    /// Inferred from RTP sequence-number gaps.
    pub packets_lost: u64,
    pub bytes_received: u64,
    /// Percentage of packets lost.
    pub packet_loss_rate: f64,
    /// Exponentially smoothed receive bitrate, Mbps.
    pub bitrate_mbps: f64,
    pub reconnect_count: u32,
    /// Seconds since connect.
    pub uptime_secs: i64,
}
