//! Relay configuration: the four port constants plus the operational
//! defaults spec.md §3/§9 document as compile-time constants in the
//! reference implementation. Exposed as CLI flags (with environment
//! fallback) so the relay can be configured without a rebuild.

use std::time::Duration;

use clap::Parser;

/// Hub-and-spoke signal relay: stream broadcast, control bridge, discovery registry.
#[derive(Debug, Clone, Parser)]
#[command(name = "sdr-relay", version, about)]
pub struct Config {
    /// TCP port for the detector stream (producer + consumers share the port).
    #[arg(long, env = "RELAY_DETECTOR_PORT", default_value_t = 4410)]
    pub detector_port: u16,

    /// TCP port for the display stream.
    #[arg(long, env = "RELAY_DISPLAY_PORT", default_value_t = 4411)]
    pub display_port: u16,

    /// TCP port for the control bridge (producer <-> controller).
    #[arg(long, env = "RELAY_CONTROL_PORT", default_value_t = 4409)]
    pub control_port: u16,

    /// TCP port for the discovery registry.
    #[arg(long, env = "RELAY_DISCOVERY_PORT", default_value_t = 5401)]
    pub discovery_port: u16,

    /// Maximum consumers attached to a single stream before new ones are refused.
    #[arg(long, env = "RELAY_CONSUMER_CAP", default_value_t = 100)]
    pub consumer_cap: usize,

    /// Maximum edge sessions the registry will admit.
    #[arg(long, env = "RELAY_EDGE_CAP", default_value_t = 32)]
    pub edge_cap: usize,

    /// Maximum service records the registry will hold across all edges.
    #[arg(long, env = "RELAY_SERVICE_CAP", default_value_t = 128)]
    pub service_cap: usize,

    /// Seconds of silence after which an edge session is forcibly removed.
    #[arg(long, env = "RELAY_EDGE_TIMEOUT_SECS", default_value_t = 120)]
    pub edge_timeout_secs: u64,

    /// Seconds between periodic status reports.
    #[arg(long, env = "RELAY_STATUS_INTERVAL_SECS", default_value_t = 5)]
    pub status_interval_secs: u64,
}

impl Config {
    pub fn edge_timeout(&self) -> Duration {
        Duration::from_secs(self.edge_timeout_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    /// Ring capacity for a stream running at `sample_rate`: 30 seconds of
    /// worst-case interleaved-float32-I/Q bytes (2 channels * 4 bytes each).
    pub fn ring_capacity_for(sample_rate: u32) -> usize {
        sample_rate as usize * 30 * 2 * 4
    }
}

impl Default for Config {
    fn default() -> Self {
        // clap's derived defaults double as the programmatic defaults used by tests.
        Self::parse_from(["sdr-relay"])
    }
}
