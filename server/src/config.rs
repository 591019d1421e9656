//! Broker configuration.

use examrelay_shared::limits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide settings, built once at startup and passed by reference
/// into the registry and every session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Address of the line-oriented TCP listener.
    pub tcp_addr: String,
    /// Address of the WebSocket/HTTP listener.
    pub ws_addr: String,
    /// Time from full pairing until the expiry notice.
    pub session_duration_secs: u64,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Longest accepted TCP line in bytes.
    pub max_line_length: usize,
    /// Forward user messages to the examiner.
    pub relay_user_messages: bool,
    /// Vacant sessions idle for this long are evicted.
    pub idle_session_ttl_secs: u64,
    /// Interval between idle sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: "0.0.0.0:8080".into(),
            ws_addr: "0.0.0.0:8081".into(),
            session_duration_secs: limits::SESSION_DURATION_SECS,
            outbound_queue_capacity: limits::OUTBOUND_QUEUE_CAPACITY,
            max_line_length: limits::MAX_LINE_LENGTH,
            relay_user_messages: true,
            idle_session_ttl_secs: limits::IDLE_SESSION_TTL_SECS,
            sweep_interval_secs: limits::SWEEP_INTERVAL_SECS,
        }
    }
}

impl BrokerConfig {
    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_duration_secs)
    }

    pub fn idle_session_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_session_ttl_secs)
    }

    /// Never zero, `tokio::time::interval` panics on a zero period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.tcp_addr, "0.0.0.0:8080");
        assert_eq!(cfg.session_duration(), Duration::from_secs(60));
        assert_eq!(cfg.outbound_queue_capacity, 256);
        assert!(cfg.relay_user_messages);
    }

    #[test]
    fn sweep_interval_never_zero() {
        let cfg = BrokerConfig {
            sweep_interval_secs: 0,
            ..BrokerConfig::default()
        };
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"session_duration_secs":5,"relay_user_messages":false}"#;
        let cfg: BrokerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.session_duration(), Duration::from_secs(5));
        assert!(!cfg.relay_user_messages);
        assert_eq!(cfg.ws_addr, "0.0.0.0:8081");
    }
}
