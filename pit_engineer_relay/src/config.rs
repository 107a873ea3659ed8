// Relay and client configuration.
//
// `RelayConfig` can be built in code, loaded from a JSON file (every field is
// optional and falls back to its default), or assembled by the `relay`
// binary's command-line flags on top of either. `ClientConfig` only carries
// timing knobs for `NetClient`.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Configuration for starting a relay server.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_ip: IpAddr,
    /// Reliable (TCP) port. 0 lets the OS pick.
    pub tcp_port: u16,
    /// Unreliable (UDP) port. 0 lets the OS pick.
    pub udp_port: u16,
    pub max_participants: usize,
    /// Silence after which an unreliable endpoint is dropped and its owner
    /// asked to re-register.
    pub liveness_window_ms: u64,
    /// Delay between a successful handshake and the strategy history replay.
    pub history_delay_ms: u64,
    /// Event loop wake-up period for timers.
    pub tick_ms: u64,
    /// Longest a single write to a participant may block the event loop.
    /// A participant that stops reading is disconnected after this.
    pub write_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: 4269,
            udp_port: 4270,
            max_participants: 5,
            liveness_window_ms: 1500,
            history_delay_ms: 500,
            tick_ms: 50,
            write_timeout_ms: 2000,
        }
    }
}

impl RelayConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    pub fn history_delay(&self) -> Duration {
        Duration::from_millis(self.history_delay_ms)
    }

    /// Never zero: `recv_timeout` with a zero duration would spin.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    /// Never zero: the socket layer rejects a zero write timeout.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }
}

/// Timing knobs for `NetClient`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bound on TCP connect and on waiting for the `ConnectReply`.
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// How long `disconnect()` waits for the relay to close its side.
    pub drain_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.tcp_port, 4269);
        assert_eq!(config.udp_port, 4270);
        assert_eq!(config.max_participants, 5);
        assert_eq!(config.liveness_window(), Duration::from_millis(1500));
        assert_eq!(config.history_delay(), Duration::from_millis(500));
        assert_eq!(config.write_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            RelayConfig::from_json_str(r#"{ "tcp_port": 5000, "bind_ip": "127.0.0.1" }"#).unwrap();
        assert_eq!(config.tcp_port, 5000);
        assert_eq!(config.bind_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.udp_port, 4270);
        assert_eq!(config.tick_ms, 50);
    }

    #[test]
    fn bad_json_is_parse_error() {
        let err = RelayConfig::from_json_str(r#"{ "tcp_port": "many" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn missing_file_is_read_error() {
        let path = std::env::temp_dir().join("pit_engineer_relay_no_such_config.json");
        let err = RelayConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }), "got {err:?}");
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir().join(format!(
            "pit_engineer_relay_config_{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{ "max_participants": 3, "liveness_window_ms": 800 }"#).unwrap();
        let config = RelayConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.max_participants, 3);
        assert_eq!(config.liveness_window(), Duration::from_millis(800));
    }

    #[test]
    fn zero_tick_is_clamped() {
        let config = RelayConfig {
            tick_ms: 0,
            ..RelayConfig::default()
        };
        assert_eq!(config.tick(), Duration::from_millis(1));
    }

    #[test]
    fn zero_write_timeout_is_clamped() {
        let config = RelayConfig::from_json_str(r#"{ "write_timeout_ms": 0 }"#).unwrap();
        assert_eq!(config.write_timeout(), Duration::from_millis(1));
    }
}
