//! Configuration system.
//!
//! Loads engine configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Delay between receiving a ping and answering with a pong (client).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// A connection that stays silent for this long after a ping is reaped.
    #[serde(default = "default_kill_timeout_ms")]
    pub kill_timeout_ms: u64,
    /// Countdown between `Match::start` and the first turn.
    #[serde(default = "default_start_countdown_ms")]
    pub start_countdown_ms: u64,
    /// Length of one turn; published as `turnEndsAt` in the match store.
    #[serde(default = "default_turn_ms")]
    pub turn_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_kill_timeout_ms() -> u64 {
    30_000
}

fn default_start_countdown_ms() -> u64 {
    3_000
}

fn default_turn_ms() -> u64 {
    30_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 64,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            kill_timeout_ms: default_kill_timeout_ms(),
            start_countdown_ms: default_start_countdown_ms(),
            turn_ms: default_turn_ms(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_apply_to_partial_json() {
        let cfg = EngineConfig::from_json_str(r#"{"server_addr":"127.0.0.1:0","tick_hz":32}"#)
            .expect("parse");
        assert_eq!(cfg.tick_hz, 32);
        assert_eq!(cfg.kill_timeout_ms, 30_000);
        assert_eq!(cfg.start_countdown_ms, 3_000);
    }
}
