//! Room relay configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; nothing here is required, so a bare `room-relay` starts a
//! local instance.

use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Default TCP bind address for the signaling front end.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:7400";

/// Default maximum encoded signaling frame length in bytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Default per-connection outbound queue depth.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Default relay instance ID prefix.
pub const DEFAULT_RELAY_ID_PREFIX: &str = "relay";

/// Room relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP bind address for the signaling front end (default: "0.0.0.0:7400").
    pub bind_address: String,

    /// Maximum encoded frame length accepted on a connection.
    pub max_frame_bytes: usize,

    /// Per-connection outbound queue depth; a full queue drops frames
    /// rather than stalling the relay.
    pub outbound_buffer: usize,

    /// Unique identifier for this relay instance.
    pub relay_id: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let max_frame_bytes = parse_or_default(vars, "RELAY_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES)?;
        let outbound_buffer = parse_or_default(vars, "RELAY_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?;

        let relay_id = vars.get("RELAY_ID").cloned().unwrap_or_else(|| {
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_RELAY_ID_PREFIX}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            max_frame_bytes,
            outbound_buffer,
            relay_id,
        })
    }
}

fn parse_or_default(
    vars: &HashMap<String, String>,
    key: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, raw.clone())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert_eq!(config.outbound_buffer, DEFAULT_OUTBOUND_BUFFER);
        assert!(config.relay_id.starts_with("relay-"));
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            ("RELAY_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string()),
            ("RELAY_MAX_FRAME_BYTES".to_string(), "1024".to_string()),
            ("RELAY_OUTBOUND_BUFFER".to_string(), "32".to_string()),
            ("RELAY_ID".to_string(), "relay-test-001".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load");

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.max_frame_bytes, 1024);
        assert_eq!(config.outbound_buffer, 32);
        assert_eq!(config.relay_id, "relay-test-001");
    }

    #[test]
    fn test_from_vars_rejects_unparseable_number() {
        let vars = HashMap::from([(
            "RELAY_MAX_FRAME_BYTES".to_string(),
            "not-a-number".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue("RELAY_MAX_FRAME_BYTES", v)) if v == "not-a-number")
        );
    }
}
