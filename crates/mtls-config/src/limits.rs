use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ConfigError, ConfigResult};

/// Optional resource limits. Every field defaults to "no limit".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsSection {
    /// Maximum number of sessions handled at once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,

    /// Deadline for establishing the outbound connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    /// Deadline for the inbound TLS handshake (server only; rejected by the client config)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_secs: Option<u64>,
}

/// Upper bound for `max_connections`
pub const MAX_CONNECTIONS_LIMIT: usize = 1_000_000;

impl LimitsSection {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        match self.max_connections {
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "limits.max_connections must be at least 1".to_string(),
                ));
            }
            Some(max) if max > MAX_CONNECTIONS_LIMIT => {
                return Err(ConfigError::Invalid(format!(
                    "limits.max_connections must be at most {}",
                    MAX_CONNECTIONS_LIMIT
                )));
            }
            _ => {}
        }
        if self.connect_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "limits.connect_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.handshake_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "limits.handshake_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
