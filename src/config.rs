//! Global application configuration.
//!
//! A single configuration record is seeded into the local store under
//! [`crate::storage::GLOBAL_CONFIG_KEY`] on first open. It predates any
//! profile key, so it is the one value stored in the clear.

use crate::error::{DeaddropError, Result};
use serde::{Deserialize, Serialize};

/// Default TTL in seconds before a session closes.
pub const SESSION_TTL_DEFAULT: i64 = 15 * 60;

/// Default number of failed login attempts tolerated before lockout.
pub const MAX_LOGIN_ATTEMPTS_DEFAULT: u32 = 10;

/// Global settings used across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Session TTL in seconds.
    pub ttl: i64,
    /// Consecutive failed login attempts recorded so far.
    pub failed_login_attempts: u32,
    /// Failed attempts allowed before lockout.
    pub max_login_attempts: u32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            ttl: SESSION_TTL_DEFAULT,
            failed_login_attempts: 0,
            max_login_attempts: MAX_LOGIN_ATTEMPTS_DEFAULT,
        }
    }
}

impl GlobalConfig {
    /// Renders the configuration as JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(DeaddropError::serialization)
    }

    /// Parses a configuration from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(DeaddropError::serialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GlobalConfig::default();
        assert_eq!(config.ttl, 900);
        assert_eq!(config.failed_login_attempts, 0);
        assert_eq!(config.max_login_attempts, 10);
    }

    #[test]
    fn test_json_round_trip() {
        let config = GlobalConfig::default();
        let bytes = config.to_json().unwrap();
        assert_eq!(GlobalConfig::from_json(&bytes).unwrap(), config);
    }
}
