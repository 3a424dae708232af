//! Application-level configuration loaded from the environment.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default spread applied to phase expirations so rooms created together do
/// not all fire in the same tick.
const DEFAULT_PHASE_JITTER_MS: u64 = 250;
/// Default TTL for the hot-room snapshot cache.
const DEFAULT_CACHE_TTL_MS: u64 = 3_000;
/// Default disconnect grace window.
const DEFAULT_GRACE_PERIOD_MS: u64 = 90_000;
/// Grace window once a client announced a permanent leave.
const LEAVING_GRACE_MS: u64 = 1_000;
/// Per-player coin cost of enabling voice chat.
const DEFAULT_VOICE_COST: i64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("invalid value for `{var}`: {value}")]
    InvalidValue { var: &'static str, value: String },
}

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HS256 secret verifying socket bearer tokens.
    pub token_secret: String,
    /// Deterministic phase-expiry jitter modulus, in milliseconds.
    pub phase_jitter_ms: u64,
    pub cache_ttl: Duration,
    pub grace_period: Duration,
    pub leaving_grace: Duration,
    /// IP announced to voice clients by the SFU collaborator.
    pub voice_announce_ip: Option<String>,
    pub voice_cost: i64,
}

impl AppConfig {
    /// Load the configuration from the environment.
    ///
    /// Only the token secret is mandatory; the caller retries with a delay
    /// rather than exiting, since the HTTP listener is already up.
    pub fn from_env() -> Result<Self, ConfigError> {
        let token_secret = env::var("TOKEN_SECRET").map_err(|_| ConfigError::MissingEnvVar {
            var: "TOKEN_SECRET",
        })?;

        Ok(Self {
            token_secret,
            phase_jitter_ms: parse_env_ms("PHASE_JITTER_MS", DEFAULT_PHASE_JITTER_MS)?,
            cache_ttl: Duration::from_millis(parse_env_ms("CACHE_TTL_MS", DEFAULT_CACHE_TTL_MS)?),
            grace_period: Duration::from_millis(parse_env_ms(
                "GRACE_PERIOD_MS",
                DEFAULT_GRACE_PERIOD_MS,
            )?),
            leaving_grace: Duration::from_millis(LEAVING_GRACE_MS),
            voice_announce_ip: env::var("VOICE_ANNOUNCE_IP").ok(),
            voice_cost: DEFAULT_VOICE_COST,
        })
    }

    /// Deterministic per-room delay added to timer expirations: `id mod J`.
    pub fn phase_jitter(&self, room_id: i64) -> Duration {
        if self.phase_jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(room_id.unsigned_abs() % self.phase_jitter_ms)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            token_secret: "test-secret".into(),
            phase_jitter_ms: 0,
            cache_ttl: Duration::from_secs(3),
            grace_period: Duration::from_millis(50),
            leaving_grace: Duration::from_millis(5),
            voice_announce_ip: None,
            voice_cost: 10,
        }
    }
}

fn parse_env_ms(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_deterministic_per_room() {
        let config = AppConfig {
            phase_jitter_ms: 250,
            ..AppConfig::for_tests()
        };
        assert_eq!(config.phase_jitter(1000), Duration::from_millis(0));
        assert_eq!(config.phase_jitter(1003), Duration::from_millis(3));
        assert_eq!(config.phase_jitter(1003), config.phase_jitter(1003));
    }

    #[test]
    fn zero_jitter_modulus_disables_jitter() {
        let config = AppConfig {
            phase_jitter_ms: 0,
            ..AppConfig::for_tests()
        };
        assert_eq!(config.phase_jitter(77), Duration::ZERO);
    }
}
