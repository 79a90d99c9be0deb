use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limits::DEFAULT_MAX_CONNECTIONS;

/// Knobs the engine itself consults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on how long a transaction may wait for row locks.
    pub lock_timeout: Duration,
    /// Hold lifetime when the caller does not ask for one.
    pub default_hold_ttl: Duration,
    pub max_hold_ttl: Duration,
    /// Create bookings as `confirmed` instead of `pending_confirmation`.
    pub confirm_on_create: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            default_hold_ttl: Duration::from_secs(600),
            max_hold_ttl: Duration::from_secs(3600),
            confirm_on_create: true,
        }
    }
}

/// Server configuration, read from `SLOTGUARD_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub sweep_interval: Duration,
    pub engine: EngineConfig,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            lock_timeout: std::env::var("SLOTGUARD_LOCK_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            default_hold_ttl: env_secs("SLOTGUARD_HOLD_TTL_SECS", defaults.default_hold_ttl),
            max_hold_ttl: env_secs("SLOTGUARD_MAX_HOLD_TTL_SECS", defaults.max_hold_ttl),
            confirm_on_create: env_or("SLOTGUARD_CONFIRM_ON_CREATE", defaults.confirm_on_create),
        };

        Self {
            port: env_or("SLOTGUARD_PORT", 5433),
            bind: std::env::var("SLOTGUARD_BIND").unwrap_or_else(|_| "0.0.0.0".into()),
            data_dir: PathBuf::from(
                std::env::var("SLOTGUARD_DATA_DIR").unwrap_or_else(|_| "./data".into()),
            ),
            password: std::env::var("SLOTGUARD_PASSWORD").unwrap_or_else(|_| "slotguard".into()),
            max_connections: env_or("SLOTGUARD_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS),
            compact_threshold: env_or("SLOTGUARD_COMPACT_THRESHOLD", 1000),
            metrics_port: std::env::var("SLOTGUARD_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            tls_cert: std::env::var("SLOTGUARD_TLS_CERT").ok(),
            tls_key: std::env::var("SLOTGUARD_TLS_KEY").ok(),
            sweep_interval: env_secs("SLOTGUARD_SWEEP_INTERVAL_SECS", Duration::from_secs(5)),
            engine,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotguard.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.lock_timeout, Duration::from_secs(5));
        assert!(c.default_hold_ttl <= c.max_hold_ttl);
        assert!(c.confirm_on_create);
    }

    #[test]
    fn unparsable_values_fall_back() {
        assert_eq!(env_or("SLOTGUARD_TEST_UNSET_VARIABLE", 42u16), 42);
        assert_eq!(
            env_secs("SLOTGUARD_TEST_UNSET_VARIABLE", Duration::from_secs(3)),
            Duration::from_secs(3)
        );
    }
}
