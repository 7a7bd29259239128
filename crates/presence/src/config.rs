use std::str::FromStr;
use std::time::Duration;

use herald_core::timing::{DEFAULT_EXPIRY_GRACE_MS, DEFAULT_PRESENCE_TTL_SECS, DEFAULT_SCAN_COUNT};

use crate::error::ConfigError;

/// Default interval between in-memory store expiry sweeps (in milliseconds).
const DEFAULT_REAPER_INTERVAL_MS: u64 = 250;

/// How lapsed leases are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogStrategy {
    /// Local timer per key, checked shortly after the lease should lapse.
    Timer,
    /// Store-pushed expiry notifications.
    Keyspace,
}

impl FromStr for WatchdogStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timer" => Ok(Self::Timer),
            "keyspace" => Ok(Self::Keyspace),
            _ => Err(ConfigError::Invalid {
                var: "PRESENCE_WATCHDOG",
                expected: "one of: timer, keyspace",
                value: s.to_string(),
            }),
        }
    }
}

/// Presence configuration loaded from environment variables.
///
/// All fields have defaults suitable for production; tests usually build one
/// with [`Default`] and override the TTL.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Lease lifetime for presence keys and sequence counters.
    pub ttl: Duration,
    /// Delay past the lease deadline before the watchdog checks the store.
    pub expiry_grace: Duration,
    /// Keys examined per scan page.
    pub scan_count: usize,
    /// Expiry detection strategy.
    pub watchdog: WatchdogStrategy,
    /// Sweep interval of the in-memory store's reaper.
    pub reaper_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_PRESENCE_TTL_SECS),
            expiry_grace: Duration::from_millis(DEFAULT_EXPIRY_GRACE_MS),
            scan_count: DEFAULT_SCAN_COUNT,
            watchdog: WatchdogStrategy::Timer,
            reaper_interval: Duration::from_millis(DEFAULT_REAPER_INTERVAL_MS),
        }
    }
}

impl PresenceConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default |
    /// |-------------------------------|---------|
    /// | `PRESENCE_TTL_SECS`           | `30`    |
    /// | `PRESENCE_EXPIRY_GRACE_MS`    | `100`   |
    /// | `PRESENCE_SCAN_COUNT`         | `1000`  |
    /// | `PRESENCE_WATCHDOG`           | `timer` |
    /// | `PRESENCE_REAPER_INTERVAL_MS` | `250`   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ttl_secs: u64 = parse_var(&lookup, "PRESENCE_TTL_SECS", "a positive integer")?
            .unwrap_or(DEFAULT_PRESENCE_TTL_SECS);
        if ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "PRESENCE_TTL_SECS",
                expected: "a positive integer",
                value: "0".into(),
            });
        }

        let grace_ms: u64 = parse_var(&lookup, "PRESENCE_EXPIRY_GRACE_MS", "an integer")?
            .unwrap_or(DEFAULT_EXPIRY_GRACE_MS);

        let scan_count: usize = parse_var(&lookup, "PRESENCE_SCAN_COUNT", "an integer")?
            .unwrap_or(defaults.scan_count)
            .max(1);

        let watchdog = match lookup("PRESENCE_WATCHDOG") {
            Some(raw) => raw.parse()?,
            None => defaults.watchdog,
        };

        let reaper_ms: u64 = parse_var(&lookup, "PRESENCE_REAPER_INTERVAL_MS", "an integer")?
            .unwrap_or(DEFAULT_REAPER_INTERVAL_MS)
            .max(1);

        Ok(Self {
            ttl: Duration::from_secs(ttl_secs),
            expiry_grace: Duration::from_millis(grace_ms),
            scan_count,
            watchdog,
            reaper_interval: Duration::from_millis(reaper_ms),
        })
    }

    /// Override the lease TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                var,
                expected,
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use assert_matches::assert_matches;

    fn load(vars: &[(&str, &str)]) -> Result<PresenceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PresenceConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.ttl, Duration::from_secs(30));
        assert_eq!(config.expiry_grace, Duration::from_millis(100));
        assert_eq!(config.scan_count, 1000);
        assert_eq!(config.watchdog, WatchdogStrategy::Timer);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("PRESENCE_TTL_SECS", "5"),
            ("PRESENCE_EXPIRY_GRACE_MS", "50"),
            ("PRESENCE_SCAN_COUNT", "10"),
            ("PRESENCE_WATCHDOG", "Keyspace"),
        ])
        .unwrap();
        assert_eq!(config.ttl, Duration::from_secs(5));
        assert_eq!(config.expiry_grace, Duration::from_millis(50));
        assert_eq!(config.scan_count, 10);
        assert_eq!(config.watchdog, WatchdogStrategy::Keyspace);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_matches!(
            load(&[("PRESENCE_TTL_SECS", "soon")]),
            Err(ConfigError::Invalid { var: "PRESENCE_TTL_SECS", .. })
        );
        assert_matches!(
            load(&[("PRESENCE_TTL_SECS", "0")]),
            Err(ConfigError::Invalid { var: "PRESENCE_TTL_SECS", .. })
        );
        assert_matches!(
            load(&[("PRESENCE_WATCHDOG", "cron")]),
            Err(ConfigError::Invalid { var: "PRESENCE_WATCHDOG", .. })
        );
    }
}
