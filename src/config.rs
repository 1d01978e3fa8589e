//! Protocol configuration, optionally read from the environment.

use super::error::ConfigError;
use super::scan::DEFAULT_DEDUP_WINDOW_MS;
use super::verifier::CodeScheme;
use chrono::Duration;
use std::path::PathBuf;

pub const ENV_SCAN_DEDUP_MS: &str = "TOOLOOP_SCAN_DEDUP_MS";
pub const ENV_CODE_SCHEME: &str = "TOOLOOP_CODE_SCHEME";
pub const ENV_DB_PATH: &str = "TOOLOOP_DB_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Repeats of the same scan inside this window count as one attempt.
    pub scan_dedup_window: Duration,
    pub code_scheme: CodeScheme,
    /// Where to persist exchange state. In-memory only when unset.
    pub database_path: Option<PathBuf>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            scan_dedup_window: Duration::milliseconds(DEFAULT_DEDUP_WINDOW_MS),
            code_scheme: CodeScheme::default(),
            database_path: None,
        }
    }
}

impl ProtocolConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_SCAN_DEDUP_MS) {
            let ms: u32 = raw.trim().parse().map_err(|_| invalid(ENV_SCAN_DEDUP_MS, &raw))?;
            config.scan_dedup_window = Duration::milliseconds(i64::from(ms));
        }
        if let Some(raw) = lookup(ENV_CODE_SCHEME) {
            config.code_scheme = raw.parse().map_err(|_| invalid(ENV_CODE_SCHEME, &raw))?;
        }
        if let Some(raw) = lookup(ENV_DB_PATH) {
            if !raw.trim().is_empty() {
                config.database_path = Some(PathBuf::from(raw.trim()));
            }
        }

        Ok(config)
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ProtocolConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ProtocolConfig::default());
        assert_eq!(config.scan_dedup_window, Duration::milliseconds(1_200));
    }

    #[test]
    fn reads_every_key() {
        let config = ProtocolConfig::from_lookup(lookup(&[
            (ENV_SCAN_DEDUP_MS, "800"),
            (ENV_CODE_SCHEME, "Digest"),
            (ENV_DB_PATH, "/tmp/tooloop.db"),
        ]))
        .unwrap();

        assert_eq!(config.scan_dedup_window, Duration::milliseconds(800));
        assert_eq!(config.code_scheme, CodeScheme::Digest);
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/tooloop.db")));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ProtocolConfig::from_lookup(lookup(&[(ENV_SCAN_DEDUP_MS, "-5")])).is_err());
        assert!(ProtocolConfig::from_lookup(lookup(&[(ENV_CODE_SCHEME, "md5")])).is_err());
    }
}
