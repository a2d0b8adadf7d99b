//! Environment-driven configuration for identity entry points.
//!
//! # Responsibility
//! - Resolve database path, log settings and resolve timeout from env.
//!
//! # Invariants
//! - Blank values fall back to defaults.
//! - The process-wide config is resolved once and then frozen.

use contact_identity_core::default_log_level;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

pub const DB_PATH_ENV: &str = "CONTACT_IDENTITY_DB_PATH";
pub const LOG_LEVEL_ENV: &str = "CONTACT_IDENTITY_LOG_LEVEL";
pub const LOG_DIR_ENV: &str = "CONTACT_IDENTITY_LOG_DIR";
pub const RESOLVE_TIMEOUT_ENV: &str = "CONTACT_IDENTITY_RESOLVE_TIMEOUT_MS";

const DEFAULT_DB_FILE_NAME: &str = "contact_identity.sqlite3";

static GLOBAL_CONFIG: OnceLock<IdentityConfig> = OnceLock::new();

/// Runtime settings for the API and CLI surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    /// Logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    /// Per-resolution deadline; `None` waits as long as the store does.
    pub resolve_timeout: Option<Duration>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            db_path: std::env::temp_dir().join(DEFAULT_DB_FILE_NAME),
            log_level: default_log_level().to_string(),
            log_dir: None,
            resolve_timeout: None,
        }
    }
}

impl IdentityConfig {
    /// Reads settings from process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults.
    ///
    /// An unparsable timeout is ignored rather than rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        Self {
            db_path: read(DB_PATH_ENV).map_or(defaults.db_path, PathBuf::from),
            log_level: read(LOG_LEVEL_ENV).unwrap_or(defaults.log_level),
            log_dir: read(LOG_DIR_ENV).map(PathBuf::from),
            resolve_timeout: read(RESOLVE_TIMEOUT_ENV)
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|millis| *millis > 0)
                .map(Duration::from_millis),
        }
    }

    /// Process-wide config, read from env on first use.
    pub fn global() -> &'static IdentityConfig {
        GLOBAL_CONFIG.get_or_init(Self::from_env)
    }

    /// Freezes `self` as the process-wide config.
    ///
    /// Fails, handing `self` back, once `global()` has been resolved.
    pub fn install(self) -> Result<(), IdentityConfig> {
        GLOBAL_CONFIG.set(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{IdentityConfig, DB_PATH_ENV, LOG_DIR_ENV, LOG_LEVEL_ENV, RESOLVE_TIMEOUT_ENV};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = IdentityConfig::from_lookup(lookup(&[]));
        assert_eq!(config, IdentityConfig::default());
        assert!(config.db_path.ends_with("contact_identity.sqlite3"));
        assert_eq!(config.log_dir, None);
    }

    #[test]
    fn values_are_trimmed_and_blank_values_ignored() {
        let config = IdentityConfig::from_lookup(lookup(&[
            (DB_PATH_ENV, "  /var/lib/identity.db "),
            (LOG_LEVEL_ENV, "   "),
            (LOG_DIR_ENV, "/var/log/identity"),
            (RESOLVE_TIMEOUT_ENV, "250"),
        ]));
        assert_eq!(config.db_path, PathBuf::from("/var/lib/identity.db"));
        assert_eq!(config.log_level, IdentityConfig::default().log_level);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/identity")));
        assert_eq!(config.resolve_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn bad_or_zero_timeout_means_no_deadline() {
        for raw in ["soon", "0", "-5"] {
            let config = IdentityConfig::from_lookup(lookup(&[(RESOLVE_TIMEOUT_ENV, raw)]));
            assert_eq!(config.resolve_timeout, None, "{raw}");
        }
    }
}
