//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the service endpoint, the last used enrollment id and the
//! session tuning knobs.
//!
//! Configuration is stored at `~/.config/ledgerdesk/config.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::client::{ClientSettings, DEFAULT_RENEWAL_WINDOW_SECS, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::auth::{CredentialStore, FileBackend, KeyringBackend};

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "ledgerdesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Prefix of the environment variables that override file settings
pub const ENV_PREFIX: &str = "LEDGERDESK_";

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8801";
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Upper bound for any configured duration (ten years).
/// Larger values cannot be added to a timestamp without overflow.
pub const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Where the session credential is kept between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Keyring,
}

impl std::str::FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageKind::File),
            "keyring" => Ok(StorageKind::Keyring),
            other => anyhow::bail!("unknown storage '{}', expected 'file' or 'keyring'", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub last_id: Option<String>,
    pub renewal_window_secs: i64,
    pub request_timeout_secs: u64,
    pub token_ttl_secs: Option<i64>,
    pub storage: StorageKind,
    pub history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            last_id: None,
            renewal_window_secs: DEFAULT_RENEWAL_WINDOW_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            token_ttl_secs: None,
            storage: StorageKind::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the session file and result history.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Apply `LEDGERDESK_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Apply overrides looked up by unprefixed key (`ENDPOINT`, `STORAGE`, ...).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(endpoint) = lookup("ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(id) = lookup("ID") {
            self.last_id = Some(id);
        }
        if let Some(value) = lookup("RENEWAL_WINDOW_SECS") {
            self.renewal_window_secs = parse_number("RENEWAL_WINDOW_SECS", &value)?;
        }
        if let Some(value) = lookup("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("TOKEN_TTL_SECS") {
            self.token_ttl_secs = Some(parse_number("TOKEN_TTL_SECS", &value)?);
        }
        if let Some(value) = lookup("STORAGE") {
            self.storage = value.parse()?;
        }
        if let Some(value) = lookup("HISTORY_LIMIT") {
            self.history_limit = parse_number("HISTORY_LIMIT", &value)?;
        }
        Ok(())
    }

    pub fn client_settings(&self) -> ClientSettings {
        let renewal_window_secs = if self.renewal_window_secs < 0 {
            warn!(value = self.renewal_window_secs, "Negative renewal window, using 0");
            0
        } else {
            clamp_secs("renewal_window_secs", self.renewal_window_secs)
        };
        let request_timeout_secs = self.request_timeout_secs.clamp(1, MAX_DURATION_SECS as u64);
        ClientSettings {
            renewal_window: chrono::Duration::seconds(renewal_window_secs),
            request_timeout: std::time::Duration::from_secs(request_timeout_secs),
            token_ttl: self
                .token_ttl_secs
                .filter(|secs| *secs > 0)
                .map(|secs| chrono::Duration::seconds(clamp_secs("token_ttl_secs", secs))),
        }
    }

    pub fn build_store(&self) -> Result<CredentialStore> {
        Ok(match self.storage {
            StorageKind::File => CredentialStore::new(FileBackend::in_dir(&self.data_dir()?)),
            StorageKind::Keyring => CredentialStore::new(KeyringBackend::new()),
        })
    }
}

fn clamp_secs(key: &str, secs: i64) -> i64 {
    if secs > MAX_DURATION_SECS {
        warn!(key, value = secs, max = MAX_DURATION_SECS, "Duration too large, clamping");
        MAX_DURATION_SECS
    } else {
        secs
    }
}

fn parse_number<N: std::str::FromStr>(key: &str, value: &str) -> Result<N>
where
    N::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {}{}: '{}'", ENV_PREFIX, key, value))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.endpoint, "http://localhost:8801");
        assert_eq!(config.renewal_window_secs, 60);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.token_ttl_secs, None);
        assert_eq!(config.storage, StorageKind::File);
        assert_eq!(config.history_limit, 100);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config =
            serde_json::from_str(r#"{"endpoint":"https://ca.example","storage":"keyring"}"#)
                .expect("parse");
        assert_eq!(parsed.endpoint, "https://ca.example");
        assert_eq!(parsed.storage, StorageKind::Keyring);
        assert_eq!(parsed.renewal_window_secs, 60);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = Config {
            last_id: Some("admin".to_string()),
            token_ttl_secs: Some(600),
            ..Config::default()
        };
        config.save_to(&path).expect("save");

        assert_eq!(Config::load_from(&path).expect("load"), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = Config::load_from(&dir.path().join(CONFIG_FILE)).expect("load");
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{not json").expect("write");
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ENDPOINT", "https://ca.example:7054"),
            ("ID", "user1"),
            ("TOKEN_TTL_SECS", "600"),
            ("STORAGE", "Keyring"),
            ("HISTORY_LIMIT", "5"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .expect("overrides");

        assert_eq!(config.endpoint, "https://ca.example:7054");
        assert_eq!(config.last_id.as_deref(), Some("user1"));
        assert_eq!(config.token_ttl_secs, Some(600));
        assert_eq!(config.storage, StorageKind::Keyring);
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.renewal_window_secs, 60);
    }

    #[test]
    fn test_bad_override_is_error() {
        let mut config = Config::default();
        assert!(config
            .apply_overrides(|key| (key == "REQUEST_TIMEOUT_SECS").then(|| "soon".to_string()))
            .is_err());
        assert!(config
            .apply_overrides(|key| (key == "STORAGE").then(|| "vault".to_string()))
            .is_err());
    }

    #[test]
    fn test_client_settings() {
        let config = Config {
            renewal_window_secs: 30,
            request_timeout_secs: 0,
            token_ttl_secs: Some(600),
            ..Config::default()
        };
        let settings = config.client_settings();
        assert_eq!(settings.renewal_window, chrono::Duration::seconds(30));
        assert_eq!(settings.request_timeout, std::time::Duration::from_secs(1));
        assert_eq!(settings.token_ttl, Some(chrono::Duration::minutes(10)));

        let no_ttl = Config {
            token_ttl_secs: Some(0),
            ..Config::default()
        };
        assert_eq!(no_ttl.client_settings().token_ttl, None);
    }

    #[test]
    fn test_client_settings_clamps_huge_durations() {
        let config = Config {
            renewal_window_secs: i64::MAX,
            request_timeout_secs: u64::MAX,
            token_ttl_secs: Some(100_000_000_000_000),
            ..Config::default()
        };
        let settings = config.client_settings();
        let max = chrono::Duration::seconds(MAX_DURATION_SECS);
        assert_eq!(settings.renewal_window, max);
        assert_eq!(settings.token_ttl, Some(max));
        assert_eq!(
            settings.request_timeout,
            std::time::Duration::from_secs(MAX_DURATION_SECS as u64)
        );

        let now = chrono::Utc::now();
        assert!(now.checked_add_signed(max).is_some());
        assert!(now.checked_sub_signed(max).is_some());
    }
}
