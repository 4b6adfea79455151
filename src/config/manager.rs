use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::transfer::TransferMode;

/// Most-recently-used records kept in the profile file.
const MAX_RECORDS: usize = 10;

fn default_port() -> u16 {
    22
}

/// Parse a port field from free-form text; absent or non-numeric input
/// falls back to the SSH default.
pub fn parse_port(text: &str) -> u16 {
    text.trim().parse().unwrap_or(default_port())
}

fn serialize_secret<S>(plain: &Option<String>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match plain {
        Some(value) => {
            let cipher = crate::config::encryption::SecretCipher::new();
            let encrypted = cipher.encrypt(value).map_err(serde::ser::Error::custom)?;
            serializer.serialize_some(&encrypted)
        }
        None => serializer.serialize_none(),
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let encrypted = Option::<String>::deserialize(deserializer)?;
    match encrypted {
        Some(value) => {
            let cipher = crate::config::encryption::SecretCipher::new();
            cipher
                .decrypt(&value)
                .map(Some)
                .map_err(serde::de::Error::custom)
        }
        None => Ok(None),
    }
}

/// Everything needed to reach and authenticate one host.
///
/// A session uses one of these for the target, and optionally a second
/// one for the bastion in front of it. `static_secret` answers direct
/// password authentication and literal "Password:" prompts;
/// `challenge_secret` answers PIN-style prompts only.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConnectionProfile {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(
        default,
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub static_secret: Option<String>,
    #[serde(
        default,
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub challenge_secret: Option<String>,
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        Self::new(String::new(), default_port(), String::new())
    }
}

impl ConnectionProfile {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            key_path: None,
            static_secret: None,
            challenge_secret: None,
        }
    }

    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// A profile is usable once host and user are set; the port always
    /// has a value thanks to the parsing default.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(AppError::Validation("Host cannot be empty".to_string()));
        }

        if self.user.trim().is_empty() {
            return Err(AppError::Validation("Username cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(AppError::Validation(
                "Port must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Source and destination paths for the two transfer directions.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TransferPaths {
    #[serde(default)]
    pub up_local: String,
    #[serde(default)]
    pub up_remote: String,
    #[serde(default)]
    pub down_remote: String,
    #[serde(default)]
    pub down_local: String,
}

/// One saved connection setup: the profile pair, transfer paths, and a
/// display label. Replaced in place when saved under an existing label.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProfileRecord {
    pub id: String,
    pub label: String,
    pub use_bastion: bool,
    #[serde(default)]
    pub upload_mode: TransferMode,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bastion: ConnectionProfile,
    pub target: ConnectionProfile,
    #[serde(default)]
    pub paths: TransferPaths,
}

impl ProfileRecord {
    pub fn new(label: impl Into<String>, target: ConnectionProfile) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            use_bastion: false,
            bastion: ConnectionProfile::default(),
            target,
            upload_mode: TransferMode::default(),
            paths: TransferPaths::default(),
            created_at: Utc::now(),
            last_used: None,
        }
    }

    /// Fallback label when the operator did not name the record.
    pub fn display_label(&self) -> String {
        if self.label.trim().is_empty() {
            format!("{}@{}", self.target.user, self.target.host)
        } else {
            self.label.clone()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
struct ProfileFile {
    #[serde(default)]
    records: Vec<ProfileRecord>,
}

/// Profile persistence: a TOML file holding the MRU record list.
pub struct ProfileStore {
    store_path: PathBuf,
    file: ProfileFile,
}

impl ProfileStore {
    pub fn new() -> Result<Self> {
        let store_path = Self::default_path()?;
        let file = Self::load_from_path(&store_path)?;

        Ok(Self { store_path, file })
    }

    /// Store backed by a custom path (useful for testing).
    pub fn with_path<P: AsRef<Path>>(store_path: P) -> Result<Self> {
        let store_path = store_path.as_ref().to_path_buf();
        let file = Self::load_from_path(&store_path)?;

        Ok(Self { store_path, file })
    }

    fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config("Cannot determine config directory".to_string()))?
            .join("hopsync");

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).map_err(|e| {
                AppError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        Ok(config_dir.join("profiles.toml"))
    }

    fn load_from_path(path: &Path) -> Result<ProfileFile> {
        if !path.exists() {
            return Ok(ProfileFile::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read profile file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse profile file: {}", e)))
    }

    pub fn save(&self) -> Result<()> {
        let toml = toml::to_string_pretty(&self.file)
            .map_err(|e| AppError::Config(format!("Failed to serialize profiles: {}", e)))?;
        fs::write(&self.store_path, toml)
            .map_err(|e| AppError::Config(format!("Failed to write profiles: {}", e)))?;
        Ok(())
    }

    pub fn records(&self) -> &[ProfileRecord] {
        &self.file.records
    }

    pub fn find(&self, label: &str) -> Option<&ProfileRecord> {
        self.file.records.iter().find(|r| r.display_label() == label)
    }

    /// Insert or replace by label, most recent first, and persist.
    /// The list is capped; the oldest record falls off the end.
    pub fn remember(&mut self, record: ProfileRecord) -> Result<()> {
        record.target.validate()?;
        if record.use_bastion {
            record.bastion.validate()?;
        }

        let label = record.display_label();
        self.file.records.retain(|r| r.display_label() != label);
        self.file.records.insert(0, record);
        self.file.records.truncate(MAX_RECORDS);
        self.save()
    }

    pub fn touch_last_used(&mut self, label: &str) -> Result<()> {
        if let Some(record) = self
            .file
            .records
            .iter_mut()
            .find(|r| r.display_label() == label)
        {
            record.last_used = Some(Utc::now());
            self.save()?;
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.file.records.clear();
        if self.store_path.exists() {
            fs::remove_file(&self.store_path)
                .map_err(|e| AppError::Config(format!("Failed to remove profile file: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: &str) -> ProfileRecord {
        let mut target = ConnectionProfile::new("10.0.0.5", 22, "deploy");
        target.static_secret = Some("s3cret".to_string());
        ProfileRecord::new(label, target)
    }

    #[test]
    fn test_parse_port_defaults_to_22() {
        assert_eq!(parse_port("2222"), 2222);
        assert_eq!(parse_port(""), 22);
        assert_eq!(parse_port("not-a-port"), 22);
    }

    #[test]
    fn test_validate_requires_host_and_user() {
        let profile = ConnectionProfile::new("", 22, "deploy");
        assert!(profile.validate().is_err());

        let profile = ConnectionProfile::new("10.0.0.5", 22, "");
        assert!(profile.validate().is_err());

        let profile = ConnectionProfile::new("10.0.0.5", 22, "deploy");
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_secret_roundtrip_through_toml() {
        let mut profile = ConnectionProfile::new("10.0.0.5", 22, "deploy");
        profile.static_secret = Some("pw".to_string());
        profile.challenge_secret = Some("4913".to_string());

        let serialized = toml::to_string(&profile).unwrap();
        // Secrets never appear in cleartext on disk
        assert!(!serialized.contains("pw"));
        assert!(!serialized.contains("4913"));

        let decoded: ConnectionProfile = toml::from_str(&serialized).unwrap();
        assert_eq!(decoded.static_secret.as_deref(), Some("pw"));
        assert_eq!(decoded.challenge_secret.as_deref(), Some("4913"));
    }

    #[test]
    fn test_remember_is_mru_and_replaces_by_label() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::with_path(dir.path().join("profiles.toml")).unwrap();

        store.remember(record("alpha")).unwrap();
        store.remember(record("beta")).unwrap();
        assert_eq!(store.records()[0].label, "beta");

        // Saving alpha again moves it to the front without duplicating
        store.remember(record("alpha")).unwrap();
        assert_eq!(store.records().len(), 2);
        assert_eq!(store.records()[0].label, "alpha");
    }

    #[test]
    fn test_remember_caps_record_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::with_path(dir.path().join("profiles.toml")).unwrap();

        for i in 0..15 {
            store.remember(record(&format!("host-{i}"))).unwrap();
        }
        assert_eq!(store.records().len(), MAX_RECORDS);
        assert_eq!(store.records()[0].label, "host-14");
    }

    #[test]
    fn test_store_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.toml");

        let mut store = ProfileStore::with_path(&path).unwrap();
        store.remember(record("alpha")).unwrap();
        drop(store);

        let store = ProfileStore::with_path(&path).unwrap();
        let found = store.find("alpha").unwrap();
        assert_eq!(found.target.static_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::with_path(dir.path().join("nope.toml")).unwrap();
        assert!(store.records().is_empty());
    }
}
