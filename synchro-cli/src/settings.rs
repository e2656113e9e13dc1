//! Per-user settings for the Synchro CLI.
//!
//! Remembers the Synchro host and access token obtained by `synchro auth`, so
//! that `init` and `update` can download the server without prompting.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Host used when none has been configured.
pub const DEFAULT_HOST: &str = "synchro.io";

const SETTINGS_FILE_NAME: &str = "settings.toml";

/// Settings storage errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Could not determine the user configuration directory")]
    NoConfigDir,

    #[error("Failed to access settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize settings for {path}: {source}")]
    Serialize {
        path: String,
        #[source]
        source: toml::ser::Error,
    },
}

/// Persisted user settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Settings {
    /// Host that issued `access_token`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Token used in server download URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Settings {
    /// Host to use, falling back to [`DEFAULT_HOST`].
    pub fn host_or_default(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }
}

/// Location of the user settings file.
///
/// - Linux: `~/.config/synchro/settings.toml`
/// - macOS: `~/Library/Application Support/io.synchro.synchro/settings.toml`
#[derive(Debug, Clone)]
pub struct SettingsStore {
    config_dir: PathBuf,
}

impl SettingsStore {
    /// Locate the platform configuration directory.
    pub fn new() -> Result<Self, SettingsError> {
        let proj_dirs = directories::ProjectDirs::from("io", "synchro", "synchro")
            .ok_or(SettingsError::NoConfigDir)?;
        Ok(Self::at(proj_dirs.config_dir()))
    }

    /// Use an explicit directory.
    pub fn at<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE_NAME)
    }

    /// Load settings, returning defaults when none have been saved.
    pub fn load(&self) -> Result<Settings, SettingsError> {
        let path = self.path();
        if !path.exists() {
            return Ok(Settings::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let path = self.path();
        let content = toml::to_string_pretty(settings).map_err(|source| SettingsError::Serialize {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::create_dir_all(&self.config_dir).map_err(|source| SettingsError::Io {
            path: self.config_dir.display().to_string(),
            source,
        })?;
        std::fs::write(&path, content).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_temp_settings() -> (TempDir, SettingsStore) {
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => panic!("Failed to create temp dir: {e}"),
        };
        let store = SettingsStore::at(temp_dir.path().join("config"));
        (temp_dir, store)
    }

    #[test]
    fn test_load_default_settings() {
        let (_temp, store) = create_temp_settings();

        if let Ok(settings) = store.load() {
            assert_eq!(settings, Settings::default());
            assert_eq!(settings.host_or_default(), DEFAULT_HOST);
        } else {
            panic!("Should load default settings");
        }
    }

    #[test]
    fn test_save_and_load_settings() -> Result<(), Box<dyn std::error::Error>> {
        let (_temp, store) = create_temp_settings();
        let settings = Settings {
            host: Some("staging.synchro.io".to_string()),
            access_token: Some("abc123".to_string()),
        };

        store.save(&settings)?;
        assert_eq!(store.load()?, settings);

        let text = std::fs::read_to_string(store.path())?;
        assert!(text.contains("access_token = \"abc123\""));
        Ok(())
    }

    #[test]
    fn test_corrupt_settings() -> Result<(), Box<dyn std::error::Error>> {
        let (_temp, store) = create_temp_settings();
        std::fs::create_dir_all(store.path().parent().ok_or("no parent")?)?;
        std::fs::write(store.path(), "host = [unterminated")?;

        assert!(matches!(store.load(), Err(SettingsError::Parse { .. })));
        Ok(())
    }
}
