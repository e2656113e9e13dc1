//! Project configuration for a Synchro installation.
//!
//! The configuration lives in `config.json` next to the installed server (or
//! in the file named by `--config`). It is a flat JSON object of upper-case
//! keys shared with the Synchro server, so unknown keys are preserved
//! verbatim and in order when the file is rewritten.
//!
//! Keys read by this tool:
//! - `MODULESTORE_SERVICE`: module store backend (`FileModuleStore`, `HttpModuleStore`)
//! - `MODULESTORE`: backend configuration blob
//! - `MODULESTORE_PACKAGE`: package that provided the backend (informational)
//! - `APP_ROOT_PATH`: local directory holding app dependencies
//! - `APPS`: the app registry, unless `APPS_IN_MODULESTORE` is true

use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::store::ModuleStoreSpec;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn default_module_store_service() -> String {
    "FileModuleStore".to_string()
}

fn default_app_root_path() -> String {
    "synchro-apps".to_string()
}

fn default_module_store_config() -> Value {
    json!({ "directory": default_app_root_path() })
}

/// Where the app registry is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryLocation {
    /// Under the `APPS` key of this configuration.
    Config,
    /// As a store-wide file inside the module store.
    ModuleStore,
}

/// Key/value configuration store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl ConfigStore {
    /// Load configuration from a file.
    ///
    /// A missing file yields an empty configuration that will be created on
    /// the first [`save`](Self::save).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                path,
                values: Map::new(),
            });
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::ReadError {
            path: path.clone(),
            source,
        })?;
        let values = Self::parse(&content).map_err(|source| ConfigError::ParseError {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, values })
    }

    /// Locate and load the configuration for a working directory.
    ///
    /// An explicit path takes priority; otherwise `config.json` in `base_dir`.
    pub fn open(base_dir: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => base_dir.join(p),
            None => base_dir.join(CONFIG_FILE_NAME),
        };
        Self::load(path)
    }

    fn parse(content: &str) -> Result<Map<String, Value>, serde_json::Error> {
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(content)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that relative paths in the configuration resolve against.
    pub fn base_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Write the whole configuration back to its file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(&Value::Object(self.values.clone()))
            .map_err(|source| ConfigError::ParseError {
                path: self.path.clone(),
                source,
            })?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: self.path.clone(),
                source,
            })?;
        }
        std::fs::write(&self.path, content + "\n").map_err(|source| ConfigError::WriteError {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Name of the configured module store backend.
    pub fn module_store_service(&self) -> String {
        self.get_str("MODULESTORE_SERVICE")
            .map(str::to_string)
            .unwrap_or_else(default_module_store_service)
    }

    /// Everything needed to construct the configured module store.
    pub fn module_store_spec(&self) -> ModuleStoreSpec {
        ModuleStoreSpec {
            package: self.get_str("MODULESTORE_PACKAGE").map(str::to_string),
            service: self.module_store_service(),
            configuration: self
                .get("MODULESTORE")
                .cloned()
                .unwrap_or_else(default_module_store_config),
            base_dir: self.base_dir(),
        }
    }

    /// Absolute path of the local app root (where dependencies are installed).
    pub fn app_root_path(&self) -> PathBuf {
        let root = self
            .get_str("APP_ROOT_PATH")
            .map(str::to_string)
            .unwrap_or_else(default_app_root_path);
        let root = PathBuf::from(root);
        if root.is_absolute() {
            root
        } else {
            self.base_dir().join(root)
        }
    }

    /// Where the app registry should be read from and written to.
    pub fn registry_location(&self) -> RegistryLocation {
        match self.get("APPS_IN_MODULESTORE").and_then(Value::as_bool) {
            Some(true) => RegistryLocation::ModuleStore,
            _ => RegistryLocation::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_is_empty() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let config = ConfigStore::open(temp_dir.path(), None)?;
        assert!(config.get("APPS").is_none());
        assert_eq!(config.module_store_service(), "FileModuleStore");
        assert_eq!(config.registry_location(), RegistryLocation::Config);
        assert_eq!(config.app_root_path(), temp_dir.path().join("synchro-apps"));
        Ok(())
    }

    #[test]
    fn test_save_and_reload_preserves_unknown_keys() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "PORT": 1234, "STUDIO_USERS": { "admin": "x" } }"#)?;

        let mut config = ConfigStore::load(&path)?;
        config.set("NOSTUDIO", json!(true));
        config.save()?;

        let reloaded = ConfigStore::load(&path)?;
        assert_eq!(reloaded.get("PORT"), Some(&json!(1234)));
        assert_eq!(reloaded.get("STUDIO_USERS"), Some(&json!({ "admin": "x" })));
        assert_eq!(reloaded.get("NOSTUDIO"), Some(&json!(true)));

        let keys: Vec<&String> = reloaded.values.keys().collect();
        assert_eq!(keys, vec!["PORT", "STUDIO_USERS", "NOSTUDIO"]);
        Ok(())
    }

    #[test]
    fn test_explicit_relative_config_path() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let config = ConfigStore::open(temp_dir.path(), Some(Path::new("alt/config.json")))?;
        assert_eq!(config.path(), temp_dir.path().join("alt/config.json"));
        assert_eq!(config.base_dir(), temp_dir.path().join("alt"));
        Ok(())
    }

    #[test]
    fn test_parse_error_reports_path() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json")?;

        match ConfigStore::load(&path) {
            Err(ConfigError::ParseError { path: p, .. }) => assert_eq!(p, path),
            other => panic!("Expected parse error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_module_store_spec_and_registry_location() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let mut config = ConfigStore::open(temp_dir.path(), None)?;
        config.set("MODULESTORE_SERVICE", json!("HttpModuleStore"));
        config.set("MODULESTORE", json!({ "endpoint": "https://store.example.com" }));
        config.set("MODULESTORE_PACKAGE", json!("synchro-http-store"));
        config.set("APPS_IN_MODULESTORE", json!(true));
        config.set("APP_ROOT_PATH", json!("apps"));

        let spec = config.module_store_spec();
        assert_eq!(spec.service, "HttpModuleStore");
        assert_eq!(spec.package.as_deref(), Some("synchro-http-store"));
        assert_eq!(spec.configuration["endpoint"], json!("https://store.example.com"));
        assert_eq!(config.registry_location(), RegistryLocation::ModuleStore);
        assert_eq!(config.app_root_path(), temp_dir.path().join("apps"));
        Ok(())
    }
}
