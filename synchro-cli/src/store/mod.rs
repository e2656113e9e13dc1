//! Module stores hold the files of installed Synchro apps.
//!
//! A store is a set of named containers, one per app, plus a few store-wide
//! files (the app registry, when configured to live in the store). Two
//! backends are provided:
//! - [`FileModuleStore`]: a directory per container on the local filesystem
//! - [`HttpModuleStore`]: a remote blob service reached over HTTP

pub mod file;
pub mod http;
#[cfg(test)]
pub(crate) mod memory;

pub use file::FileModuleStore;
pub use http::HttpModuleStore;

use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::manifest::Manifest;

/// File name of the app descriptor inside every container.
pub const MANIFEST_FILE: &str = "package.json";

/// Module store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Module store request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Module store returned status {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Container '{0}' not found in module store")]
    ContainerNotFound(String),

    #[error("Container '{0}' already exists in module store")]
    ContainerExists(String),

    #[error("File '{path}' not found in container '{container}'")]
    FileNotFound { container: String, path: String },

    #[error("Invalid container name '{0}'")]
    InvalidContainerName(String),

    #[error("Invalid file path '{0}'")]
    InvalidFilePath(String),

    #[error("Invalid app definition in container '{container}': {source}")]
    InvalidManifest {
        container: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown module store service '{0}'")]
    UnknownService(String),

    #[error("Invalid module store configuration: {0}")]
    Configuration(String),
}

/// Storage backend for app containers.
pub trait ModuleStore {
    /// Whether containers live on this machine's filesystem.
    fn is_local(&self) -> bool;

    /// Names of all containers, sorted.
    fn list_containers(&self) -> Result<Vec<String>, StoreError>;

    fn container_exists(&self, container: &str) -> Result<bool, StoreError> {
        Ok(self.list_containers()?.iter().any(|c| c == container))
    }

    /// Create an empty container; fails if it already exists.
    fn create_container(&self, container: &str) -> Result<(), StoreError>;

    /// Delete a container and everything in it.
    fn delete_container(&self, container: &str) -> Result<(), StoreError>;

    fn put_file(&self, container: &str, path: &str, content: &[u8]) -> Result<(), StoreError>;

    fn get_file(&self, container: &str, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Relative paths of every file in a container, sorted.
    fn list_files(&self, container: &str) -> Result<Vec<String>, StoreError>;

    /// Read a store-wide file, `None` when it has never been written.
    fn read_store_file(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn write_store_file(&self, name: &str, content: &[u8]) -> Result<(), StoreError>;

    /// Parsed `package.json` of a container.
    fn get_manifest(&self, container: &str) -> Result<Manifest, StoreError> {
        let bytes = self.get_file(container, MANIFEST_FILE)?;
        Manifest::from_slice(&bytes).map_err(|source| StoreError::InvalidManifest {
            container: container.to_string(),
            source,
        })
    }
}

/// A single container of a module store.
pub struct ContainerHandle<'a> {
    store: &'a dyn ModuleStore,
    name: &'a str,
}

impl<'a> ContainerHandle<'a> {
    pub fn new(store: &'a dyn ModuleStore, name: &'a str) -> Self {
        Self { store, name }
    }

    pub fn put_file(&self, path: &str, content: &[u8]) -> Result<(), StoreError> {
        self.store.put_file(self.name, path, content)
    }

    pub fn get_file(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.store.get_file(self.name, path)
    }

    pub fn get_manifest(&self) -> Result<Manifest, StoreError> {
        self.store.get_manifest(self.name)
    }
}

/// Everything needed to construct a module store from configuration.
#[derive(Debug, Clone)]
pub struct ModuleStoreSpec {
    /// Package that provided the service; informational only.
    pub package: Option<String>,
    pub service: String,
    pub configuration: Value,
    /// Directory that relative paths in `configuration` resolve against.
    pub base_dir: PathBuf,
}

/// Construct the module store named by a spec.
pub fn create_module_store(spec: &ModuleStoreSpec) -> Result<Box<dyn ModuleStore>, StoreError> {
    debug!(
        service = %spec.service,
        package = spec.package.as_deref().unwrap_or("<builtin>"),
        "Creating module store"
    );

    match spec.service.as_str() {
        "FileModuleStore" => {
            let directory = spec
                .configuration
                .get("directory")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    StoreError::Configuration(
                        "FileModuleStore requires a \"directory\" setting".to_string(),
                    )
                })?;
            let directory = Path::new(directory);
            let root = if directory.is_absolute() {
                directory.to_path_buf()
            } else {
                spec.base_dir.join(directory)
            };
            Ok(Box::new(FileModuleStore::new(root)?))
        }
        "HttpModuleStore" => {
            let endpoint = spec
                .configuration
                .get("endpoint")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    StoreError::Configuration(
                        "HttpModuleStore requires an \"endpoint\" setting".to_string(),
                    )
                })?;
            let token = spec
                .configuration
                .get("token")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(Box::new(HttpModuleStore::new(endpoint, token)?))
        }
        other => Err(StoreError::UnknownService(other.to_string())),
    }
}

/// Reject container names that could escape the store or collide with
/// store-wide files.
pub fn validate_container_name(name: &str) -> Result<(), StoreError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if invalid {
        return Err(StoreError::InvalidContainerName(name.to_string()));
    }
    Ok(())
}

/// Normalize a relative file path to `/`-separated form, rejecting absolute
/// paths and any `..` component.
pub fn normalize_file_path(path: &str) -> Result<String, StoreError> {
    let mut parts = Vec::new();
    for component in Path::new(&path.replace('\\', "/")).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StoreError::InvalidFilePath(path.to_string()));
            }
        }
    }
    if parts.is_empty() {
        return Err(StoreError::InvalidFilePath(path.to_string()));
    }
    Ok(parts.join("/"))
}
