//! Local filesystem module store.
//!
//! Each container is a directory under the store root. Store-wide files sit
//! directly in the root, so they never show up as containers.

use std::path::{Path, PathBuf};

use super::{ModuleStore, StoreError, normalize_file_path, validate_container_name};

/// Module store backed by a local directory.
#[derive(Debug, Clone)]
pub struct FileModuleStore {
    root: PathBuf,
}

impl FileModuleStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf, StoreError> {
        validate_container_name(container)?;
        Ok(self.root.join(container))
    }

    fn existing_container_dir(&self, container: &str) -> Result<PathBuf, StoreError> {
        let dir = self.container_dir(container)?;
        if !dir.is_dir() {
            return Err(StoreError::ContainerNotFound(container.to_string()));
        }
        Ok(dir)
    }

    fn collect_files(dir: &Path, prefix: &str, files: &mut Vec<String>) -> Result<(), StoreError> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                Self::collect_files(&entry.path(), &relative, files)?;
            } else if file_type.is_file() {
                files.push(relative);
            }
        }
        Ok(())
    }
}

impl ModuleStore for FileModuleStore {
    fn is_local(&self) -> bool {
        true
    }

    fn list_containers(&self) -> Result<Vec<String>, StoreError> {
        let mut containers = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                containers.push(name);
            }
        }
        containers.sort();
        Ok(containers)
    }

    fn container_exists(&self, container: &str) -> Result<bool, StoreError> {
        Ok(self.container_dir(container)?.is_dir())
    }

    fn create_container(&self, container: &str) -> Result<(), StoreError> {
        let dir = self.container_dir(container)?;
        if dir.exists() {
            return Err(StoreError::ContainerExists(container.to_string()));
        }
        std::fs::create_dir_all(&dir)?;
        Ok(())
    }

    fn delete_container(&self, container: &str) -> Result<(), StoreError> {
        let dir = self.existing_container_dir(container)?;
        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    fn put_file(&self, container: &str, path: &str, content: &[u8]) -> Result<(), StoreError> {
        let dir = self.existing_container_dir(container)?;
        let target = dir.join(normalize_file_path(path)?);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, content)?;
        Ok(())
    }

    fn get_file(&self, container: &str, path: &str) -> Result<Vec<u8>, StoreError> {
        let dir = self.existing_container_dir(container)?;
        let target = dir.join(normalize_file_path(path)?);
        if !target.is_file() {
            return Err(StoreError::FileNotFound {
                container: container.to_string(),
                path: path.to_string(),
            });
        }
        Ok(std::fs::read(target)?)
    }

    fn list_files(&self, container: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.existing_container_dir(container)?;
        let mut files = Vec::new();
        Self::collect_files(&dir, "", &mut files)?;
        files.sort();
        Ok(files)
    }

    fn read_store_file(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_container_name(name).map_err(|_| StoreError::InvalidFilePath(name.to_string()))?;
        let path = self.root.join(name);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    fn write_store_file(&self, name: &str, content: &[u8]) -> Result<(), StoreError> {
        validate_container_name(name).map_err(|_| StoreError::InvalidFilePath(name.to_string()))?;
        std::fs::write(self.root.join(name), content)?;
        Ok(())
    }
}
