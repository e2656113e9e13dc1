//! In-memory module store that reports itself as remote.

use std::cell::RefCell;
use std::collections::BTreeMap;

use super::{ModuleStore, StoreError, normalize_file_path, validate_container_name};

#[derive(Debug, Default)]
pub struct MemoryModuleStore {
    containers: RefCell<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    store_files: RefCell<BTreeMap<String, Vec<u8>>>,
}

impl ModuleStore for MemoryModuleStore {
    fn is_local(&self) -> bool {
        false
    }

    fn list_containers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.containers.borrow().keys().cloned().collect())
    }

    fn create_container(&self, container: &str) -> Result<(), StoreError> {
        validate_container_name(container)?;
        let mut containers = self.containers.borrow_mut();
        if containers.contains_key(container) {
            return Err(StoreError::ContainerExists(container.to_string()));
        }
        containers.insert(container.to_string(), BTreeMap::new());
        Ok(())
    }

    fn delete_container(&self, container: &str) -> Result<(), StoreError> {
        self.containers
            .borrow_mut()
            .remove(container)
            .map(|_| ())
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))
    }

    fn put_file(&self, container: &str, path: &str, content: &[u8]) -> Result<(), StoreError> {
        let path = normalize_file_path(path)?;
        let mut containers = self.containers.borrow_mut();
        let files = containers
            .get_mut(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        files.insert(path, content.to_vec());
        Ok(())
    }

    fn get_file(&self, container: &str, path: &str) -> Result<Vec<u8>, StoreError> {
        let normalized = normalize_file_path(path)?;
        let containers = self.containers.borrow();
        let files = containers
            .get(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        files
            .get(&normalized)
            .cloned()
            .ok_or_else(|| StoreError::FileNotFound {
                container: container.to_string(),
                path: path.to_string(),
            })
    }

    fn list_files(&self, container: &str) -> Result<Vec<String>, StoreError> {
        let containers = self.containers.borrow();
        let files = containers
            .get(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        Ok(files.keys().cloned().collect())
    }

    fn read_store_file(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.store_files.borrow().get(name).cloned())
    }

    fn write_store_file(&self, name: &str, content: &[u8]) -> Result<(), StoreError> {
        self.store_files
            .borrow_mut()
            .insert(name.to_string(), content.to_vec());
        Ok(())
    }
}
