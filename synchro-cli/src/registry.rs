//! Registry of installed apps: app path to module store container.
//!
//! The registry is loaded once per command, mutated in memory and written
//! back in full with [`Registry::save`]. It lives either under the `APPS`
//! key of the configuration or, with `APPS_IN_MODULESTORE`, as the store-wide
//! file `apps.json`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::{ConfigStore, RegistryLocation};
use crate::error::{ConflictError, Result, SynchroError};
use crate::store::ModuleStore;

/// Configuration key holding the registry.
pub const APPS_KEY: &str = "APPS";

/// Store-wide file holding the registry.
pub const APPS_STORE_FILE: &str = "apps.json";

/// Where an app path points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub container: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyEntry {
    uri_path: String,
    container: String,
}

/// Both on-disk shapes of the registry.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredRegistry {
    Map(BTreeMap<String, RegistryEntry>),
    Legacy(Vec<LegacyEntry>),
}

impl From<StoredRegistry> for BTreeMap<String, RegistryEntry> {
    fn from(stored: StoredRegistry) -> Self {
        match stored {
            StoredRegistry::Map(entries) => entries,
            StoredRegistry::Legacy(entries) => entries
                .into_iter()
                .map(|e| {
                    (
                        e.uri_path,
                        RegistryEntry {
                            container: e.container,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// In-memory view of the installed apps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl Registry {
    /// Load the registry from wherever the configuration says it lives.
    pub fn load(config: &ConfigStore, store: &dyn ModuleStore) -> Result<Self> {
        let stored = match config.registry_location() {
            RegistryLocation::Config => match config.get(APPS_KEY) {
                Some(value) if !value.is_null() => {
                    Some(serde_json::from_value::<StoredRegistry>(value.clone())?)
                }
                _ => None,
            },
            RegistryLocation::ModuleStore => match store.read_store_file(APPS_STORE_FILE)? {
                Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => {
                    Some(serde_json::from_slice::<StoredRegistry>(&bytes)?)
                }
                _ => None,
            },
        };

        let entries: BTreeMap<String, RegistryEntry> = stored.map(Into::into).unwrap_or_default();
        debug!(entries = entries.len(), "Loaded app registry");
        Ok(Self { entries })
    }

    /// Persist every entry, replacing what was stored before.
    pub fn save(&self, config: &mut ConfigStore, store: &dyn ModuleStore) -> Result<()> {
        match config.registry_location() {
            RegistryLocation::Config => {
                config.set(APPS_KEY, serde_json::to_value(&self.entries)?);
                config.save()?;
            }
            RegistryLocation::ModuleStore => {
                let bytes = serde_json::to_vec_pretty(&self.entries)?;
                store.write_store_file(APPS_STORE_FILE, &bytes)?;
            }
        }
        debug!(entries = self.entries.len(), "Saved app registry");
        Ok(())
    }

    pub fn is_installed(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&RegistryEntry> {
        self.entries.get(path)
    }

    /// Register an app path.
    pub fn add(&mut self, path: &str, container: &str) -> Result<()> {
        if self.is_installed(path) {
            return Err(ConflictError::PathInstalled(path.to_string()).into());
        }
        self.entries.insert(
            path.to_string(),
            RegistryEntry {
                container: container.to_string(),
            },
        );
        Ok(())
    }

    /// Unregister an app path, returning the container it pointed to.
    pub fn remove(&mut self, path: &str) -> Result<RegistryEntry> {
        self.entries
            .remove(path)
            .ok_or_else(|| SynchroError::NotInstalled(path.to_string()))
    }

    /// App paths that reference a container, sorted.
    pub fn entries_for_container(&self, container: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.container == container)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Entries ordered by app path.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &RegistryEntry)> {
        self.entries.iter().map(|(path, entry)| (path.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
