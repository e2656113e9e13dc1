//! Per-command handles shared by every app operation.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::ConfigStore;
use crate::deps::DependencySynchronizer;
use crate::error::Result;
use crate::registry::Registry;
use crate::resolver::ReferenceResolver;
use crate::store::{ModuleStore, create_module_store};

/// Configuration, module store and registry for one command invocation.
pub struct AppContext {
    pub config: ConfigStore,
    pub store: Box<dyn ModuleStore>,
    pub registry: Registry,
    pub resolver: ReferenceResolver,
    pub deps: DependencySynchronizer,
}

impl AppContext {
    /// Open the configuration for `base_dir` and everything it points to.
    pub fn open(base_dir: &Path, config_path: Option<&Path>) -> Result<Self> {
        let config = ConfigStore::open(base_dir, config_path)?;
        debug!(config = %config.path().display(), "Using configuration");
        let store = create_module_store(&config.module_store_spec())?;
        Self::with_parts(
            config,
            store,
            ReferenceResolver::interactive()?,
            DependencySynchronizer::npm(),
        )
    }

    /// Assemble a context from explicit parts, loading the registry.
    pub fn with_parts(
        config: ConfigStore,
        store: Box<dyn ModuleStore>,
        resolver: ReferenceResolver,
        deps: DependencySynchronizer,
    ) -> Result<Self> {
        let registry = Registry::load(&config, store.as_ref())?;
        Ok(Self {
            config,
            store,
            registry,
            resolver,
            deps,
        })
    }

    /// Persist the in-memory registry.
    pub fn save_registry(&mut self) -> Result<()> {
        self.registry.save(&mut self.config, self.store.as_ref())
    }

    /// Local directory where a container's dependencies are installed.
    pub fn dependency_dir(&self, container: &str) -> PathBuf {
        self.config.app_root_path().join(container)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::deps::test_support::RecordingPackageManager;
    use crate::store::FileModuleStore;
    use crate::store::memory::MemoryModuleStore;
    use tempfile::TempDir;

    /// A context over a temp directory with a local store and a recording
    /// package manager.
    pub fn local_context() -> (TempDir, AppContext, RecordingPackageManager) {
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => panic!("Failed to create temp dir: {e}"),
        };
        let config = match ConfigStore::open(temp_dir.path(), None) {
            Ok(config) => config,
            Err(e) => panic!("Failed to open config: {e}"),
        };
        let store = match FileModuleStore::new(config.app_root_path()) {
            Ok(store) => store,
            Err(e) => panic!("Failed to create store: {e}"),
        };
        let ctx = build(config, Box::new(store));
        (temp_dir, ctx.0, ctx.1)
    }

    /// Same as [`local_context`] but backed by a store that reports itself
    /// as remote.
    pub fn remote_context() -> (TempDir, AppContext, RecordingPackageManager) {
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => panic!("Failed to create temp dir: {e}"),
        };
        let config = match ConfigStore::open(temp_dir.path(), None) {
            Ok(config) => config,
            Err(e) => panic!("Failed to open config: {e}"),
        };
        let ctx = build(config, Box::new(MemoryModuleStore::default()));
        (temp_dir, ctx.0, ctx.1)
    }

    fn build(
        config: ConfigStore,
        store: Box<dyn ModuleStore>,
    ) -> (AppContext, RecordingPackageManager) {
        let pm = RecordingPackageManager::default();
        let resolver = crate::resolver::test_support::local_resolver();
        let deps = DependencySynchronizer::new(Box::new(pm.clone()));
        match AppContext::with_parts(config, store, resolver, deps) {
            Ok(ctx) => (ctx, pm),
            Err(e) => panic!("Failed to build context: {e}"),
        }
    }
}
