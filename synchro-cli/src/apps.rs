//! App management commands other than install: add, new, remove, delete,
//! listing and dependency sync.
//!
//! Functions take fully resolved arguments; prompting and printing live in
//! the CLI layer.

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::context::AppContext;
use crate::error::{ConflictError, Result, SynchroError};
use crate::installer::DependencyAction;
use crate::manifest::Manifest;
use crate::store::{ContainerHandle, StoreError};
use crate::templates::render_app_template;

static APP_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").ok());

/// Whether a name is usable as a new app's container or path: lower case
/// letters, digits and single dashes between them.
pub fn is_valid_app_name(name: &str) -> bool {
    APP_NAME.as_ref().is_some_and(|re| re.is_match(name))
}

/// Compile a listing filter.
pub fn compile_filter(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| SynchroError::Input(format!("Invalid filter '{pattern}': {e}")))
}

/// Register an existing container under an app path.
///
/// On a remote store the app's dependencies are installed locally as well.
pub fn add(ctx: &mut AppContext, container: &str, path: &str) -> Result<DependencyAction> {
    if ctx.registry.is_installed(path) {
        return Err(ConflictError::PathInstalled(path.to_string()).into());
    }
    if !ctx.store.container_exists(container)? {
        return Err(SynchroError::ContainerNotFound(container.to_string()));
    }

    ctx.registry.add(path, container)?;
    ctx.save_registry()?;
    debug!(path, container, "Registered app");

    if ctx.store.is_local() {
        return Ok(DependencyAction::NotNeeded);
    }
    sync_container(ctx, container)
}

/// Create a container from the starter template and register it.
pub fn new_app(ctx: &mut AppContext, container: &str, path: &str, description: &str) -> Result<()> {
    if !is_valid_app_name(container) {
        return Err(SynchroError::Input(
            "Synchro app container name can only contain lower case letters, numbers, and dash characters"
                .to_string(),
        ));
    }
    if !is_valid_app_name(path) {
        return Err(SynchroError::Input(
            "Synchro app path can only contain lower case letters, numbers, and dash characters"
                .to_string(),
        ));
    }
    if ctx.registry.is_installed(path) {
        return Err(ConflictError::PathInstalled(path.to_string()).into());
    }

    ctx.store.create_container(container).map_err(|e| match e {
        StoreError::ContainerExists(c) => ConflictError::ContainerExists(c).into(),
        other => SynchroError::from(other),
    })?;

    let handle = ContainerHandle::new(ctx.store.as_ref(), container);
    for (file, content) in render_app_template(path, description) {
        debug!(file, "Writing template file");
        handle.put_file(file, content.as_bytes())?;
    }

    ctx.registry.add(path, container)?;
    ctx.save_registry()?;
    Ok(())
}

/// Unregister an app path, returning the container it referenced. The
/// container is left in the store.
pub fn remove(ctx: &mut AppContext, path: &str) -> Result<String> {
    let entry = ctx.registry.remove(path)?;
    ctx.save_registry()?;
    Ok(entry.container)
}

/// Unregister every path referencing a container, then delete it.
///
/// Returns the app paths that were unregistered.
pub fn delete(ctx: &mut AppContext, container: &str) -> Result<Vec<String>> {
    let paths = ctx.registry.entries_for_container(container);
    if !paths.is_empty() {
        for path in &paths {
            ctx.registry.remove(path)?;
        }
        ctx.save_registry()?;
    }

    ctx.store.delete_container(container).map_err(|e| match e {
        StoreError::ContainerNotFound(c) => SynchroError::ContainerNotFound(c),
        other => SynchroError::from(other),
    })?;
    Ok(paths)
}

/// Install a remote app's dependencies into the local app root.
///
/// Only meaningful for remote stores; a local store installs dependencies at
/// install time.
pub fn syncdeps(ctx: &AppContext, container: &str) -> Result<bool> {
    require_remote_store(ctx)?;
    Ok(sync_container(ctx, container)? == DependencyAction::Installed)
}

/// Fail unless the configured module store is remote.
pub fn require_remote_store(ctx: &AppContext) -> Result<()> {
    if ctx.store.is_local() {
        warn!("syncdeps invoked against a local module store");
        return Err(SynchroError::Input(
            "The syncdeps command installs dependencies of apps in a remote module store. \
             The local file module store installs dependencies with the app, so no action was taken."
                .to_string(),
        ));
    }
    Ok(())
}

fn sync_container(ctx: &AppContext, container: &str) -> Result<DependencyAction> {
    if !ctx.store.container_exists(container)? {
        return Err(SynchroError::ContainerNotFound(container.to_string()));
    }
    let manifest = ctx.store.get_manifest(container)?;
    if ctx.deps.sync(&manifest, &ctx.dependency_dir(container))? {
        Ok(DependencyAction::Installed)
    } else {
        Ok(DependencyAction::NotNeeded)
    }
}

/// Stored manifest and file list of a container.
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub manifest: Option<Manifest>,
    pub files: Vec<String>,
}

/// One registered app.
#[derive(Debug, Clone)]
pub struct AppListing {
    pub path: String,
    pub container: String,
    pub details: Option<ContainerDetails>,
}

/// One container in the module store.
#[derive(Debug, Clone)]
pub struct ContainerListing {
    pub container: String,
    /// App paths registered against this container.
    pub installed_as: Vec<String>,
    pub details: Option<ContainerDetails>,
}

/// Registered apps whose path matches `filter`. Read-only.
pub fn list_apps(ctx: &AppContext, filter: Option<&Regex>, details: bool) -> Result<Vec<AppListing>> {
    ctx.registry
        .entries()
        .filter(|(path, _)| filter.is_none_or(|re| re.is_match(path)))
        .map(|(path, entry)| -> Result<AppListing> {
            let details = if details {
                Some(container_details(ctx, &entry.container)?)
            } else {
                None
            };
            Ok(AppListing {
                path: path.to_string(),
                container: entry.container.clone(),
                details,
            })
        })
        .collect()
}

/// Store containers whose name matches `filter`. Read-only.
pub fn list_containers(
    ctx: &AppContext,
    filter: Option<&Regex>,
    details: bool,
) -> Result<Vec<ContainerListing>> {
    ctx.store
        .list_containers()?
        .into_iter()
        .filter(|container| filter.is_none_or(|re| re.is_match(container)))
        .map(|container| -> Result<ContainerListing> {
            let details = if details {
                Some(container_details(ctx, &container)?)
            } else {
                None
            };
            Ok(ContainerListing {
                installed_as: ctx.registry.entries_for_container(&container),
                container,
                details,
            })
        })
        .collect()
}

fn container_details(ctx: &AppContext, container: &str) -> Result<ContainerDetails> {
    let manifest = match ctx.store.get_manifest(container) {
        Ok(manifest) => Some(manifest),
        Err(StoreError::FileNotFound { .. }) | Err(StoreError::ContainerNotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };
    let files = match ctx.store.list_files(container) {
        Ok(files) => files,
        Err(StoreError::ContainerNotFound(_)) => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    Ok(ContainerDetails { manifest, files })
}
