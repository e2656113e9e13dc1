//! The app install/update pipeline.
//!
//! ```text
//! ResolvingReference -> Classifying -> CheckingConflict -> CreatingContainer
//!   -> PopulatingContainer -> UpdatingRegistry -> SyncingDependencies -> Done
//! ```
//!
//! Any stage may end in `Failed`. Nothing is rolled back: a failure while
//! populating leaves a partially written container behind.

use std::fmt;
use tracing::{debug, info};

use crate::archive::{self, AppArchive, ArchiveFormat, ExtractAll, ExtractionPolicy};
use crate::context::AppContext;
use crate::error::{ConflictError, ManifestError, Result, SynchroError};
use crate::manifest::Manifest;
use crate::store::{ContainerHandle, MANIFEST_FILE};

/// Pipeline stage, logged on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    ResolvingReference,
    Classifying,
    CheckingConflict,
    CreatingContainer,
    PopulatingContainer,
    UpdatingRegistry,
    SyncingDependencies,
    Done,
    Failed(String),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResolvingReference => write!(f, "resolving reference"),
            Self::Classifying => write!(f, "classifying archive"),
            Self::CheckingConflict => write!(f, "checking for conflicts"),
            Self::CreatingContainer => write!(f, "creating container"),
            Self::PopulatingContainer => write!(f, "populating container"),
            Self::UpdatingRegistry => write!(f, "updating registry"),
            Self::SyncingDependencies => write!(f, "syncing dependencies"),
            Self::Done => write!(f, "done"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// What to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallRequest {
    /// Fresh install from a path or URL.
    Install {
        reference: String,
        container: Option<String>,
        path: Option<String>,
    },
    /// Re-fetch an installed container from its recorded archive URL.
    Update { container: String },
}

/// What happened to the app's dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyAction {
    /// The app declares no dependencies.
    NotNeeded,
    /// Installed locally with the package manager.
    Installed,
    /// The store is remote; `syncdeps` must be run where the server runs.
    Deferred,
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub container: String,
    /// Registered app path; `None` for updates.
    pub path: Option<String>,
    pub format: ArchiveFormat,
    pub files_written: usize,
    pub dependencies: DependencyAction,
}

struct Pipeline {
    stage: Stage,
}

impl Pipeline {
    fn start() -> Self {
        debug!(stage = %Stage::ResolvingReference, "Install pipeline started");
        Self {
            stage: Stage::ResolvingReference,
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(from = %self.stage, to = %stage, "Install pipeline transition");
        self.stage = stage;
    }
}

/// Run the install or update pipeline against a context.
pub fn run(ctx: &mut AppContext, request: &InstallRequest) -> Result<InstallOutcome> {
    let mut pipeline = Pipeline::start();
    let result = match request {
        InstallRequest::Install {
            reference,
            container,
            path,
        } => install(
            ctx,
            &mut pipeline,
            reference,
            container.as_deref(),
            path.as_deref(),
        ),
        InstallRequest::Update { container } => update(ctx, &mut pipeline, container),
    };

    match &result {
        Ok(_) => pipeline.enter(Stage::Done),
        Err(e) => pipeline.enter(Stage::Failed(e.to_string())),
    }
    result
}

fn install(
    ctx: &mut AppContext,
    pipeline: &mut Pipeline,
    reference: &str,
    container: Option<&str>,
    path: Option<&str>,
) -> Result<InstallOutcome> {
    let resolved = ctx.resolver.resolve(reference)?;

    pipeline.enter(Stage::Classifying);
    let app = archive::classify(&resolved.bytes)?;

    pipeline.enter(Stage::CheckingConflict);
    let container = match container {
        Some(c) => c.to_string(),
        None => app
            .manifest
            .name()
            .map(str::to_string)
            .ok_or(ManifestError::MissingName)?,
    };
    let path = path.map(str::to_string).unwrap_or_else(|| container.clone());
    if ctx.registry.is_installed(&path) {
        return Err(ConflictError::PathInstalled(path).into());
    }
    if ctx.store.container_exists(&container)? {
        return Err(ConflictError::ContainerExists(container).into());
    }

    pipeline.enter(Stage::CreatingContainer);
    ctx.store.create_container(&container)?;

    pipeline.enter(Stage::PopulatingContainer);
    let handle = ContainerHandle::new(ctx.store.as_ref(), &container);
    let (files_written, manifest) =
        populate(&handle, &app, resolved.source_url.as_deref(), &ExtractAll)?;
    info!(container = %container, files = files_written, "Populated app container");

    pipeline.enter(Stage::UpdatingRegistry);
    ctx.registry.add(&path, &container)?;
    ctx.save_registry()?;

    pipeline.enter(Stage::SyncingDependencies);
    let dependencies = sync_dependencies(ctx, &container, &manifest)?;

    Ok(InstallOutcome {
        container,
        path: Some(path),
        format: app.format,
        files_written,
        dependencies,
    })
}

fn update(ctx: &mut AppContext, pipeline: &mut Pipeline, container: &str) -> Result<InstallOutcome> {
    if !ctx.store.container_exists(container)? {
        return Err(SynchroError::ContainerNotFound(container.to_string()));
    }
    let stored = ctx.store.get_manifest(container)?;
    let url = stored
        .archive_url()
        .ok_or_else(|| SynchroError::NotUpdatable {
            container: container.to_string(),
        })?
        .to_string();
    let resolved = ctx.resolver.resolve(&url)?;

    pipeline.enter(Stage::Classifying);
    let app = archive::classify(&resolved.bytes)?;

    pipeline.enter(Stage::CheckingConflict);
    debug!(container, "Replacing existing container");

    pipeline.enter(Stage::CreatingContainer);
    ctx.store.delete_container(container)?;
    ctx.store.create_container(container)?;

    pipeline.enter(Stage::PopulatingContainer);
    let handle = ContainerHandle::new(ctx.store.as_ref(), container);
    let source_url = resolved.source_url.as_deref().or(Some(url.as_str()));
    let (files_written, manifest) = populate(&handle, &app, source_url, &ExtractAll)?;
    info!(container, files = files_written, "Repopulated app container");

    pipeline.enter(Stage::SyncingDependencies);
    let dependencies = sync_dependencies(ctx, container, &manifest)?;

    Ok(InstallOutcome {
        container: container.to_string(),
        path: None,
        format: app.format,
        files_written,
        dependencies,
    })
}

/// Write every archive entry into the container, recording the source URL in
/// `package.json` when the archive was downloaded.
///
/// Returns the number of entries written and the manifest as stored.
fn populate(
    handle: &ContainerHandle<'_>,
    app: &AppArchive,
    source_url: Option<&str>,
    policy: &dyn ExtractionPolicy,
) -> Result<(usize, Manifest)> {
    let mut written = 0;
    for entry in &app.entries {
        if policy.should_skip(&entry.path) {
            continue;
        }
        handle.put_file(&entry.path, &entry.content)?;
        written += 1;
    }

    let mut manifest = app.manifest.clone();
    if let Some(url) = source_url {
        if manifest.archive_url() != Some(url) {
            debug!(url, "Recording archive URL in app manifest");
            manifest.set_archive_url(url);
            handle.put_file(MANIFEST_FILE, &manifest.to_pretty_json()?)?;
        }
    }
    Ok((written, manifest))
}

/// Install dependencies locally, or defer them when the store is remote.
pub fn sync_dependencies(
    ctx: &AppContext,
    container: &str,
    manifest: &Manifest,
) -> Result<DependencyAction> {
    if !manifest.has_dependencies() {
        return Ok(DependencyAction::NotNeeded);
    }
    if !ctx.store.is_local() {
        return Ok(DependencyAction::Deferred);
    }
    let installed = ctx.deps.sync(manifest, &ctx.dependency_dir(container))?;
    Ok(if installed {
        DependencyAction::Installed
    } else {
        DependencyAction::NotNeeded
    })
}
