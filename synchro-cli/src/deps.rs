//! Installs the npm dependencies an app declares.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use tracing::{debug, info};

use crate::error::{Result, SynchroError};
use crate::manifest::Manifest;
use crate::store::MANIFEST_FILE;

/// Runs a package manager install in a directory.
pub trait PackageManager {
    /// Install the dependencies listed in `dir/package.json`.
    fn install(&self, dir: &Path) -> Result<()>;
}

/// `npm install`, with stdout passed through and stderr relayed and captured.
#[derive(Debug, Clone)]
pub struct NpmPackageManager {
    program: String,
}

impl Default for NpmPackageManager {
    fn default() -> Self {
        let program = if cfg!(windows) { "npm.cmd" } else { "npm" };
        Self {
            program: program.to_string(),
        }
    }
}

impl NpmPackageManager {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl PackageManager for NpmPackageManager {
    fn install(&self, dir: &Path) -> Result<()> {
        debug!(program = %self.program, dir = %dir.display(), "Running package install");
        let mut child = Command::new(&self.program)
            .arg("install")
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()?;

        let relay = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                let mut captured = String::new();
                let mut out = std::io::stderr();
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    let _ = writeln!(out, "{line}");
                    captured.push_str(&line);
                    captured.push('\n');
                }
                captured
            })
        });

        let status = child.wait()?;
        let stderr = relay
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(SynchroError::DependencyInstall {
                code: status.code(),
                stderr,
            });
        }
        Ok(())
    }
}

/// Materializes an app's dependencies in a local directory.
pub struct DependencySynchronizer {
    package_manager: Box<dyn PackageManager>,
}

impl DependencySynchronizer {
    pub fn new(package_manager: Box<dyn PackageManager>) -> Self {
        Self { package_manager }
    }

    pub fn npm() -> Self {
        Self::new(Box::new(NpmPackageManager::default()))
    }

    /// Run an install in an arbitrary directory that already has a
    /// `package.json`.
    pub fn install_in(&self, dir: &Path) -> Result<()> {
        self.package_manager.install(dir)
    }

    /// Install the dependencies of `manifest` into `local_path`.
    ///
    /// The manifest is written to `local_path/package.json` first. Returns
    /// `false` without touching the filesystem when the app declares no
    /// dependencies.
    pub fn sync(&self, manifest: &Manifest, local_path: &Path) -> Result<bool> {
        if !manifest.has_dependencies() {
            debug!("No dependencies declared, nothing to install");
            return Ok(false);
        }

        std::fs::create_dir_all(local_path)?;
        std::fs::write(local_path.join(MANIFEST_FILE), manifest.to_pretty_json()?)?;

        info!(
            dir = %local_path.display(),
            count = manifest.dependencies().len(),
            "Installing app dependencies"
        );
        self.package_manager.install(local_path)?;
        Ok(true)
    }
}
