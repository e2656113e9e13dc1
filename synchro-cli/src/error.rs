//! Error types for Synchro app management.
//!
//! Every command fails with a [`SynchroError`]. The grouped sub-enums mirror
//! the stage that failed: resolving the reference ([`FetchError`]),
//! recognizing the archive ([`FormatError`], [`ManifestError`]) or
//! reconciling with what is already installed ([`ConflictError`]).

use thiserror::Error;

use crate::config::ConfigError;
use crate::settings::SettingsError;
use crate::store::StoreError;

/// Errors that can occur while managing Synchro apps.
#[derive(Debug, Error)]
pub enum SynchroError {
    /// Empty or malformed user-supplied name, path or option.
    #[error("{0}")]
    Input(String),

    /// The app path or container is already taken.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The app reference could not be read or downloaded.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The bytes are not a recognized archive container.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The archive has no usable Synchro app descriptor.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Update requested for a container without a recorded archive URL.
    #[error(
        "Synchro app container '{container}' was not installed from a remote URL (it does not have a synchroArchiveUrl element), so it cannot be updated"
    )]
    NotUpdatable { container: String },

    /// The package manager exited unsuccessfully.
    #[error("npm install failed with {}", exit_description(.code))]
    DependencyInstall { code: Option<i32>, stderr: String },

    /// No app is installed at the given path.
    #[error("Synchro app named '{0}' not currently installed in the active configuration")]
    NotInstalled(String),

    /// The container does not exist in the module store.
    #[error("Synchro app container '{0}' does not exist in the active module store")]
    ContainerNotFound(String),

    /// The authentication host rejected the request.
    #[error("{message}")]
    Auth { status: Option<u16>, message: String },

    /// No Synchro server has been installed in the working directory.
    #[error("Synchro has not yet been initialized in this directory")]
    NotInitialized,

    /// A Synchro server is already installed in the working directory.
    #[error(
        "Synchro has already been initialized in this directory, use 'synchro update' to update the Synchro instance here"
    )]
    AlreadyInitialized,

    /// An interactive prompt failed or was cancelled.
    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// An app path or container that already exists.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("Synchro app already installed at path '{0}' in the active configuration")]
    PathInstalled(String),

    #[error("Synchro app container '{0}' already exists in the active module store")]
    ContainerExists(String),
}

/// Failure to obtain the raw bytes behind an app reference.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("Status {status}, url: {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The request could not be completed (DNS, connect, timeout, ...).
    #[error("Failed to download {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response body was cut off or unreadable.
    #[error("Failed to read response from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// A local file could not be read.
    #[error("Failed to read {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// HTTP status code, when the failure came from a server response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request { source, .. } => source.status().map(|s| s.as_u16()),
            Self::Body { .. } | Self::File { .. } => None,
        }
    }
}

/// The bytes are neither a zip nor a gzip-compressed tarball.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("File was not a compressed archive")]
    NotCompressed,

    #[error("File did not contain a package archive")]
    NotPackageArchive,

    #[error("Corrupt {format} archive: {reason}")]
    Corrupt {
        format: &'static str,
        reason: String,
    },
}

/// The archive is well-formed but is not a Synchro app.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Archive did not contain a Synchro app (no package.json found)")]
    Missing,

    #[error("Unable to parse package.json found in archive: {0}")]
    Invalid(#[source] serde_json::Error),

    #[error("Archive did not contain a Synchro app (package.json didn't specify Synchro)")]
    NotSynchroApp,

    #[error("package.json has no name, specify an app container on the command line")]
    MissingName,
}

/// Result type for Synchro operations.
pub type Result<T, E = SynchroError> = std::result::Result<T, E>;

impl SynchroError {
    /// Whether this error is a path or container conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SynchroError::from(ConflictError::PathInstalled("foo".to_string()));
        assert_eq!(
            err.to_string(),
            "Synchro app already installed at path 'foo' in the active configuration"
        );
        assert!(err.is_conflict());

        let err = SynchroError::NotUpdatable {
            container: "bar".to_string(),
        };
        assert!(err.to_string().contains("'bar'"));
        assert!(!err.is_conflict());

        let err = SynchroError::from(FormatError::NotCompressed);
        assert_eq!(err.to_string(), "File was not a compressed archive");
    }

    #[test]
    fn test_dependency_install_display() {
        let err = SynchroError::DependencyInstall {
            code: Some(254),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "npm install failed with exit code 254");

        let err = SynchroError::DependencyInstall {
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("signal"));
    }

    #[test]
    fn test_fetch_status() {
        let err = FetchError::Status {
            url: "https://example.com/app.tgz".to_string(),
            status: 404,
            body: "Not Found".to_string(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(
            err.to_string(),
            "Status 404, url: https://example.com/app.tgz: Not Found"
        );

        let err = FetchError::File {
            path: "app.tgz".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SynchroError = io_err.into();
        assert!(matches!(err, SynchroError::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        if let Err(json_err) = serde_json::from_str::<serde_json::Value>("invalid json {{{") {
            let err: SynchroError = ManifestError::Invalid(json_err).into();
            assert!(matches!(err, SynchroError::Manifest(ManifestError::Invalid(_))));
        } else {
            panic!("Should fail to parse invalid JSON");
        }
    }
}
