//! Installing and updating the Synchro server in a working directory, and
//! obtaining the download token it requires.

use reqwest::Url;
use reqwest::blocking::Client;
use semver::{Version, VersionReq};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::archive::{self, ArchiveFormat};
use crate::config::ConfigStore;
use crate::deps::DependencySynchronizer;
use crate::error::{FetchError, FormatError, Result, SynchroError};
use crate::manifest::Manifest;
use crate::resolver::ReferenceResolver;
use crate::settings::{DEFAULT_HOST, Settings};
use crate::store::MANIFEST_FILE;

const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Oldest server release this client can install.
const MIN_SERVER_VERSION: Version = Version::new(1, 3, 0);

/// Files in the server package that carry `[host]` and `[token]` placeholders.
const PLACEHOLDER_FILES: [&str; 2] = [MANIFEST_FILE, "npm-shrinkwrap.json"];

/// Debug ports at or below this are reserved.
const MIN_DEBUG_BASE_PORT: u16 = 1024;

/// Whether a Synchro server is installed in `base_dir`.
pub fn is_initialized(base_dir: &Path) -> bool {
    base_dir.join("node_modules").join("synchro-api").is_dir()
}

/// Host and download token for the distribution server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub token: String,
}

/// Pick the host and token: explicit values first, then saved settings.
/// Without a token anywhere, `authenticate` is asked for one.
pub fn resolve_credentials<F>(
    host: Option<&str>,
    token: Option<&str>,
    settings: &Settings,
    authenticate: F,
) -> Result<Credentials>
where
    F: FnOnce(&str) -> Result<String>,
{
    let host = host
        .or(settings.host.as_deref())
        .unwrap_or(DEFAULT_HOST)
        .to_string();
    let token = match token.or(settings.access_token.as_deref()) {
        Some(token) => token.to_string(),
        None => authenticate(&host)?,
    };
    Ok(Credentials { host, token })
}

/// Download URL of a server package.
pub fn server_archive_url(host: &str, token: &str, version: Option<&str>) -> Result<String> {
    let mut url = format!("http://{host}/dist/{token}/synchro-server");
    if let Some(version) = version {
        let parsed = Version::parse(version).map_err(|e| {
            SynchroError::Input(format!("Invalid Synchro server version '{version}': {e}"))
        })?;
        if parsed < MIN_SERVER_VERSION {
            return Err(SynchroError::Input(format!(
                "Cannot install Synchro server version prior to {MIN_SERVER_VERSION}, specified version was: {version}"
            )));
        }
        url.push('-');
        url.push_str(version);
    }
    url.push_str(".tgz");
    Ok(url)
}

/// Replace every `[host]` and `[token]` placeholder.
pub fn substitute_placeholders(text: &str, credentials: &Credentials) -> String {
    text.replace("[host]", &credentials.host)
        .replace("[token]", &credentials.token)
}

/// Options that `init` writes into the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitOptions {
    pub port: Option<u16>,
    pub debug_base_port: Option<u16>,
    pub no_studio: bool,
}

impl InitOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(port) = self.debug_base_port {
            if port <= MIN_DEBUG_BASE_PORT {
                return Err(SynchroError::Input(format!(
                    "Debug base port must be greater than {MIN_DEBUG_BASE_PORT}, was: {port}"
                )));
            }
        }
        Ok(())
    }

    pub fn apply(&self, config: &mut ConfigStore) {
        if let Some(port) = self.port {
            config.set("PORT", json!(port));
        }
        if let Some(port) = self.debug_base_port {
            config.set("DEBUG_BASE_PORT", json!(port));
        }
        if self.no_studio {
            config.set("NOSTUDIO", json!(true));
        }
    }
}

/// Outcome of comparing the local node version with the server's
/// `engines.node` requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeVersionCheck {
    /// The server declares no requirement.
    NoRequirement,
    Satisfied,
    Unsatisfied { installed: String, required: String },
    /// `node -v` failed or either version could not be interpreted.
    Unknown { required: String },
}

/// Compare an installed node version (`v18.2.0` or `18.2.0`) with a
/// requirement.
pub fn check_node_version(required: Option<&str>, installed: Option<&str>) -> NodeVersionCheck {
    let Some(required) = required else {
        return NodeVersionCheck::NoRequirement;
    };
    let unknown = || NodeVersionCheck::Unknown {
        required: required.to_string(),
    };
    let Some(installed) = installed else {
        return unknown();
    };
    let installed = installed.trim();
    let version = installed.strip_prefix('v').unwrap_or(installed);
    match (Version::parse(version), VersionReq::parse(required)) {
        (Ok(version), Ok(req)) if req.matches(&version) => NodeVersionCheck::Satisfied,
        (Ok(_), Ok(_)) => NodeVersionCheck::Unsatisfied {
            installed: version.to_string(),
            required: required.to_string(),
        },
        _ => unknown(),
    }
}

/// Output of `node -v`, if node can be run.
pub fn installed_node_version() -> Option<String> {
    let output = Command::new("node").arg("-v").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!version.is_empty()).then_some(version)
}

/// Downloads, extracts and prepares the server in a working directory.
pub struct ServerSetup<'a> {
    pub base_dir: &'a Path,
    pub resolver: &'a ReferenceResolver,
    pub deps: &'a DependencySynchronizer,
}

impl ServerSetup<'_> {
    /// Install the server into an uninitialized directory and configure it.
    pub fn init(
        &self,
        config_path: Option<&Path>,
        credentials: &Credentials,
        version: Option<&str>,
        options: &InitOptions,
    ) -> Result<NodeVersionCheck> {
        options.validate()?;
        if is_initialized(self.base_dir) {
            return Err(SynchroError::AlreadyInitialized);
        }

        let node_requirement = self.download_and_install(credentials, version)?;
        let mut config = ConfigStore::open(self.base_dir, config_path)?;
        self.install_app_root_dependencies(&config)?;
        let check = check_node_version(
            node_requirement.as_deref(),
            installed_node_version().as_deref(),
        );

        options.apply(&mut config);
        config.save()?;
        Ok(check)
    }

    /// Re-download the server over an existing installation.
    pub fn update(
        &self,
        config_path: Option<&Path>,
        credentials: &Credentials,
        version: Option<&str>,
    ) -> Result<NodeVersionCheck> {
        if !is_initialized(self.base_dir) {
            return Err(SynchroError::NotInitialized);
        }

        let config = ConfigStore::open(self.base_dir, config_path)?;
        let node_requirement = self.download_and_install(credentials, version)?;
        self.install_app_root_dependencies(&config)?;
        Ok(check_node_version(
            node_requirement.as_deref(),
            installed_node_version().as_deref(),
        ))
    }

    fn download_and_install(
        &self,
        credentials: &Credentials,
        version: Option<&str>,
    ) -> Result<Option<String>> {
        let url = server_archive_url(&credentials.host, &credentials.token, version)?;
        println!("Downloading server from: {url}");
        let bytes = self.resolver.fetch(&url)?;
        self.install_archive(&bytes, credentials)
    }

    /// Extract a server package into the working directory and install its
    /// dependencies. Returns the server's `engines.node` requirement.
    pub fn install_archive(&self, bytes: &[u8], credentials: &Credentials) -> Result<Option<String>> {
        if !archive::is_gzip(bytes) {
            return Err(FormatError::NotCompressed.into());
        }
        let extracted = archive::extract(bytes)?;
        if extracted.format != ArchiveFormat::Tarball {
            return Err(FormatError::NotPackageArchive.into());
        }

        let base_dir = self.base_dir;
        let keep_config = |path: &str| {
            path == crate::config::CONFIG_FILE_NAME && base_dir.join(path).is_file()
        };
        let written = archive::extract_to_dir(&extracted.entries, base_dir, &keep_config)?;
        info!(files = written, dir = %base_dir.display(), "Extracted server package");
        println!("Extracted files");

        let mut node_requirement = None;
        for file in PLACEHOLDER_FILES {
            let path = base_dir.join(file);
            if !path.is_file() {
                debug!(file, "Server package has no such file, skipping substitution");
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            if file == MANIFEST_FILE {
                let manifest = Manifest::from_slice(text.as_bytes())?;
                node_requirement = manifest
                    .engine("node")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
            }
            std::fs::write(&path, substitute_placeholders(&text, credentials))?;
        }

        println!("npm install of Synchro dependencies starting...");
        self.deps.install_in(base_dir)?;
        println!("npm install of Synchro dependencies completed");
        Ok(node_requirement)
    }

    fn install_app_root_dependencies(&self, config: &ConfigStore) -> Result<()> {
        let app_root: PathBuf = config.app_root_path();
        std::fs::create_dir_all(&app_root)?;
        println!("npm install of Synchro app dependencies starting...");
        self.deps.install_in(&app_root)?;
        println!("npm install of Synchro app dependencies completed");
        Ok(())
    }
}

/// Report a node version mismatch to the operator.
pub fn report_node_version(check: &NodeVersionCheck) {
    match check {
        NodeVersionCheck::Unsatisfied {
            installed,
            required,
        } => {
            warn!(installed = %installed, required = %required, "Node version mismatch");
            eprintln!(
                "WARNING: Installed Node version '{installed}' does not meet installed Synchro requirement of '{required}'"
            );
        }
        NodeVersionCheck::Unknown { required } => {
            eprintln!(
                "WARNING: Node version could not be determined. Installed Synchro requires: {required}"
            );
        }
        NodeVersionCheck::NoRequirement | NodeVersionCheck::Satisfied => {}
    }
}

#[derive(Debug, Deserialize)]
struct SecretResponse {
    secret: Option<String>,
}

/// URL of the token endpoint, with the account credentials as query
/// parameters.
pub fn auth_url(host: &str, email: &str, password: &str) -> Result<Url> {
    let base = if crate::resolver::is_remote_reference(host) {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    let mut url = Url::parse(&base)
        .and_then(|u| u.join("getsecret"))
        .map_err(|e| SynchroError::Input(format!("Invalid server '{host}': {e}")))?;
    url.query_pairs_mut()
        .append_pair("email", email)
        .append_pair("password", password);
    Ok(url)
}

/// Interpret the token endpoint's answer.
pub fn parse_auth_response(status: u16, body: &str) -> Result<String> {
    match status {
        401 | 403 => Err(SynchroError::Auth {
            status: Some(status),
            message: body.trim().to_string(),
        }),
        200..=299 => serde_json::from_str::<SecretResponse>(body)
            .ok()
            .and_then(|r| r.secret)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SynchroError::Auth {
                status: Some(status),
                message: "Response from server was malformed (didn't contain token)".to_string(),
            }),
        _ => Err(SynchroError::Auth {
            status: Some(status),
            message: format!("Authentication failed with status {status}: {}", body.trim()),
        }),
    }
}

/// Exchange an account's email and password for a download token.
pub fn authenticate(host: &str, email: &str, password: &str) -> Result<String> {
    let url = auth_url(host, email, password)?;
    let client = Client::builder()
        .timeout(AUTH_TIMEOUT)
        .build()
        .map_err(|source| FetchError::Request {
            url: host.to_string(),
            source,
        })?;

    debug!(host, "Requesting download token");
    let response = client.get(url).send().map_err(|e| SynchroError::Auth {
        status: None,
        message: format!("Unable to reach server {host}: {}", e.without_url()),
    })?;
    let status = response.status().as_u16();
    let body = response.text().map_err(|e| SynchroError::Auth {
        status: Some(status),
        message: format!("Unable to read response from {host}: {}", e.without_url()),
    })?;
    parse_auth_response(status, &body)
}
