//! Turns an app reference (local path or URL) into archive bytes.

use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use reqwest::blocking::Client;
use std::io::{IsTerminal, Read};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use crate::error::{FetchError, Result};

/// Timeout applied to every archive download.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

static REMOTE_REFERENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://").ok());

/// Whether a reference names a remote archive.
pub fn is_remote_reference(reference: &str) -> bool {
    match REMOTE_REFERENCE.as_ref() {
        Some(re) => re.is_match(reference),
        None => reference.starts_with("http://") || reference.starts_with("https://"),
    }
}

/// Archive bytes plus where they came from.
#[derive(Debug, Clone)]
pub struct ResolvedReference {
    pub bytes: Vec<u8>,
    /// Set when the archive was downloaded.
    pub source_url: Option<String>,
}

/// Fetches archives from disk or over HTTP.
#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    client: Client,
    show_progress: bool,
}

impl ReferenceResolver {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|source| FetchError::Request {
                url: String::new(),
                source,
            })?;
        Ok(Self {
            client,
            show_progress: true,
        })
    }

    /// A resolver that shows download progress only when stderr is a
    /// terminal.
    pub fn interactive() -> Result<Self> {
        let resolver = Self::new()?;
        Ok(if std::io::stderr().is_terminal() {
            resolver
        } else {
            resolver.quiet()
        })
    }

    /// Disable the download progress bar.
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn resolve(&self, reference: &str) -> Result<ResolvedReference> {
        if is_remote_reference(reference) {
            let bytes = self.fetch(reference)?;
            Ok(ResolvedReference {
                bytes,
                source_url: Some(reference.to_string()),
            })
        } else {
            let bytes = read_local(Path::new(reference))?;
            Ok(ResolvedReference {
                bytes,
                source_url: None,
            })
        }
    }

    /// Download a URL into memory.
    pub fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "Fetching archive");
        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };

        let mut response = self.client.get(url).send().map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let total_size = response.content_length().unwrap_or(0);
        let pb = if self.show_progress && total_size > 0 {
            let bar = ProgressBar::new(total_size);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{bar:40.cyan/blue} {bytes}/{total_bytes} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
            );
            Some(bar)
        } else {
            None
        };

        let mut bytes = Vec::with_capacity(usize::try_from(total_size).unwrap_or(0));
        let mut chunk = [0u8; 64 * 1024];
        loop {
            let read = response.read(&mut chunk).map_err(|e| FetchError::Body {
                url: url.to_string(),
                source: e,
            })?;
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..read]);
            if let Some(ref bar) = pb {
                bar.inc(read as u64);
            }
        }

        if let Some(ref bar) = pb {
            bar.finish_with_message("Downloaded");
        }
        debug!(url, bytes = bytes.len(), "Fetched archive");
        Ok(bytes)
    }
}

fn read_local(path: &Path) -> Result<Vec<u8>> {
    debug!(path = %path.display(), "Reading archive");
    std::fs::read(path).map_err(|source| {
        FetchError::File {
            path: path.display().to_string(),
            source,
        }
        .into()
    })
}
