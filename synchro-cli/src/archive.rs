//! Archive format detection and in-memory extraction.
//!
//! Synchro apps are distributed as `npm pack` tarballs (gzip-compressed tar
//! with everything under `package/`) or as zip files, possibly with a single
//! wrapper directory. The format is detected from the content, never from a
//! file extension.

use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;

use crate::error::{FormatError, ManifestError, Result};
use crate::manifest::Manifest;
use crate::store::{MANIFEST_FILE, normalize_file_path};

const ZIP_SIGNATURES: [&[u8]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_MAGIC: &[u8] = b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;

/// Container format of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tarball,
}

impl ArchiveFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zip => "pkzip",
            Self::Tarball => "tarball",
        }
    }
}

/// One extracted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path relative to the package root, `/`-separated.
    pub path: String,
    pub content: Vec<u8>,
}

/// Files extracted from an archive, wrapper directory already stripped.
#[derive(Debug, Clone)]
pub struct ExtractedArchive {
    pub format: ArchiveFormat,
    pub entries: Vec<ArchiveEntry>,
}

impl ExtractedArchive {
    pub fn entry(&self, path: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

/// An archive recognized as a Synchro app.
#[derive(Debug, Clone)]
pub struct AppArchive {
    pub format: ArchiveFormat,
    pub manifest: Manifest,
    pub entries: Vec<ArchiveEntry>,
}

/// Decides, per entry, whether extraction should leave a file alone.
pub trait ExtractionPolicy {
    fn should_skip(&self, path: &str) -> bool;
}

/// Policy that extracts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractAll;

impl ExtractionPolicy for ExtractAll {
    fn should_skip(&self, _path: &str) -> bool {
        false
    }
}

impl<F: Fn(&str) -> bool> ExtractionPolicy for F {
    fn should_skip(&self, path: &str) -> bool {
        self(path)
    }
}

/// Write entries below `dest`, leaving alone whatever the policy skips.
///
/// Returns the number of files written.
pub fn extract_to_dir(
    entries: &[ArchiveEntry],
    dest: &Path,
    policy: &dyn ExtractionPolicy,
) -> std::io::Result<usize> {
    let mut written = 0;
    for entry in entries {
        if policy.should_skip(&entry.path) {
            debug!(path = %entry.path, "Keeping existing file");
            continue;
        }
        let target = dest.join(&entry.path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, &entry.content)?;
        written += 1;
    }
    Ok(written)
}

pub fn is_zip(bytes: &[u8]) -> bool {
    ZIP_SIGNATURES.iter().any(|sig| bytes.starts_with(sig))
}

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

pub fn is_tar(bytes: &[u8]) -> bool {
    bytes
        .get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len())
        .is_some_and(|magic| magic == TAR_MAGIC)
}

/// Detect the format and extract every file entry.
pub fn extract(bytes: &[u8]) -> Result<ExtractedArchive> {
    if is_zip(bytes) {
        debug!("Processing archive (pkzip)");
        let entries = read_zip(bytes)?;
        return Ok(ExtractedArchive {
            format: ArchiveFormat::Zip,
            entries,
        });
    }

    if is_gzip(bytes) {
        debug!("Processing archive (tarball)");
        let mut unzipped = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut unzipped)
            .map_err(|_| FormatError::NotPackageArchive)?;
        if !is_tar(&unzipped) {
            return Err(FormatError::NotPackageArchive.into());
        }
        let entries = read_tar(&unzipped)?;
        return Ok(ExtractedArchive {
            format: ArchiveFormat::Tarball,
            entries,
        });
    }

    Err(FormatError::NotCompressed.into())
}

/// Extract an archive and validate that it is a Synchro app.
pub fn classify(bytes: &[u8]) -> Result<AppArchive> {
    let extracted = extract(bytes)?;
    let manifest_entry = extracted
        .entry(MANIFEST_FILE)
        .ok_or(ManifestError::Missing)?;
    let manifest = Manifest::from_slice(&manifest_entry.content).map_err(ManifestError::Invalid)?;
    if !manifest.is_synchro_app() {
        return Err(ManifestError::NotSynchroApp.into());
    }

    debug!(
        format = extracted.format.as_str(),
        entries = extracted.entries.len(),
        name = manifest.name().unwrap_or("<unnamed>"),
        "Classified Synchro app archive"
    );

    Ok(AppArchive {
        format: extracted.format,
        manifest,
        entries: extracted.entries,
    })
}

fn read_zip(bytes: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let corrupt = |e: zip::result::ZipError| FormatError::Corrupt {
        format: "zip",
        reason: e.to_string(),
    };
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).map_err(corrupt)?;

    let mut raw = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let mut file = zip.by_index(index).map_err(corrupt)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut content = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
        file.read_to_end(&mut content).map_err(|e| FormatError::Corrupt {
            format: "zip",
            reason: format!("{name}: {e}"),
        })?;
        raw.push((name, content));
    }

    Ok(strip_wrapper(raw, None))
}

fn read_tar(bytes: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let corrupt = |e: std::io::Error| FormatError::Corrupt {
        format: "tar",
        reason: e.to_string(),
    };
    let mut archive = tar::Archive::new(Cursor::new(bytes));

    let mut raw = Vec::new();
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path().map_err(corrupt)?.to_string_lossy().into_owned();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).map_err(corrupt)?;
        raw.push((name, content));
    }

    Ok(strip_wrapper(raw, Some("package")))
}

/// Strip the single top-level directory shared by every entry.
///
/// When the entries do not share one and `preferred_root` is given, only
/// entries under that root are kept. Entries whose path would escape the
/// package root are dropped.
fn strip_wrapper(raw: Vec<(String, Vec<u8>)>, preferred_root: Option<&str>) -> Vec<ArchiveEntry> {
    let normalized: Vec<(String, Vec<u8>)> = raw
        .into_iter()
        .filter_map(|(name, content)| match normalize_file_path(&name) {
            Ok(path) => Some((path, content)),
            Err(_) => {
                debug!(entry = %name, "Skipping entry outside the package root");
                None
            }
        })
        .collect();

    let prefix = common_root(normalized.iter().map(|(path, _)| path.as_str()))
        .or_else(|| preferred_root.map(str::to_string));

    normalized
        .into_iter()
        .filter_map(|(path, content)| {
            let stripped = match &prefix {
                Some(root) => path.strip_prefix(root)?.strip_prefix('/')?.to_string(),
                None => path,
            };
            if stripped.is_empty() {
                return None;
            }
            Some(ArchiveEntry {
                path: stripped,
                content,
            })
        })
        .collect()
}

/// First path segment shared by every path, when each path has more than one
/// segment.
fn common_root<'a>(mut paths: impl Iterator<Item = &'a str>) -> Option<String> {
    let first = paths.next()?;
    let (root, _) = first.split_once('/')?;
    let shared = paths.all(|p| p.split_once('/').is_some_and(|(r, _)| r == root));
    shared.then(|| root.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory archive builders shared by tests across the crate.

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    pub fn tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            if let Err(e) = builder.append_data(&mut header, path, *content) {
                panic!("Failed to append {path}: {e}");
            }
        }
        match builder.into_inner().and_then(|encoder| encoder.finish()) {
            Ok(bytes) => bytes,
            Err(e) => panic!("Failed to finish tarball: {e}"),
        }
    }

    pub fn zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (path, content) in files {
            if let Err(e) = writer.start_file(*path, options) {
                panic!("Failed to start {path}: {e}");
            }
            if let Err(e) = writer.write_all(content) {
                panic!("Failed to write {path}: {e}");
            }
        }
        match writer.finish() {
            Ok(cursor) => cursor.into_inner(),
            Err(e) => panic!("Failed to finish zip: {e}"),
        }
    }

    pub const SYNCHRO_PACKAGE_JSON: &[u8] = br#"{ "name": "foo", "engines": { "synchro": "*" } }"#;
}

#[cfg(test)]
mod tests {
    use super::test_support::{SYNCHRO_PACKAGE_JSON, tarball, zip};
    use super::*;
    use crate::error::SynchroError;

    fn paths(entries: &[ArchiveEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_tarball_is_detected_and_stripped() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = tarball(&[
            ("package/package.json", SYNCHRO_PACKAGE_JSON),
            ("package/main.js", b"exports.View = {};"),
            ("package/views/detail.js", b"// detail"),
        ]);

        assert!(is_gzip(&bytes));
        assert!(!is_zip(&bytes));

        let app = classify(&bytes)?;
        assert_eq!(app.format, ArchiveFormat::Tarball);
        assert_eq!(app.manifest.name(), Some("foo"));
        assert_eq!(
            paths(&app.entries),
            vec!["package.json", "main.js", "views/detail.js"]
        );
        Ok(())
    }

    #[test]
    fn test_zip_prefix_stripping() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = zip(&[
            ("pkg/a.txt", b"a"),
            ("pkg/sub/b.txt", b"b"),
        ]);

        assert!(is_zip(&bytes));
        assert!(!is_gzip(&bytes));

        let extracted = extract(&bytes)?;
        assert_eq!(extracted.format, ArchiveFormat::Zip);
        assert_eq!(paths(&extracted.entries), vec!["a.txt", "sub/b.txt"]);
        Ok(())
    }

    #[test]
    fn test_zip_without_wrapper_keeps_paths() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = zip(&[
            ("package.json", SYNCHRO_PACKAGE_JSON),
            ("views/main.js", b"x"),
        ]);

        let app = classify(&bytes)?;
        assert_eq!(paths(&app.entries), vec!["package.json", "views/main.js"]);
        Ok(())
    }

    #[test]
    fn test_root_manifest_wins_over_nested_copies() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = zip(&[
            ("app/package.json", SYNCHRO_PACKAGE_JSON),
            ("app/node_modules/dep/package.json", br#"{ "name": "dep" }"#),
        ]);

        let app = classify(&bytes)?;
        assert_eq!(app.manifest.name(), Some("foo"));
        assert_eq!(app.entries.len(), 2);
        Ok(())
    }

    #[test]
    fn test_tar_entries_outside_package_are_dropped() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = tarball(&[
            ("package/package.json", SYNCHRO_PACKAGE_JSON),
            ("other/readme.txt", b"stray"),
        ]);

        let app = classify(&bytes)?;
        assert_eq!(paths(&app.entries), vec!["package.json"]);
        Ok(())
    }

    #[test]
    fn test_manifest_only_archive_is_valid() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = tarball(&[("package/package.json", SYNCHRO_PACKAGE_JSON)]);
        let app = classify(&bytes)?;
        assert_eq!(app.entries.len(), 1);
        Ok(())
    }

    #[test]
    fn test_not_compressed() {
        let result = classify(b"just some text, definitely not an archive");
        assert!(matches!(
            result,
            Err(SynchroError::Format(FormatError::NotCompressed))
        ));

        assert!(matches!(
            classify(&[]),
            Err(SynchroError::Format(FormatError::NotCompressed))
        ));
    }

    #[test]
    fn test_gzip_without_tar() -> Result<(), Box<dyn std::error::Error>> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"plain text that was gzipped")?;
        let bytes = encoder.finish()?;

        assert!(matches!(
            classify(&bytes),
            Err(SynchroError::Format(FormatError::NotPackageArchive))
        ));
        Ok(())
    }

    #[test]
    fn test_corrupt_zip() {
        let mut bytes = b"PK\x03\x04".to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            classify(&bytes),
            Err(SynchroError::Format(FormatError::Corrupt { format: "zip", .. }))
        ));
    }

    #[test]
    fn test_missing_manifest() {
        let bytes = tarball(&[("package/main.js", b"x")]);
        assert!(matches!(
            classify(&bytes),
            Err(SynchroError::Manifest(ManifestError::Missing))
        ));
    }

    #[test]
    fn test_empty_archive_has_no_manifest() {
        assert!(matches!(
            classify(&zip(&[])),
            Err(SynchroError::Manifest(ManifestError::Missing))
        ));
    }

    #[test]
    fn test_unparseable_manifest() {
        let bytes = zip(&[("package.json", b"{ broken")]);
        assert!(matches!(
            classify(&bytes),
            Err(SynchroError::Manifest(ManifestError::Invalid(_)))
        ));
    }

    #[test]
    fn test_engine_marker_required_even_with_dependencies() {
        let manifest: &[u8] = br#"{ "name": "foo", "dependencies": { "lodash": "*" } }"#;
        for bytes in [
            tarball(&[("package/package.json", manifest)]),
            zip(&[("package.json", manifest)]),
        ] {
            assert!(matches!(
                classify(&bytes),
                Err(SynchroError::Manifest(ManifestError::NotSynchroApp))
            ));
        }
    }

    #[test]
    fn test_extraction_policy_closure() {
        let keep_config = |path: &str| path == "config.json";
        assert!(keep_config.should_skip("config.json"));
        assert!(!keep_config.should_skip("package.json"));
        assert!(!ExtractAll.should_skip("config.json"));
    }

    #[test]
    fn test_extract_to_dir_honors_policy() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::TempDir::new()?;
        std::fs::write(temp_dir.path().join("config.json"), b"{ \"PORT\": 80 }")?;

        let bytes = tarball(&[
            ("package/config.json", b"{}"),
            ("package/lib/server.js", b"// server"),
        ]);
        let extracted = extract(&bytes)?;
        let keep_config = |path: &str| path == "config.json" && temp_dir.path().join(path).exists();
        let written = extract_to_dir(&extracted.entries, temp_dir.path(), &keep_config)?;

        assert_eq!(written, 1);
        assert_eq!(
            std::fs::read(temp_dir.path().join("config.json"))?,
            b"{ \"PORT\": 80 }"
        );
        assert!(temp_dir.path().join("lib/server.js").is_file());
        Ok(())
    }

    #[test]
    fn test_common_root() {
        assert_eq!(
            common_root(["pkg/a.txt", "pkg/sub/b.txt"].into_iter()),
            Some("pkg".to_string())
        );
        assert_eq!(common_root(["pkg/a.txt", "other/b.txt"].into_iter()), None);
        assert_eq!(common_root(["a.txt"].into_iter()), None);
        assert_eq!(common_root(std::iter::empty()), None);
    }
}
