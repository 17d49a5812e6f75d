//! Local cache store: mirrored content plus sidecar ETags.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Name of the directory npm uses for tarballs inside a package directory.
pub const TARBALL_DIR: &str = "-";

/// File holding a package or version document inside its directory.
pub const INDEX_FILE: &str = "index.json";

/// Reads and writes the on-disk mirror.
///
/// Every content file may carry a sidecar holding the ETag the upstream
/// server returned for it. Content and sidecar are always written together.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a mirror-relative path against the root.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for empty paths or paths containing anything
    /// other than plain components, so upstream data cannot escape the root.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let trimmed = rel.trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidPath(rel.to_string()));
        }
        let candidate = Path::new(trimmed);
        if !candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidPath(rel.to_string()));
        }
        Ok(self.root.join(candidate))
    }

    /// Path of the document stored for `rel` (a package, a version or the index).
    pub fn document_path(&self, rel: &str) -> Result<PathBuf> {
        Ok(self.resolve(rel)?.join(INDEX_FILE))
    }

    /// Derives the sidecar ETag path for a content path.
    ///
    /// Directories keep their ETag in `<dir>/.etag`; files in
    /// `<dirname>/.<basename>.etag`.
    pub fn sidecar_path(path: &Path) -> PathBuf {
        if path.is_dir() {
            return path.join(".etag");
        }
        let basename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sidecar = format!(".{}.etag", basename);
        match path.parent() {
            Some(parent) => parent.join(sidecar),
            None => PathBuf::from(sidecar),
        }
    }

    /// Returns the stored ETag for `path`, if a readable sidecar exists.
    pub fn etag_of(&self, path: &Path) -> Option<String> {
        let content = fs::read_to_string(Self::sidecar_path(path)).ok()?;
        let etag = content.lines().next()?.trim();
        if etag.is_empty() {
            None
        } else {
            Some(etag.to_string())
        }
    }

    /// Returns the modification time of `path` formatted as an HTTP date.
    pub fn last_modified_of(&self, path: &Path) -> Option<String> {
        let modified = fs::metadata(path).ok()?.modified().ok()?;
        Some(format_http_date(modified))
    }

    /// Reads stored content, returning `None` if nothing is stored at `path`.
    pub fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Writes content and its ETag.
    ///
    /// Parent directories are created as needed. The sidecar is written only
    /// for a non-empty ETag; a stale sidecar is removed otherwise. When
    /// `last_modified` parses as an HTTP date it becomes the file's mtime.
    ///
    /// # Errors
    ///
    /// Returns an error if any filesystem operation fails.
    pub fn write(
        &self,
        path: &Path,
        bytes: &[u8],
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mtime = last_modified.and_then(parse_http_date);
        write_atomic(path, bytes, mtime)?;

        let sidecar = Self::sidecar_path(path);
        match etag.map(str::trim).filter(|etag| !etag.is_empty()) {
            Some(etag) => write_atomic(&sidecar, etag.as_bytes(), None)?,
            None => match fs::remove_file(&sidecar) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            },
        }

        Ok(())
    }

    /// Lists the version directories stored under a package directory.
    ///
    /// The tarball directory and hidden entries are not versions.
    pub fn local_versions(&self, package_dir: &Path) -> Result<BTreeSet<String>> {
        let entries = match fs::read_dir(package_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut versions = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == TARBALL_DIR || name.starts_with('.') {
                continue;
            }
            versions.insert(name);
        }
        Ok(versions)
    }

    /// Deletes a stored directory and everything below it.
    pub fn remove_dir(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Writes through a hidden sibling temp file and renames it into place.
fn write_atomic(path: &Path, bytes: &[u8], mtime: Option<SystemTime>) -> Result<()> {
    let basename = path
        .file_name()
        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?
        .to_string_lossy()
        .into_owned();
    let temp_path = path.with_file_name(format!(".{}.tmp", basename));

    fs::write(&temp_path, bytes)?;
    if let Some(mtime) = mtime {
        fs::File::options()
            .write(true)
            .open(&temp_path)?
            .set_modified(mtime)?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::Io(e)
    })
}

pub(crate) fn parse_http_date(value: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(SystemTime::from)
}

pub(crate) fn format_http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
