//! Package document synchronization, snapshotting and reconciliation.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::fetch::{FetchOutcome, Fetched};
use crate::mirror::Mirror;
use crate::pool::WorkerId;
use crate::rewrite::rewrite_tarballs;
use crate::store::{INDEX_FILE, TARBALL_DIR};

/// Versions listed in a package document's `versions` map.
///
/// A document without the map lists no versions.
pub fn upstream_versions(document: &Value) -> BTreeSet<String> {
    document
        .get("versions")
        .and_then(Value::as_object)
        .map(|versions| versions.keys().cloned().collect())
        .unwrap_or_default()
}

/// Registry path segment for a package name; scoped names keep their
/// slash encoded.
pub fn encode_package_name(name: &str) -> String {
    name.replace('/', "%2f")
}

/// Whether a version key can be used as a single directory name.
pub fn is_safe_version(version: &str) -> bool {
    !version.is_empty()
        && version != TARBALL_DIR
        && !version.starts_with('.')
        && !version.contains(['/', '\\'])
}

impl Mirror {
    pub(crate) fn schedule_package(self: &Arc<Self>, name: String) {
        if let Err(e) = self.store.resolve(&name) {
            warn!(package = %name, error = %e, "skipping package with unusable name");
            self.stats.skipped();
            return;
        }
        self.stats.package_scheduled();
        let mirror = Arc::clone(self);
        self.pool.enqueue(format!("package {}", name), move |worker| {
            mirror.sync_package(worker, &name)
        });
    }

    /// Synchronizes one package document.
    ///
    /// New content is reconciled against the local version directories,
    /// rewritten to point at the mirror, persisted, and snapshotted per
    /// version. Unchanged content is read back from disk so its tarballs
    /// are scheduled again.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid names, unparseable documents, unexpected
    /// statuses or filesystem failures.
    pub fn sync_package(self: &Arc<Self>, worker: WorkerId, name: &str) -> Result<()> {
        let package_dir = self.store.resolve(name)?;
        let path = package_dir.join(INDEX_FILE);
        let url = self.mapper.source_url(&encode_package_name(name));

        match self.fetcher.fetch(worker, &url, Some(&path))? {
            FetchOutcome::Fresh(fetched) => {
                self.stats.fresh();
                self.apply_document(worker, name, &package_dir, fetched)
            }
            FetchOutcome::NotFound(fetched) => {
                self.apply_not_found(worker, name, &package_dir, fetched)
            }
            FetchOutcome::NotModified(_) => {
                self.stats.not_modified();
                match self.store.read(&path)? {
                    Some(bytes) => {
                        let document: Value = serde_json::from_slice(&bytes)?;
                        let rewrite = rewrite_tarballs(&document, &self.mapper);
                        debug!(worker = %worker, package = name, tarballs = rewrite.tarballs.len(), "package unchanged");
                        self.schedule_tarballs(rewrite.tarballs);
                        Ok(())
                    }
                    None => {
                        warn!(worker = %worker, package = name, "stored document missing, refetching");
                        match self.fetcher.fetch(worker, &url, None)? {
                            FetchOutcome::Fresh(fetched) => {
                                self.stats.fresh();
                                self.apply_document(worker, name, &package_dir, fetched)
                            }
                            FetchOutcome::NotFound(fetched) => {
                                self.apply_not_found(worker, name, &package_dir, fetched)
                            }
                            FetchOutcome::NotModified(_) | FetchOutcome::Forbidden => {
                                self.stats.skipped();
                                Ok(())
                            }
                        }
                    }
                }
            }
            FetchOutcome::Forbidden => {
                self.stats.skipped();
                Ok(())
            }
        }
    }

    fn apply_not_found(
        self: &Arc<Self>,
        worker: WorkerId,
        name: &str,
        package_dir: &Path,
        fetched: Fetched,
    ) -> Result<()> {
        if serde_json::from_slice::<Value>(&fetched.body).is_err() {
            warn!(worker = %worker, package = name, "404 body is not a JSON document, skipping");
            self.stats.skipped();
            return Ok(());
        }
        self.stats.unpublished();
        self.apply_document(worker, name, package_dir, fetched)
    }

    fn apply_document(
        self: &Arc<Self>,
        worker: WorkerId,
        name: &str,
        package_dir: &Path,
        fetched: Fetched,
    ) -> Result<()> {
        let document: Value = serde_json::from_slice(&fetched.body)?;

        self.reconcile(worker, name, package_dir, &upstream_versions(&document))?;

        let rewrite = rewrite_tarballs(&document, &self.mapper);
        debug!(worker = %worker, package = name, tarballs = rewrite.tarballs.len(), "package rewritten");
        self.schedule_tarballs(rewrite.tarballs);

        let bytes = serde_json::to_vec(&rewrite.document)?;
        self.store.write(
            &package_dir.join(INDEX_FILE),
            &bytes,
            fetched.etag.as_deref(),
            fetched.last_modified.as_deref(),
        )?;
        self.stats.wrote(bytes.len());

        self.snapshot_versions(worker, name, package_dir, &rewrite.document)
    }

    /// Deletes local version directories missing from `upstream`.
    fn reconcile(
        &self,
        worker: WorkerId,
        name: &str,
        package_dir: &Path,
        upstream: &BTreeSet<String>,
    ) -> Result<()> {
        let local = self.store.local_versions(package_dir)?;
        for version in local.difference(upstream) {
            info!(worker = %worker, package = name, version = %version, "removing version gone upstream");
            self.store.remove_dir(&package_dir.join(version))?;
            self.stats.version_removed();
        }
        Ok(())
    }

    /// Writes each version's sub-document to `<package>/<version>/index.json`.
    fn snapshot_versions(
        &self,
        worker: WorkerId,
        name: &str,
        package_dir: &Path,
        document: &Value,
    ) -> Result<()> {
        let Some(versions) = document.get("versions").and_then(Value::as_object) else {
            return Ok(());
        };

        for (version, sub_document) in versions {
            if !is_safe_version(version) {
                warn!(worker = %worker, package = name, version = %version, "skipping unsafe version key");
                continue;
            }
            let path = package_dir.join(version).join(INDEX_FILE);
            let bytes = serde_json::to_vec(sub_document)?;
            if self.store.read(&path)?.as_deref() == Some(bytes.as_slice()) {
                continue;
            }
            self.store.write(&path, &bytes, None, None)?;
            self.stats.wrote(bytes.len());
        }
        Ok(())
    }
}
