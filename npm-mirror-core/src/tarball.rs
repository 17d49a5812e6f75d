//! Tarball fetching.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::fetch::FetchOutcome;
use crate::mirror::Mirror;
use crate::pool::WorkerId;

impl Mirror {
    pub(crate) fn schedule_tarballs(self: &Arc<Self>, tarballs: Vec<String>) {
        for rel in tarballs {
            self.schedule_tarball(rel);
        }
    }

    pub(crate) fn schedule_tarball(self: &Arc<Self>, rel: String) {
        if let Err(e) = self.store.resolve(&rel) {
            warn!(tarball = %rel, error = %e, "skipping tarball with unusable path");
            self.stats.skipped();
            return;
        }
        self.stats.tarball_scheduled();
        let mirror = Arc::clone(self);
        self.pool.enqueue(format!("tarball {}", rel), move |worker| {
            mirror.fetch_tarball(worker, &rel)
        });
    }

    /// Fetches one tarball and stores it at its registry-relative path.
    ///
    /// Unchanged, forbidden, missing and empty tarballs leave the store
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid paths, unexpected statuses or filesystem
    /// failures.
    pub fn fetch_tarball(&self, worker: WorkerId, rel: &str) -> Result<()> {
        let path = self.store.resolve(rel)?;
        let url = self.mapper.source_url(rel);

        match self.fetcher.fetch(worker, &url, Some(&path))? {
            FetchOutcome::Fresh(fetched) if !fetched.body.is_empty() => {
                self.stats.fresh();
                self.store.write(
                    &path,
                    &fetched.body,
                    fetched.etag.as_deref(),
                    fetched.last_modified.as_deref(),
                )?;
                self.stats.wrote(fetched.body.len());
            }
            FetchOutcome::Fresh(_) => {
                debug!(worker = %worker, tarball = rel, "empty tarball body, skipping");
                self.stats.skipped();
            }
            FetchOutcome::NotModified(_) => self.stats.not_modified(),
            FetchOutcome::Forbidden => self.stats.skipped(),
            FetchOutcome::NotFound(_) => {
                warn!(worker = %worker, tarball = rel, "tarball missing upstream");
                self.stats.skipped();
            }
        }
        Ok(())
    }
}
