//! Registry index synchronization.

use std::fmt;
use std::sync::Arc;
use std::thread;

use serde::de::{Deserialize, Deserializer, IgnoredAny, MapAccess, Visitor};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fetch::FetchOutcome;
use crate::mirror::Mirror;
use crate::pool::WorkerId;

/// Registry-relative path of the global package index.
pub const INDEX_PATH: &str = "-/all";

/// Package names listed in a registry index.
///
/// Only the keys of the index object are kept; values are skipped without
/// being materialized. Keys starting with `_` are internal entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexKeys(pub Vec<String>);

impl<'de> Deserialize<'de> for IndexKeys {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct KeysVisitor;

        impl<'de> Visitor<'de> for KeysVisitor {
            type Value = IndexKeys;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a registry index object")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<IndexKeys, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut names = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(key) = map.next_key::<String>()? {
                    map.next_value::<IgnoredAny>()?;
                    if !key.starts_with('_') {
                        names.push(key);
                    }
                }
                Ok(IndexKeys(names))
            }
        }

        deserializer.deserialize_map(KeysVisitor)
    }
}

/// Parses the package names out of an index document.
pub fn package_names(body: &[u8]) -> Result<Vec<String>> {
    let keys: IndexKeys = serde_json::from_slice(body)?;
    Ok(keys.0)
}

impl Mirror {
    /// Fetches the registry index and schedules a package sync per package.
    ///
    /// An unchanged index is read back from disk when `recheck` is set, so
    /// every package is still visited; otherwise the run ends early.
    /// Scheduling happens in bursts with a pause in between.
    ///
    /// # Errors
    ///
    /// Returns `IndexUnavailable` if the index yields no content.
    pub fn sync_index(self: &Arc<Self>, worker: WorkerId) -> Result<()> {
        let url = self.mapper.source_url(INDEX_PATH);
        let path = self.store.document_path(INDEX_PATH)?;

        let (names, fresh) = match self.fetcher.fetch(worker, &url, Some(&path))? {
            FetchOutcome::Fresh(fetched) => {
                if fetched.body.is_empty() {
                    return Err(Error::IndexUnavailable { url });
                }
                self.stats.fresh();
                (package_names(&fetched.body)?, Some(fetched))
            }
            FetchOutcome::NotModified(_) => {
                self.stats.not_modified();
                if !self.config.recheck {
                    info!(worker = %worker, "index unchanged, nothing to do");
                    return Ok(());
                }
                let names = match self.store.read(&path)? {
                    Some(bytes) => package_names(&bytes)?,
                    None => {
                        warn!(worker = %worker, path = %path.display(), "index unchanged but no stored copy");
                        Vec::new()
                    }
                };
                (names, None)
            }
            FetchOutcome::Forbidden | FetchOutcome::NotFound(_) => {
                return Err(Error::IndexUnavailable { url });
            }
        };

        info!(worker = %worker, packages = names.len(), "scheduling packages");
        self.schedule_packages(worker, names);

        if let Some(fetched) = fresh {
            self.store.write(
                &path,
                &fetched.body,
                fetched.etag.as_deref(),
                fetched.last_modified.as_deref(),
            )?;
            self.stats.wrote(fetched.body.len());
        }

        Ok(())
    }

    fn schedule_packages(self: &Arc<Self>, worker: WorkerId, names: Vec<String>) {
        let batch_size = self.config.batch_size();
        let total = names.len();
        let mut scheduled = 0;

        for (i, chunk) in names.chunks(batch_size).enumerate() {
            if i > 0 {
                thread::sleep(self.config.batch_pause());
            }
            if self.pool.cancel_token().is_cancelled() {
                warn!(worker = %worker, scheduled, total, "cancelled while scheduling packages");
                return;
            }
            for name in chunk {
                self.schedule_package(name.clone());
            }
            scheduled += chunk.len();
            debug!(worker = %worker, scheduled, total, queued = self.pool.queued(), "scheduled burst");
        }
    }
}
