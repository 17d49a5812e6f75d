//! The mirroring engine: shared state for one run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::config::MirrorConfig;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::pool::{CancelToken, WorkerId, WorkerPool};
use crate::rewrite::UrlMapper;
use crate::stats::{SyncStats, SyncSummary};
use crate::store::CacheStore;
use crate::transport::{HttpTransport, Transport};

/// Mirrors an npm registry onto local storage.
///
/// A `Mirror` owns its worker pool and performs a single run; the pool is
/// shut down when the run finishes. Build a new `Mirror` for the next run.
pub struct Mirror {
    pub(crate) config: MirrorConfig,
    pub(crate) store: CacheStore,
    pub(crate) fetcher: Fetcher,
    pub(crate) mapper: UrlMapper,
    pub(crate) pool: WorkerPool,
    pub(crate) stats: SyncStats,
    ran: AtomicBool,
}

impl Mirror {
    /// Creates a mirror talking to the upstream registry over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: MirrorConfig, cancel: CancelToken) -> Result<Arc<Self>> {
        config.validate()?;
        let transport = HttpTransport::new(config.request_timeout(), &config.user_agent)?;
        Self::with_transport(config, Arc::new(transport), cancel)
    }

    /// Creates a mirror using the given transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_transport(
        config: MirrorConfig,
        transport: Arc<dyn Transport>,
        cancel: CancelToken,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let store = CacheStore::new(&config.root);
        let fetcher = Fetcher::new(transport, store.clone())
            .with_retry_delay(config.retry_delay())
            .with_max_redirects(config.max_redirects)
            .with_cancel(cancel.clone());
        let mapper = UrlMapper::new(&config.source, &config.server);
        let pool = WorkerPool::with_cancel(config.workers, cancel)
            .with_poll_interval(config.poll_interval())
            .with_shutdown_grace(config.shutdown_grace());

        Ok(Arc::new(Self {
            config,
            store,
            fetcher,
            mapper,
            pool,
            stats: SyncStats::new(),
            ran: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Mirrors the whole registry: index, every package, every tarball.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be fetched, the pool fails, or
    /// this mirror already ran. Failures of individual packages or tarballs
    /// are logged and counted.
    pub fn run(self: &Arc<Self>) -> Result<SyncSummary> {
        self.begin()?;
        let result = self
            .pool
            .start()
            .and_then(|_| self.sync_index(WorkerId::Driver))
            .and_then(|_| self.pool.run_until_idle());
        self.pool.shutdown();
        result?;
        Ok(self.finish())
    }

    /// Mirrors only the named packages and their tarballs.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool fails or this mirror already ran.
    pub fn run_packages(self: &Arc<Self>, names: &[String]) -> Result<SyncSummary> {
        self.begin()?;
        for name in names {
            self.schedule_package(name.clone());
        }
        let result = self.pool.run_until_idle();
        self.pool.shutdown();
        result?;
        Ok(self.finish())
    }

    /// Counters collected so far.
    pub fn summary(&self) -> SyncSummary {
        self.stats.summary(self.pool.failed_tasks())
    }

    fn begin(&self) -> Result<()> {
        if self.ran.swap(true, Ordering::SeqCst) {
            return Err(Error::Pool("mirror already ran".to_string()));
        }
        info!(
            worker = %WorkerId::Driver,
            source = %self.config.source,
            root = %self.config.root.display(),
            server = %self.config.server,
            workers = self.config.workers,
            "mirroring"
        );
        Ok(())
    }

    fn finish(&self) -> SyncSummary {
        let summary = self.summary();
        info!(
            worker = %WorkerId::Driver,
            packages = summary.packages_scheduled,
            tarballs = summary.tarballs_scheduled,
            fresh = summary.fresh,
            not_modified = summary.not_modified,
            failed = summary.failed_tasks,
            "mirror run complete"
        );
        summary
    }
}
