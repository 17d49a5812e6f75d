//! Core engine for mirroring an npm registry onto local storage.

pub mod config;
pub mod error;
pub mod fetch;
pub mod index;
pub mod mirror;
pub mod package;
pub mod pool;
pub mod rewrite;
pub mod stats;
pub mod store;
pub mod tarball;
pub mod transport;

pub use config::MirrorConfig;
pub use error::{Error, Result};
pub use fetch::{FetchOutcome, Fetched, Fetcher, Validators};
pub use mirror::Mirror;
pub use pool::{CancelToken, WorkerId, WorkerPool};
pub use rewrite::{rewrite_tarballs, Rewrite, UrlMapper};
pub use stats::{SyncStats, SyncSummary};
pub use store::CacheStore;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Transport, TransportError};
