//! Conditional fetch controller.
//!
//! Issues "fetch-if-changed" requests against the upstream registry using the
//! ETag (and modification time) of the locally cached copy, follows
//! redirects, and retries transient failures forever with a fixed delay.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::Url;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::pool::{CancelToken, WorkerId};
use crate::store::CacheStore;
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Content returned by the upstream server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// URL the content was finally served from, after redirects.
    pub url: String,
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Response metadata for an unchanged resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validators {
    pub url: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Result of a conditional fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 200: new content.
    Fresh(Fetched),
    /// 304: the cached copy is current. Carries no body.
    NotModified(Validators),
    /// 403: nothing to do.
    Forbidden,
    /// 404: the upstream "not found" document, for the caller to dispose of.
    NotFound(Fetched),
}

impl FetchOutcome {
    pub fn status(&self) -> u16 {
        match self {
            FetchOutcome::Fresh(_) => 200,
            FetchOutcome::NotModified(_) => 304,
            FetchOutcome::Forbidden => 403,
            FetchOutcome::NotFound(_) => 404,
        }
    }
}

/// Performs conditional GETs against the upstream registry.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    store: CacheStore,
    retry_delay: Duration,
    max_redirects: usize,
    cancel: CancelToken,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, store: CacheStore) -> Self {
        Self {
            transport,
            store,
            retry_delay: Duration::from_secs(10),
            max_redirects: 10,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetches `url` if it changed since the copy cached at `cache_ref`.
    ///
    /// Validators are only sent when the content at `cache_ref` exists.
    /// Redirects are followed with the original cache reference. Connection
    /// failures, timeouts and 503 responses are retried after a fixed delay
    /// until they succeed or the run is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error for unexpected status codes, broken redirects,
    /// requests that cannot be built, or cancellation.
    pub fn fetch(
        &self,
        worker: WorkerId,
        url: &str,
        cache_ref: Option<&Path>,
    ) -> Result<FetchOutcome> {
        // A sidecar without its content describes nothing; fetch unconditionally.
        let (etag, since) = match cache_ref {
            Some(path) if path.is_file() => {
                (self.store.etag_of(path), self.store.last_modified_of(path))
            }
            _ => (None, None),
        };

        let mut current = url.to_string();
        let mut redirects = 0;

        loop {
            info!(worker = %worker, url = %current, "fetching");
            let request = HttpRequest {
                url: current.clone(),
                if_none_match: etag.clone(),
                if_modified_since: since.clone(),
            };
            let response = self.send_with_retry(worker, &request)?;
            info!(worker = %worker, url = %current, status = response.status, "fetched");

            match response.status {
                200 => return Ok(FetchOutcome::Fresh(into_fetched(current, response))),
                304 => {
                    return Ok(FetchOutcome::NotModified(Validators {
                        url: current,
                        etag: response.etag,
                        last_modified: response.last_modified,
                    }))
                }
                301 | 302 => {
                    redirects += 1;
                    if redirects > self.max_redirects {
                        return Err(Error::TooManyRedirects { url: url.to_string() });
                    }
                    let location = response
                        .location
                        .ok_or_else(|| Error::MissingLocation { url: current.clone() })?;
                    current = resolve_location(&current, &location)?;
                }
                403 => {
                    warn!(worker = %worker, url = %current, status = 403, "forbidden, skipping");
                    return Ok(FetchOutcome::Forbidden);
                }
                404 => {
                    warn!(worker = %worker, url = %current, status = 404, "not found");
                    return Ok(FetchOutcome::NotFound(into_fetched(current, response)));
                }
                status => {
                    return Err(Error::UnexpectedStatus {
                        url: current,
                        status,
                    })
                }
            }
        }
    }

    fn send_with_retry(&self, worker: WorkerId, request: &HttpRequest) -> Result<HttpResponse> {
        loop {
            match self.transport.get(request) {
                Ok(response) if response.status == 503 => {
                    warn!(worker = %worker, url = %request.url, status = 503, "service unavailable, retrying");
                }
                Ok(response) => return Ok(response),
                Err(e) if !e.is_transient() => {
                    return Err(Error::Http {
                        url: request.url.clone(),
                        message: e.to_string(),
                    })
                }
                Err(e) => {
                    warn!(worker = %worker, url = %request.url, error = %e, "fetch failed, retrying");
                }
            }

            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            thread::sleep(self.retry_delay);
        }
    }
}

fn into_fetched(url: String, response: HttpResponse) -> Fetched {
    Fetched {
        url,
        body: response.body,
        etag: response.etag,
        last_modified: response.last_modified,
    }
}

fn resolve_location(current: &str, location: &str) -> Result<String> {
    let base = Url::parse(current).map_err(|e| Error::Http {
        url: current.to_string(),
        message: format!("Invalid URL: {}", e),
    })?;
    let target = base.join(location).map_err(|e| Error::Http {
        url: current.to_string(),
        message: format!("Invalid redirect location '{}': {}", location, e),
    })?;
    Ok(target.to_string())
}
