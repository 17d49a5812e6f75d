//! HTTP transport seam used by the fetch controller.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{
    HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, LOCATION,
};
use reqwest::redirect::Policy;

use crate::error::{Error, Result};

/// A single conditional GET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// The parts of a response the mirror cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub location: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Network-level failures.
///
/// Everything except `InvalidRequest` is transient and retried.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Request failed: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest(_))
    }
}

/// Synchronous request/response primitive shared by all workers.
pub trait Transport: Send + Sync {
    /// Performs a GET without following redirects.
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` when no HTTP response was obtained.
    fn get(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

/// Production transport over a pooled blocking `reqwest` client.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a new HTTP transport.
    ///
    /// Redirects are disabled; the fetch controller follows them itself so
    /// the cache reference survives the hop.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(Policy::none())
            .build()
            .map_err(|e| Error::Http {
                url: String::new(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }
}

fn header_string(response: &reqwest::blocking::Response, name: HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

impl Transport for HttpTransport {
    fn get(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let mut builder = self.client.get(&request.url);
        if let Some(ref etag) = request.if_none_match {
            builder = builder.header(IF_NONE_MATCH, etag);
        }
        if let Some(ref since) = request.if_modified_since {
            builder = builder.header(IF_MODIFIED_SINCE, since);
        }

        let response = builder.send().map_err(|e| {
            if e.is_builder() {
                TransportError::InvalidRequest(e.to_string())
            } else if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let etag = header_string(&response, ETAG);
        let last_modified = header_string(&response, LAST_MODIFIED);
        let location = header_string(&response, LOCATION);
        let body = response
            .bytes()
            .map_err(|e| TransportError::Body(e.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            etag,
            last_modified,
            location,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_url_is_not_transient() {
        let transport = HttpTransport::new(Duration::from_secs(1), "npm-mirror-test").unwrap();

        let err = transport.get(&HttpRequest::get("http://bad host/")).unwrap_err();

        assert!(matches!(err, TransportError::InvalidRequest(_)));
        assert!(!err.is_transient());
        assert!(TransportError::Connect("refused".to_string()).is_transient());
    }
}
