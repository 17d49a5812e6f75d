//! In-memory registry used by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use npm_mirror_core::{HttpRequest, HttpResponse, MirrorConfig, Transport, TransportError};
use serde_json::Value;

pub const SOURCE: &str = "http://registry.npmjs.org/";
pub const SERVER: &str = "http://localhost/";

/// How the fake registry answers a path.
#[derive(Debug, Clone)]
pub enum Resource {
    Content { body: Vec<u8>, etag: Option<String> },
    Status(u16),
    Redirect(String),
    /// The request cannot be built, as with a malformed URL.
    Invalid,
    /// Fails `remaining` times (503 or a connection error), then answers with `then`.
    Flaky {
        remaining: usize,
        connection_error: bool,
        then: Box<Resource>,
    },
}

pub struct FakeRegistry {
    resources: Mutex<HashMap<String, Resource>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            resources: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set(&self, path: &str, resource: Resource) {
        self.resources
            .lock()
            .unwrap()
            .insert(path.to_string(), resource);
    }

    pub fn put(&self, path: &str, body: impl Into<Vec<u8>>, etag: Option<&str>) {
        self.set(
            path,
            Resource::Content {
                body: body.into(),
                etag: etag.map(str::to_string),
            },
        );
    }

    pub fn put_json(&self, path: &str, value: &Value, etag: &str) {
        self.put(path, serde_json::to_vec(value).unwrap(), Some(etag));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Registry paths requested so far, in request order.
    pub fn requested_paths(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| r.url.trim_start_matches(SOURCE).to_string())
            .collect()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requested_paths().iter().filter(|p| *p == path).count()
    }

    fn answer(resource: &mut Resource, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        match resource {
            Resource::Content { body, etag } => {
                if etag.is_some() && request.if_none_match == *etag {
                    let mut response = HttpResponse::new(304);
                    response.etag = etag.clone();
                    return Ok(response);
                }
                let mut response = HttpResponse::new(200).with_body(body.clone());
                response.etag = etag.clone();
                Ok(response)
            }
            Resource::Status(status) => Ok(HttpResponse::new(*status)),
            Resource::Redirect(location) => Ok(HttpResponse::new(302).with_location(location.clone())),
            Resource::Invalid => Err(TransportError::InvalidRequest("builder error".to_string())),
            Resource::Flaky {
                remaining,
                connection_error,
                then,
            } => {
                if *remaining == 0 {
                    return Self::answer(then, request);
                }
                *remaining -= 1;
                if *connection_error {
                    Err(TransportError::Connect("connection refused".to_string()))
                } else {
                    Ok(HttpResponse::new(503))
                }
            }
        }
    }
}

impl Transport for FakeRegistry {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        let path = request
            .url
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, path)| path.to_string())
            .unwrap_or_default();

        let mut resources = self.resources.lock().unwrap();
        match resources.get_mut(&path) {
            Some(resource) => Self::answer(resource, request),
            None => Ok(HttpResponse::new(404).with_body(br#"{"error":"not_found"}"#.to_vec())),
        }
    }
}

/// Configuration with fast timings for tests.
pub fn test_config(root: &Path) -> MirrorConfig {
    MirrorConfig::new()
        .with_source(SOURCE)
        .with_server(SERVER)
        .with_root(root)
        .with_workers(4)
        .with_retry_delay(Duration::from_millis(5))
        .with_poll_interval(Duration::from_millis(10))
        .with_batch_pause(Duration::from_millis(1))
}

/// Every file below `root` with its content.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(dir: &Path, root: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(&path, root, files);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_path_buf();
                files.insert(rel, fs::read(&path).unwrap());
            }
        }
    }

    let mut files = BTreeMap::new();
    walk(root, root, &mut files);
    files
}

pub fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}
