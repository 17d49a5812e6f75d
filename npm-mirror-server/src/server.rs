//! HTTP server for the mirrored tree.
//!
//! Every request path maps onto the mirror root. Directories are served
//! through their `index.json`, so package documents, version snapshots, the
//! registry index and tarballs all resolve through the same rule.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use npm_mirror_core::store::INDEX_FILE;
use npm_mirror_core::CacheStore;
use percent_encoding::percent_decode_str;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Server state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    store: Arc<CacheStore>,
}

impl AppState {
    /// Creates app state serving the tree under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            store: Arc::new(CacheStore::new(root)),
        }
    }
}

/// Creates the HTTP router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/*path", get(serve_path))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Maps a raw request path onto a file below the mirror root.
///
/// # Errors
///
/// Returns `BadRequest` for undecodable paths or parent-directory segments,
/// and `NotFound` for the root itself and for hidden entries such as
/// sidecar ETags.
pub fn resolve_request_path(store: &CacheStore, raw_path: &str) -> Result<PathBuf, ServerError> {
    let decoded = percent_decode_str(raw_path)
        .decode_utf8()
        .map_err(|_| ServerError::BadRequest(format!("Path is not valid UTF-8: {}", raw_path)))?;

    let segments: Vec<&str> = decoded.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(ServerError::NotFound);
    }
    if segments.iter().any(|s| *s == ".." || *s == ".") {
        return Err(ServerError::BadRequest(format!("Invalid path: {}", decoded)));
    }
    if segments.iter().any(|s| s.starts_with('.')) {
        return Err(ServerError::NotFound);
    }

    let path = store
        .resolve(&segments.join("/"))
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;
    if path.is_dir() {
        Ok(path.join(INDEX_FILE))
    } else {
        Ok(path)
    }
}

/// Serves a document or tarball.
///
/// GET /{path}
async fn serve_path(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let path = resolve_request_path(&state.store, uri.path())?;

    let store = Arc::clone(&state.store);
    let lookup = path.clone();
    let loaded = tokio::task::spawn_blocking(move || {
        store.read(&lookup).map(|content| {
            content.map(|bytes| (bytes, store.etag_of(&lookup), store.last_modified_of(&lookup)))
        })
    })
    .await
    .map_err(|e| ServerError::Internal(format!("Read task failed: {}", e)))?
    .map_err(|e| ServerError::Internal(format!("Failed to read {}: {}", path.display(), e)))?;

    let Some((bytes, etag, last_modified)) = loaded else {
        return Err(ServerError::NotFound);
    };

    if let Some(etag) = &etag {
        if if_none_match(&headers, etag) {
            debug!(path = %path.display(), "not modified");
            return Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(header::ETAG, etag)
                .body(Body::empty())
                .map_err(|e| ServerError::Internal(format!("Failed to create response: {}", e)));
        }
    }

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(&path))
        .header(header::CONTENT_LENGTH, bytes.len());
    if let Some(etag) = &etag {
        response = response.header(header::ETAG, etag);
    }
    if let Some(last_modified) = &last_modified {
        response = response.header(header::LAST_MODIFIED, last_modified);
    }

    response
        .body(Body::from(bytes))
        .map_err(|e| ServerError::Internal(format!("Failed to create response: {}", e)))
}

async fn not_found() -> ServerError {
    ServerError::NotFound
}

fn content_type(path: &std::path::Path) -> &'static str {
    if path.file_name().is_some_and(|name| name == INDEX_FILE) {
        "application/json"
    } else {
        "application/octet-stream"
    }
}

/// Whether an `If-None-Match` header matches `etag`, using weak comparison.
fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let target = etag.trim_start_matches("W/");
    value.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == target
    })
}

/// Server error types.
#[derive(Debug)]
pub enum ServerError {
    BadRequest(String),
    NotFound,
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ServerError::NotFound => (StatusCode::NOT_FOUND, "not_found".to_string()),
            ServerError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = axum::Json(serde_json::json!({ "error": message }));
        (status, body).into_response()
    }
}
