//! Tarball reference discovery and rewriting in package documents.

use serde_json::{Map, Value};

/// Field holding the tarball URL of a dist leaf.
pub const TARBALL_FIELD: &str = "tarball";

/// Content-hash fields that mark an object as a dist leaf.
pub const HASH_FIELDS: [&str; 2] = ["shasum", "integrity"];

/// Maps tarball URLs between the upstream origin and the mirror.
#[derive(Debug, Clone)]
pub struct UrlMapper {
    source: String,
    mirror: String,
}

impl UrlMapper {
    pub fn new(source: impl AsRef<str>, mirror: impl AsRef<str>) -> Self {
        Self {
            source: normalize_base(source.as_ref()),
            mirror: normalize_base(mirror.as_ref()),
        }
    }

    /// Upstream URL for a registry-relative path.
    pub fn source_url(&self, rel: &str) -> String {
        format!("{}{}", self.source, rel.trim_start_matches('/'))
    }

    /// Mirror-served URL for a registry-relative path.
    pub fn mirror_url(&self, rel: &str) -> String {
        format!("{}{}", self.mirror, rel.trim_start_matches('/'))
    }

    /// Extracts the registry-relative path of a URL served by either the
    /// upstream origin or the mirror. The scheme is not compared.
    pub fn relative_path(&self, url: &str) -> Option<String> {
        let target = strip_scheme(url);
        [&self.source, &self.mirror].into_iter().find_map(|base| {
            let rest = target.strip_prefix(strip_scheme(base))?;
            let rest = rest.trim_start_matches('/');
            if rest.is_empty() {
                None
            } else {
                Some(rest.to_string())
            }
        })
    }
}

fn normalize_base(base: &str) -> String {
    format!("{}/", base.trim_end_matches('/'))
}

fn strip_scheme(url: &str) -> &str {
    url.split_once("://").map(|(_, rest)| rest).unwrap_or(url)
}

/// A rewritten document and the tarballs it references.
#[derive(Debug, Clone, PartialEq)]
pub struct Rewrite {
    pub document: Value,
    /// Registry-relative tarball paths, one per dist leaf, in document order.
    pub tarballs: Vec<String>,
}

/// Returns the tarball URL if `map` is a dist leaf.
pub fn dist_tarball(map: &Map<String, Value>) -> Option<&str> {
    let tarball = map.get(TARBALL_FIELD)?.as_str()?;
    if HASH_FIELDS.iter().any(|field| map.contains_key(*field)) {
        Some(tarball)
    } else {
        None
    }
}

/// Rewrites every dist leaf in `document` to point at the mirror.
///
/// Leaves may sit at any depth; objects that are not leaves and arrays are
/// descended into. Leaves whose tarball lives on neither origin are kept
/// as they are and not reported.
pub fn rewrite_tarballs(document: &Value, mapper: &UrlMapper) -> Rewrite {
    let mut tarballs = Vec::new();
    let document = transform(document, mapper, &mut tarballs);
    Rewrite { document, tarballs }
}

fn transform(value: &Value, mapper: &UrlMapper, tarballs: &mut Vec<String>) -> Value {
    match value {
        Value::Object(map) => match dist_tarball(map) {
            Some(url) => {
                let mut leaf = map.clone();
                if let Some(rel) = mapper.relative_path(url) {
                    leaf.insert(
                        TARBALL_FIELD.to_string(),
                        Value::String(mapper.mirror_url(&rel)),
                    );
                    tarballs.push(rel);
                }
                Value::Object(leaf)
            }
            None => Value::Object(
                map.iter()
                    .map(|(key, child)| (key.clone(), transform(child, mapper, tarballs)))
                    .collect(),
            ),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| transform(item, mapper, tarballs))
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}
