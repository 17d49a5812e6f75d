//! Error types and result aliases.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error in {context}: {error}")]
    Toml {
        error: toml::de::Error,
        context: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HTTP error for {url}: {message}")]
    Http { url: String, message: String },

    #[error("Unexpected response status {status} for {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("Redirect from {url} carried no Location header")]
    MissingLocation { url: String },

    #[error("Too many redirects while fetching {url}")]
    TooManyRedirects { url: String },

    #[error("Failed to fetch registry index from {url}")]
    IndexUnavailable { url: String },

    #[error("Invalid mirror path: {0}")]
    InvalidPath(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Worker pool error: {0}")]
    Pool(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Toml {
            error,
            context: "npm-mirror.toml".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
