//! HTTP server publishing a mirrored npm registry tree.

pub mod config;
pub mod server;

pub use config::ServerConfig;
pub use server::{create_router, AppState, ServerError};
