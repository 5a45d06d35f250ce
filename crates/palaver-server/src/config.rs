//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use palaver_shared::constants::{
    APP_NAME, DEFAULT_HTTP_PORT, DEFAULT_PAGE_LIMIT, DEFAULT_RING_TIMEOUT_SECS, MAX_FILE_SIZE,
    MAX_PAGE_LIMIT,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./palaver.db`
    pub database_path: PathBuf,

    /// Directory where uploaded files are stored.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./blobs`
    pub blob_storage_path: PathBuf,

    /// Maximum upload size in bytes.
    /// Env: `MAX_BLOB_SIZE`
    /// Default: 50 MiB
    pub max_blob_size: usize,

    /// Human-readable name reported by `/info`.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Bearer token for `/admin/*`. Admin API is disabled when unset.
    /// Env: `ADMIN_TOKEN`
    pub admin_token: Option<String>,

    /// How long a call may ring before it is marked missed.
    /// Env: `CALL_RING_TIMEOUT_SECS`
    /// Default: 30 s
    pub ring_timeout: Duration,

    /// Default page size for message listings.
    /// Env: `MESSAGE_PAGE_LIMIT`
    /// Default: 50
    pub message_page_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./palaver.db"),
            blob_storage_path: PathBuf::from("./blobs"),
            max_blob_size: MAX_FILE_SIZE,
            instance_name: format!("{APP_NAME} Server"),
            admin_token: None,
            ring_timeout: Duration::from_secs(DEFAULT_RING_TIMEOUT_SECS),
            message_page_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = var("BLOB_STORAGE_PATH") {
            config.blob_storage_path = PathBuf::from(path);
        }

        if let Some(val) = var("MAX_BLOB_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_blob_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_BLOB_SIZE, using default"),
            }
        }

        if let Some(name) = var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(token) = var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = var("CALL_RING_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.ring_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid CALL_RING_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(val) = var("MESSAGE_PAGE_LIMIT") {
            match val.parse::<u32>() {
                Ok(n) if (1..=MAX_PAGE_LIMIT).contains(&n) => config.message_page_limit = n,
                _ => tracing::warn!(value = %val, "Invalid MESSAGE_PAGE_LIMIT, using default"),
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}
