mod client;
mod dummy;
mod fs;
mod http;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

pub use self::client::{HttpClient, RemoteFile, HEADER_KEYS};
pub use self::dummy::DummyStorage;
pub use self::fs::FileSystemStorage;
pub use self::http::HttpStorage;

const FS_STORAGE_TYPE: &str = "fs";
const HTTP_FS_STORAGE_TYPE: &str = "http+fs";
const HTTP_STORAGE_PREFIX: &str = "http+";

/// RFC1123 layout used for `Last-Modified` and descriptor timestamps.
pub const MODIFIED_TIME_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File does not exist: {0}")]
    NotFound(String),

    #[error("{url} [status: {status}]")]
    Status { url: String, status: u16 },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{0} header not found")]
    MissingHeader(&'static str),

    #[error("Invalid date {0}")]
    InvalidDate(String),

    #[error("storage {0} does not exist")]
    UnknownBackend(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Durable storage for image bytes.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save(&self, path: &str, content: &[u8]) -> Result<(), StorageError>;

    async fn open(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, path: &str) -> bool;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Size in bytes, 0 when the file cannot be read.
    async fn size(&self, path: &str) -> i64;

    async fn modified_time(&self, path: &str) -> Result<DateTime<Utc>, StorageError>;

    /// Public URL of `path`, empty when no base URL is configured.
    fn url(&self, path: &str) -> String;

    fn has_base_url(&self) -> bool;

    /// Caching related headers of `path`.
    async fn headers(&self, _path: &str) -> Result<HashMap<String, String>, StorageError> {
        Ok(HashMap::new())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub base_url: String,
}

/// Source and destination storages. Without a destination, derived images
/// are written next to their sources.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoragesConfig {
    pub src: Option<StorageConfig>,
    pub dst: Option<StorageConfig>,
}

pub fn format_http_date(date: &DateTime<Utc>) -> String {
    date.format(MODIFIED_TIME_FORMAT).to_string()
}

pub fn parse_http_date(value: &str) -> Result<DateTime<Utc>, StorageError> {
    NaiveDateTime::parse_from_str(value, MODIFIED_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| StorageError::InvalidDate(value.to_string()))
}

/// Returns `(source, destination)` storages from configuration.
pub fn new_storages(
    cfg: Option<&StoragesConfig>,
    client: &HttpClient,
) -> Result<(Arc<dyn Storage>, Arc<dyn Storage>), StorageError> {
    let Some(cfg) = cfg else {
        log::info!("Source storage configured with type dummy");
        let storage: Arc<dyn Storage> = Arc::new(DummyStorage);
        return Ok((storage.clone(), storage));
    };

    let source: Arc<dyn Storage> = match &cfg.src {
        Some(src) => {
            let storage = new_storage(src, client)?;
            log::info!("Source storage configured with type {}", src.kind);
            storage
        }
        None => Arc::new(DummyStorage),
    };

    let Some(dst) = &cfg.dst else {
        log::info!("Destination storage not set, source storage will be used");
        return Ok((source.clone(), source));
    };

    let destination = new_storage(dst, client)?;
    log::info!("Destination storage configured with type {}", dst.kind);

    Ok((source, destination))
}

fn new_storage(cfg: &StorageConfig, client: &HttpClient) -> Result<Arc<dyn Storage>, StorageError> {
    if cfg.kind.starts_with(HTTP_STORAGE_PREFIX) && cfg.base_url.is_empty() {
        return Err(StorageError::InvalidConfig(
            "HTTP wrapper cannot be used without setting base_url".to_string(),
        ));
    }

    match cfg.kind.as_str() {
        FS_STORAGE_TYPE => Ok(Arc::new(FileSystemStorage::new(&cfg.location, &cfg.base_url))),
        HTTP_FS_STORAGE_TYPE => {
            let inner = Arc::new(FileSystemStorage::new(&cfg.location, &cfg.base_url));
            Ok(Arc::new(HttpStorage::new(inner, client.clone())))
        }
        other => Err(StorageError::UnknownBackend(other.to_string())),
    }
}
