use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use super::{format_http_date, Storage, StorageError};
use crate::engine::mimetype_by_extension;

/// Files stored under a root directory.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root: PathBuf,
    base_url: Option<String>,
}

impl FileSystemStorage {
    pub fn new(location: impl AsRef<Path>, base_url: &str) -> Self {
        Self {
            root: location.as_ref().to_path_buf(),
            base_url: (!base_url.is_empty()).then(|| base_url.trim_end_matches('/').to_string()),
        }
    }

    /// Joins `path` under the root, refusing anything that escapes it.
    fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path.trim_start_matches('/'));

        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || path.is_empty() {
            return Err(StorageError::InvalidPath(path.to_string()));
        }

        Ok(self.root.join(relative))
    }
}

fn not_found(path: &str, e: std::io::Error) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl Storage for FileSystemStorage {
    async fn save(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        let full = self.full_path(path)?;

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(&full, content).await?;
        Ok(())
    }

    async fn open(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.full_path(path)?;
        fs::read(&full).await.map_err(|e| not_found(path, e))
    }

    async fn exists(&self, path: &str) -> bool {
        match self.full_path(path) {
            Ok(full) => fs::metadata(&full).await.map(|m| m.is_file()).unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.full_path(path)?;
        fs::remove_file(&full).await.map_err(|e| not_found(path, e))
    }

    async fn size(&self, path: &str) -> i64 {
        let Ok(full) = self.full_path(path) else {
            return 0;
        };

        match fs::metadata(&full).await {
            Ok(meta) => i64::try_from(meta.len()).unwrap_or(i64::MAX),
            Err(_) => 0,
        }
    }

    async fn modified_time(&self, path: &str) -> Result<DateTime<Utc>, StorageError> {
        let full = self.full_path(path)?;
        let meta = fs::metadata(&full).await.map_err(|e| not_found(path, e))?;

        Ok(DateTime::<Utc>::from(meta.modified()?))
    }

    fn url(&self, path: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{}/{}", base, path.trim_start_matches('/')),
            None => String::new(),
        }
    }

    fn has_base_url(&self) -> bool {
        self.base_url.is_some()
    }

    async fn headers(&self, path: &str) -> Result<HashMap<String, String>, StorageError> {
        let modified = self.modified_time(path).await?;

        let mut headers = HashMap::new();
        headers.insert("Last-Modified".to_string(), format_http_date(&modified));
        if let Some(content_type) = mimetype_by_extension(path) {
            headers.insert("Content-Type".to_string(), content_type.to_string());
        }

        Ok(headers)
    }
}
