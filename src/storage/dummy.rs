use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Storage, StorageError};

/// Storage used when none is configured. Writes are discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyStorage;

#[async_trait]
impl Storage for DummyStorage {
    async fn save(&self, _path: &str, _content: &[u8]) -> Result<(), StorageError> {
        Ok(())
    }

    async fn open(&self, _path: &str) -> Result<Vec<u8>, StorageError> {
        Ok(Vec::new())
    }

    async fn exists(&self, _path: &str) -> bool {
        false
    }

    async fn delete(&self, _path: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn size(&self, _path: &str) -> i64 {
        0
    }

    async fn modified_time(&self, _path: &str) -> Result<DateTime<Utc>, StorageError> {
        Ok(DateTime::<Utc>::default())
    }

    fn url(&self, _path: &str) -> String {
        String::new()
    }

    fn has_base_url(&self) -> bool {
        false
    }
}
