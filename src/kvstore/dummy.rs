use async_trait::async_trait;

use super::{KvStore, KvStoreError};

/// Store used when caching is disabled: every lookup is a miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyStore;

#[async_trait]
impl KvStore for DummyStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, KvStoreError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), KvStoreError> {
        Ok(())
    }

    async fn exists(&self, _key: &str) -> bool {
        false
    }

    async fn delete(&self, _key: &str) -> Result<(), KvStoreError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), KvStoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_misses() {
        let store = DummyStore;

        store.set("key", "value").await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), None);
        assert!(!store.exists("key").await);
        assert!(store.delete("key").await.is_ok());
        assert!(store.close().await.is_ok());
    }
}
