use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{parse_http_date, HttpClient, Storage, StorageError};

/// Storage whose files are written through an inner storage and read back
/// over HTTP from its base URL.
pub struct HttpStorage {
    inner: Arc<dyn Storage>,
    client: HttpClient,
}

impl HttpStorage {
    pub fn new(inner: Arc<dyn Storage>, client: HttpClient) -> Self {
        Self { inner, client }
    }
}

#[async_trait]
impl Storage for HttpStorage {
    async fn save(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        self.inner.save(path, content).await
    }

    async fn open(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let file = self.client.get(&self.url(path)).await?;
        Ok(file.content)
    }

    async fn exists(&self, path: &str) -> bool {
        self.inner.exists(path).await
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.inner.delete(path).await
    }

    async fn size(&self, path: &str) -> i64 {
        self.inner.size(path).await
    }

    async fn modified_time(&self, path: &str) -> Result<DateTime<Utc>, StorageError> {
        let headers = self.headers(path).await?;

        let last_modified = headers
            .get("Last-Modified")
            .ok_or(StorageError::MissingHeader("Last-Modified"))?;

        parse_http_date(last_modified)
    }

    fn url(&self, path: &str) -> String {
        self.inner.url(path)
    }

    fn has_base_url(&self) -> bool {
        self.inner.has_base_url()
    }

    async fn headers(&self, path: &str) -> Result<HashMap<String, String>, StorageError> {
        self.client.head(&self.url(path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileSystemStorage;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MockServer, tempfile::TempDir, HttpStorage) {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(FileSystemStorage::new(dir.path(), &server.uri()));
        let client = HttpClient::new(5, "pixfit-test").unwrap();

        (server, dir, HttpStorage::new(inner, client))
    }

    #[tokio::test]
    async fn open_reads_over_http() {
        let (server, _dir, storage) = setup().await;
        Mock::given(method("GET"))
            .and(path("/a/b.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote".to_vec()))
            .mount(&server)
            .await;

        assert_eq!(storage.open("a/b.png").await.unwrap(), b"remote");
    }

    #[tokio::test]
    async fn open_requires_ok_status() {
        let (server, _dir, storage) = setup().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        match storage.open("a.png").await {
            Err(StorageError::Status { status, url }) => {
                assert_eq!(status, 500);
                assert!(url.ends_with("/a.png"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn writes_go_to_inner_storage() {
        let (_server, dir, storage) = setup().await;

        storage.save("x/y.jpg", b"data").await.unwrap();

        assert!(storage.exists("x/y.jpg").await);
        assert_eq!(storage.size("x/y.jpg").await, 4);
        assert!(dir.path().join("x/y.jpg").is_file());

        storage.delete("x/y.jpg").await.unwrap();
        assert!(!storage.exists("x/y.jpg").await);
    }

    #[tokio::test]
    async fn modified_time_from_last_modified_header() {
        let (server, _dir, storage) = setup().await;
        Mock::given(method("HEAD"))
            .and(path("/a.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")
                    .insert_header("Age", "12"),
            )
            .mount(&server)
            .await;

        let modified = storage.modified_time("a.png").await.unwrap();
        assert_eq!(modified.to_rfc3339(), "2015-10-21T07:28:00+00:00");

        let headers = storage.headers("a.png").await.unwrap();
        assert_eq!(headers.get("Age").map(String::as_str), Some("12"));
    }

    #[tokio::test]
    async fn modified_time_fails_without_header() {
        let (server, _dir, storage) = setup().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert!(matches!(
            storage.modified_time("a.png").await,
            Err(StorageError::MissingHeader("Last-Modified"))
        ));
    }

    #[tokio::test]
    async fn url_comes_from_inner_storage() {
        let (server, _dir, storage) = setup().await;

        assert!(storage.has_base_url());
        assert_eq!(storage.url("a.png"), format!("{}/a.png", server.uri()));
    }
}
