use std::collections::HashMap;
use std::time::Duration;

use reqwest::StatusCode;

use super::StorageError;

/// Response headers propagated to callers alongside image bytes.
pub const HEADER_KEYS: [&str; 5] = ["Age", "Content-Type", "Last-Modified", "Date", "Etag"];

/// Bytes fetched over HTTP with their caching headers.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub content: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl RemoteFile {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type").map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(timeout: u64, user_agent: &str) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client })
    }

    /// GETs `url`, anything but a 200 is an error.
    pub async fn get(&self, url: &str) -> Result<RemoteFile, StorageError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            log::warn!("Remote file not found: {}", url);
            return Err(StorageError::NotFound(url.to_string()));
        }
        if status != StatusCode::OK {
            log::error!("Request to {} failed with status: {}", url, status);
            return Err(StorageError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut headers = extract_headers(response.headers());
        let content = response.bytes().await?.to_vec();

        // If content type is missing or generic, try to detect it from the data
        let generic = matches!(
            headers.get("Content-Type").map(String::as_str),
            None | Some("") | Some("application/octet-stream")
        );
        if generic {
            if let Some(detected) = detect_image_type(&content) {
                headers.insert("Content-Type".to_string(), detected.to_string());
            }
        }

        log::debug!("Fetched {} bytes from {}", content.len(), url);

        Ok(RemoteFile { content, headers })
    }

    /// HEADs `url` and keeps the headers of interest.
    pub async fn head(&self, url: &str) -> Result<HashMap<String, String>, StorageError> {
        let response = self.client.head(url).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(StorageError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(extract_headers(response.headers()))
    }
}

fn extract_headers(map: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    HEADER_KEYS
        .iter()
        .filter_map(|key| {
            map.get(*key)
                .and_then(|value| value.to_str().ok())
                .map(|value| (key.to_string(), value.to_string()))
        })
        .collect()
}

// Detect image type from the file signature
fn detect_image_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if data.starts_with(&[0x47, 0x49, 0x46, 0x38]) {
        Some("image/gif")
    } else if data.starts_with(&[0x52, 0x49, 0x46, 0x46]) && data.get(8..12) == Some(&b"WEBP"[..]) {
        Some("image/webp")
    } else if data.starts_with(&[0x42, 0x4D]) {
        Some("image/bmp")
    } else {
        None
    }
}
