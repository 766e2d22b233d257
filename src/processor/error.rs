use thiserror::Error;

use crate::engine::EngineError;
use crate::kvstore::KvStoreError;
use crate::parameters::ParametersError;
use crate::storage::StorageError;

/// Failures of the processing pipeline.
///
/// Payloads are plain strings so a result can be shared between requests
/// waiting on the same computation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessError {
    #[error("File does not exist: {0}")]
    NotFound(String),

    #[error("File not modified")]
    NotModified,

    #[error("Quality should be <= 100")]
    InvalidQuality,

    #[error("Unprocessable request: {0}")]
    Unprocessable(String),

    #[error("Invalid signature")]
    Unauthorized,

    #[error("Upstream fetch failed: {0}")]
    UpstreamFetchFailed(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Transform error: {0}")]
    Transform(String),
}

impl ProcessError {
    /// HTTP status the error maps to.
    pub fn status(&self) -> u16 {
        match self {
            ProcessError::NotFound(_) => 404,
            ProcessError::NotModified => 304,
            ProcessError::InvalidQuality | ProcessError::Unprocessable(_) => 400,
            ProcessError::Unauthorized => 401,
            ProcessError::UpstreamFetchFailed(_) => 502,
            ProcessError::Backend(_) | ProcessError::Transform(_) => 500,
        }
    }

    /// Maps an error raised while reading a source image.
    pub(crate) fn from_fetch(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(path) => ProcessError::NotFound(path),
            StorageError::Status { .. } | StorageError::Network(_) => {
                ProcessError::UpstreamFetchFailed(error.to_string())
            }
            other => ProcessError::Backend(other.to_string()),
        }
    }
}

impl From<ParametersError> for ProcessError {
    fn from(error: ParametersError) -> Self {
        match error {
            ParametersError::InvalidQuality => ProcessError::InvalidQuality,
            ParametersError::Unprocessable(message) => ProcessError::Unprocessable(message),
        }
    }
}

impl From<KvStoreError> for ProcessError {
    fn from(error: KvStoreError) -> Self {
        match error {
            KvStoreError::KeyNotFound(key) => ProcessError::NotFound(key),
            other => ProcessError::Backend(other.to_string()),
        }
    }
}

impl From<StorageError> for ProcessError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(path) => ProcessError::NotFound(path),
            other => ProcessError::Backend(other.to_string()),
        }
    }
}

impl From<EngineError> for ProcessError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::TooLarge { .. } => ProcessError::Unprocessable(error.to_string()),
            other => ProcessError::Transform(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ProcessError::NotFound("a".into()).status(), 404);
        assert_eq!(ProcessError::NotModified.status(), 304);
        assert_eq!(ProcessError::InvalidQuality.status(), 400);
        assert_eq!(ProcessError::Unprocessable("x".into()).status(), 400);
        assert_eq!(ProcessError::Unauthorized.status(), 401);
        assert_eq!(ProcessError::UpstreamFetchFailed("x".into()).status(), 502);
        assert_eq!(ProcessError::Backend("x".into()).status(), 500);
    }

    #[test]
    fn fetch_errors() {
        let status = StorageError::Status {
            url: "http://x/a.jpg".to_string(),
            status: 500,
        };
        assert!(matches!(ProcessError::from_fetch(status), ProcessError::UpstreamFetchFailed(_)));
        assert!(matches!(
            ProcessError::from_fetch(StorageError::NotFound("a.jpg".into())),
            ProcessError::NotFound(_)
        ));
        assert!(matches!(
            ProcessError::from(StorageError::InvalidPath("../a".into())),
            ProcessError::Backend(_)
        ));
    }

    #[test]
    fn engine_errors() {
        let too_large = EngineError::TooLarge {
            width: 60000,
            height: 30000,
            max_pixels: 100,
        };
        assert!(matches!(ProcessError::from(too_large), ProcessError::Unprocessable(_)));
        assert!(matches!(
            ProcessError::from(EngineError::DecodeError("x".into())),
            ProcessError::Transform(_)
        ));
    }
}
