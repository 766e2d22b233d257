use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What the cache remembers about a processed image. The bytes themselves
/// live in the destination storage at `filepath`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptor {
    pub key: String,
    pub filepath: String,
    pub url: String,
    pub size: i64,
    /// RFC1123 timestamp of the processing.
    pub modified: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ImageDescriptor {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type").map(String::as_str)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_field_names() {
        let descriptor = ImageDescriptor {
            key: "abc".to_string(),
            filepath: "a/b/abc.jpg".to_string(),
            url: String::new(),
            size: 42,
            modified: "Wed, 21 Oct 2015 07:28:00 GMT".to_string(),
            headers: BTreeMap::from([("Content-Type".to_string(), "image/jpeg".to_string())]),
        };

        let json = descriptor.to_json();
        assert!(json.contains("\"filepath\":\"a/b/abc.jpg\""));
        assert_eq!(ImageDescriptor::from_json(&json).unwrap(), descriptor);
        assert_eq!(descriptor.content_type(), Some("image/jpeg"));
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(ImageDescriptor::from_json("a/b/abc.jpg").is_err());
        assert!(ImageDescriptor::from_json("").is_err());
    }
}
