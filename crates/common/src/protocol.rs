//! JSON bodies exchanged over the HTTP API.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// File endpoints
// ---------------------------------------------------------------------------

/// One entry of `GET /api/file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileItem {
    /// Object key in the bucket.
    pub object_name: String,
    /// Stored (encrypted) size in bytes.
    pub size: i64,
}

/// Successful response body for `POST /api/file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadSuccess {
    /// Object key the upload was stored under.
    pub object_name: String,
    /// Version reported by the object store; empty when versioning is off.
    #[serde(rename = "versionID")]
    pub version_id: String,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"not_found"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
    /// Request path that produced the error, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            path: None,
        }
    }

    /// Attach the request path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"degraded"`.
    pub status: String,
    /// Bucket the service stores objects in.
    pub bucket: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upload_success_uses_version_id_key() {
        let body = FileUploadSuccess {
            object_name: "report.pdf".into(),
            version_id: "v1".into(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"object_name": "report.pdf", "versionID": "v1"})
        );
    }

    #[test]
    fn file_item_shape() {
        let items: Vec<FileItem> =
            serde_json::from_value(json!([{"object_name": "a", "size": 90}])).unwrap();
        assert_eq!(
            items,
            vec![FileItem {
                object_name: "a".into(),
                size: 90
            }]
        );
    }

    #[test]
    fn error_response_path_is_optional() {
        let e = ErrorResponse::new("not_found", "no such object");
        assert!(serde_json::to_value(&e).unwrap().get("path").is_none());

        let e = e.with_path("/api/file/x");
        assert_eq!(serde_json::to_value(&e).unwrap()["path"], "/api/file/x");
    }
}
