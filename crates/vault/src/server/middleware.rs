//! Axum middleware layers applied to the router.
//!
//! Includes request tracing, timeout enforcement, and the upload body limit.

use std::time::Duration;

/// Per-request timeout applied to all routes. Uploads of `max_upload_size`
/// must fit inside it.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
