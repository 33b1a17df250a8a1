//! HTTP surface: list, upload and download of encrypted files.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
