//! Types and errors shared by the `vault` HTTP layer and its clients.

pub mod error;
pub mod protocol;

pub use error::ServiceError;
