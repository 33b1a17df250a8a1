//! Object storage: the S3 capability, upload writers and the pipeline that
//! ties them to the codec.

pub mod client;
#[cfg(test)]
pub mod memory;
pub mod pipeline;
pub mod s3;
pub mod writer;

pub use client::{ObjectStore, StoreError};
pub use pipeline::{Connection, PartLimits, PipelineError, PushRequest};
pub use s3::S3Store;
