//! Configuration loading and validation for the vault service.
//!
//! Values come from a YAML file, overridden by `VAULT__<SECTION>__<KEY>`
//! environment variables (e.g. `VAULT__MINIO__BUCKET`). The process exits with
//! a clear error message if a required value is missing or invalid.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use codec::AesKey;
use serde::Deserialize;

use crate::store::PartLimits;

/// Validated service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub minio: MinioConfig,
}

#[derive(Clone, Deserialize)]
pub struct ServiceConfig {
    /// Listen address of the HTTP server.
    #[serde(default = "default_address")]
    pub address: String,

    /// `"<int> <B|KBi|MBi|GBi>"` or plain bytes; zero selects whole mode.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: String,

    /// 64 hex characters. **Required.**
    pub aes_encryption_key: String,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Largest accepted upload request body, same format as `chunk_size`.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: String,
}

#[derive(Clone, Deserialize)]
pub struct MinioConfig {
    /// `http(s)://host:port`; a bare `host:port` is treated as plain HTTP.
    /// **Required.**
    pub endpoint: String,

    /// **Required.**
    pub access_key: String,

    /// **Required.**
    pub secret_key: String,

    /// Bucket holding every encrypted object. **Required.**
    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,
}

fn default_address() -> String {
    "0.0.0.0:8080".into()
}
fn default_chunk_size() -> String {
    "5 MBi".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_max_upload_size() -> String {
    "100 MBi".into()
}
fn default_region() -> String {
    "us-east-1".into()
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("address", &self.address)
            .field("chunk_size", &self.chunk_size)
            .field("aes_encryption_key", &"<redacted>")
            .field("log_level", &self.log_level)
            .field("max_upload_size", &self.max_upload_size)
            .finish()
    }
}

impl fmt::Debug for MinioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinioConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish()
    }
}

impl MinioConfig {
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!("http://{}", self.endpoint)
        }
    }
}

impl Config {
    /// Load and validate configuration from `path` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, a required value is absent, or
    /// any value cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let file = config::File::from(path)
            .format(config::FileFormat::Yaml)
            .required(true);
        Self::from_source(file)
    }

    fn from_source<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let cfg = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix("VAULT").separator("__"))
            .build()
            .context("failed to build configuration")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.minio.endpoint, "minio.endpoint")?;
        ensure_non_empty(&self.minio.access_key, "minio.access_key")?;
        ensure_non_empty(&self.minio.secret_key, "minio.secret_key")?;
        ensure_non_empty(&self.minio.bucket, "minio.bucket")?;
        ensure_non_empty(&self.minio.region, "minio.region")?;
        ensure_non_empty(&self.service.log_level, "service.log_level")?;

        self.listen_addr()?;
        self.aes_key()?;
        let chunk_size = self.chunk_size()?;
        PartLimits::default()
            .validate_chunk_size(chunk_size)
            .context("service.chunk_size is not accepted by the object store")?;
        if self.max_upload_size()? == 0 {
            anyhow::bail!("service.max_upload_size must be > 0");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.service
            .address
            .parse()
            .with_context(|| format!("service.address {:?} is not a socket address", self.service.address))
    }

    pub fn aes_key(&self) -> Result<AesKey> {
        AesKey::from_hex(self.service.aes_encryption_key.trim())
            .context("service.aes_encryption_key must be 64 hex characters")
    }

    pub fn chunk_size(&self) -> Result<u64> {
        extract_size(&self.service.chunk_size).context("invalid service.chunk_size")
    }

    pub fn max_upload_size(&self) -> Result<usize> {
        let size = extract_size(&self.service.max_upload_size)
            .context("invalid service.max_upload_size")?;
        usize::try_from(size).context("service.max_upload_size does not fit in memory")
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

/// Parse `"<int> <unit>"` with unit one of `B`, `KBi`, `MBi`, `GBi`, or a
/// plain byte count.
pub fn extract_size(size: &str) -> Result<u64> {
    let parts: Vec<&str> = size.split_whitespace().collect();
    let (quantity, shift) = match parts.as_slice() {
        [n] => (*n, 0),
        [n, unit] => {
            let shift = match *unit {
                "B" => 0,
                "KBi" => 10,
                "MBi" => 20,
                "GBi" => 30,
                other => anyhow::bail!("unknown unit {other:?}, use one of B, KBi, MBi, GBi"),
            };
            (*n, shift)
        }
        _ => anyhow::bail!(
            "cannot parse {size:?}: expected \"<int> <unit>\" with unit one of B, KBi, MBi, GBi"
        ),
    };
    let quantity: u64 = quantity
        .parse()
        .with_context(|| format!("{quantity:?} is not a non-negative integer"))?;
    quantity
        .checked_mul(1 << shift)
        .with_context(|| format!("{size:?} overflows a 64-bit byte count"))
}
