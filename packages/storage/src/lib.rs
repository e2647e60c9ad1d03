//! Object storage for job input and output artifacts.
//!
//! Goal:
//! - S3-compatible storage in production/staging
//! - On-disk storage for local dev
//! - In-memory storage for tests
//!
//! Implementation note:
//! This is a small wrapper around `object_store`, which already provides
//! S3, local filesystem, and in-memory backends. Each configured bucket gets
//! its own store; the pipeline only ever addresses objects by `(bucket, key)`.

use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("bucket '{0}' is not configured")]
    UnknownBucket(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Get/put access to artifacts by bucket and key.
///
/// Implementations are shared by every worker task, so they must be safe for
/// concurrent use. Not-found and transport failures are both plain errors.
pub trait ArtifactStore: Send + Sync + 'static {
    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Bytes, StorageError>>;

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        bytes: Bytes,
    ) -> BoxFuture<'a, Result<(), StorageError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    /// One sub-directory of `root` per bucket.
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// Selection rules:
    /// - If `STORAGE_BACKEND` is set: use it (`s3`, `filesystem`, `memory`)
    /// - Otherwise: default to s3
    ///
    /// S3 env vars (S3-compatible):
    /// - `AWS_REGION` (default: `us-east-1`)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (`true`/`false`, default: auto true if endpoint is http://)
    /// - `S3_VIRTUAL_HOSTED_STYLE` (`true`/`false`, default: false)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` (optional;
    ///   also picked up from the ambient AWS environment by the SDK)
    ///
    /// Filesystem env vars:
    /// - `STORAGE_FS_ROOT` (default: `./data/object_store`)
    ///
    /// Common:
    /// - `STORAGE_PREFIX` (optional, e.g. `staging/`)
    pub fn from_env() -> Result<Self, StorageError> {
        let backend = std::env::var("STORAGE_BACKEND").ok().and_then(non_empty);
        let prefix = std::env::var("STORAGE_PREFIX").ok().and_then(non_empty);

        let cfg = match backend.as_deref() {
            None | Some("s3") => Self::s3(read_s3_config()?),
            Some("filesystem") | Some("fs") => {
                let root = std::env::var("STORAGE_FS_ROOT")
                    .ok()
                    .and_then(non_empty)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/object_store"));
                Self::filesystem(root)
            }
            Some("memory") | Some("mem") => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(Self { prefix, ..cfg })
    }
}

#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    buckets: HashMap<String, Arc<dyn ObjectStore>>,
    prefix: Option<String>,
}

impl Storage {
    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Open one store per bucket in `buckets`.
    pub fn new<I, S>(cfg: StorageConfig, buckets: I) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kind = match cfg.backend {
            StorageBackendConfig::S3(_) => StorageKind::S3,
            StorageBackendConfig::Filesystem { .. } => StorageKind::Filesystem,
            StorageBackendConfig::Memory => StorageKind::Memory,
        };

        let mut stores: HashMap<String, Arc<dyn ObjectStore>> = HashMap::new();
        for bucket in buckets {
            let bucket = bucket.into();
            if bucket.trim().is_empty() {
                return Err(StorageError::InvalidConfig(
                    "bucket name must not be empty".to_string(),
                ));
            }
            if stores.contains_key(&bucket) {
                continue;
            }

            let store: Arc<dyn ObjectStore> = match &cfg.backend {
                StorageBackendConfig::S3(s3) => Arc::new(build_s3(s3, &bucket)?),
                StorageBackendConfig::Filesystem { root } => {
                    let dir = root.join(&bucket);
                    ensure_dir(&dir)?;
                    Arc::new(object_store::local::LocalFileSystem::new_with_prefix(&dir)?)
                }
                StorageBackendConfig::Memory => Arc::new(object_store::memory::InMemory::new()),
            };
            tracing::debug!("Opened {} store for bucket {}", kind.as_str(), bucket);
            stores.insert(bucket, store);
        }

        Ok(Self {
            kind,
            buckets: stores,
            prefix: cfg.prefix.and_then(non_empty),
        })
    }

    pub fn from_env<I, S>(buckets: I) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(StorageConfig::from_env()?, buckets)
    }

    fn store(&self, bucket: &str) -> Result<&Arc<dyn ObjectStore>, StorageError> {
        self.buckets
            .get(bucket)
            .ok_or_else(|| StorageError::UnknownBucket(bucket.to_string()))
    }

    fn to_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidKey(
                "object key must not be empty".to_string(),
            ));
        }

        let joined = match self.prefix.as_deref() {
            Some(prefix) => {
                let prefix = prefix.trim_matches('/');
                if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}/{key}")
                }
            }
            None => key.to_string(),
        };

        Path::parse(&joined).map_err(|e| StorageError::InvalidKey(e.to_string()))
    }

    pub async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
    ) -> Result<(), StorageError> {
        let store = self.store(bucket)?;
        let path = self.to_path(key)?;
        store
            .put(&path, object_store::PutPayload::from(bytes))
            .await?;
        Ok(())
    }

    pub async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let store = self.store(bucket)?;
        let path = self.to_path(key)?;
        let res = store.get(&path).await?;
        Ok(res.bytes().await?)
    }
}

impl ArtifactStore for Storage {
    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Bytes, StorageError>> {
        Box::pin(self.get_bytes(bucket, key))
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        bytes: Bytes,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.put_bytes(bucket, key, bytes))
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool_env(var_name: &str) -> Result<Option<bool>, StorageError> {
    let v = match std::env::var(var_name) {
        Ok(v) => v,
        Err(std::env::VarError::NotPresent) => return Ok(None),
        Err(e) => {
            return Err(StorageError::InvalidConfig(format!(
                "failed reading {var_name}: {e}"
            )));
        }
    };

    docpipe_core::parse_flag(&v).map(Some).ok_or_else(|| {
        StorageError::InvalidConfig(format!(
            "invalid boolean for {var_name}={v} (expected true/false)"
        ))
    })
}

fn read_s3_config() -> Result<S3Config, StorageError> {
    let region = std::env::var("AWS_REGION")
        .ok()
        .and_then(non_empty)
        .unwrap_or_else(|| "us-east-1".to_string());

    let endpoint = std::env::var("S3_ENDPOINT").ok().and_then(non_empty);
    let allow_http = match parse_bool_env("S3_ALLOW_HTTP")? {
        Some(v) => v,
        None => endpoint
            .as_deref()
            .is_some_and(|e| e.trim_start().to_ascii_lowercase().starts_with("http://")),
    };

    let virtual_hosted_style = parse_bool_env("S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false);

    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok().and_then(non_empty);
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .ok()
        .and_then(non_empty);
    let session_token = std::env::var("AWS_SESSION_TOKEN").ok().and_then(non_empty);

    Ok(S3Config {
        region,
        endpoint,
        allow_http,
        access_key_id,
        secret_access_key,
        session_token,
        virtual_hosted_style,
    })
}

fn build_s3(cfg: &S3Config, bucket: &str) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region(&cfg.region)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style);

    if let Some(endpoint) = &cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = &cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = &cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }
    if let Some(session_token) = &cfg.session_token {
        builder = builder.with_token(session_token);
    }

    Ok(builder.build()?)
}
