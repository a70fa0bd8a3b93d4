//! Storage drivers for persisting release revisions
//!
//! - **Secrets** (default): one Kubernetes Secret per revision
//! - **ConfigMap**: same layout in ConfigMaps
//! - **Memory**: process-local, for dry runs and tests
//!
//! Cluster drivers store the revision as JSON, compressed and base64
//! encoded, under the key `release`.

mod configmap;
mod memory;
mod object;
mod secrets;

pub use configmap::ConfigMapDriver;
pub use memory::MemoryDriver;
pub use object::{KubeDriver, ReleaseObject};
pub use secrets::SecretsDriver;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// Data key holding the encoded revision
pub const RELEASE_DATA_KEY: &str = "release";

/// Value of the `owner` label on every storage object
pub const OWNER: &str = "rigger";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Persists release revisions, one record per revision
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Get a specific revision
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease>;

    /// Get the latest revision
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        self.history(namespace, name, Some(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    /// Revisions of a release, newest first, at most `max` of them.
    /// Fails with `ReleaseNotFound` when there are none.
    async fn history(
        &self,
        namespace: &str,
        name: &str,
        max: Option<usize>,
    ) -> Result<Vec<StoredRelease>>;

    /// Store a new revision; fails with `ReleaseAlreadyExists` if taken
    async fn create(&self, release: &StoredRelease) -> Result<()>;

    /// Replace an existing revision
    async fn update(&self, release: &StoredRelease) -> Result<()>;

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<()>;

    /// Check if a release has any revision
    async fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.get_latest(namespace, name).await {
            Ok(_) => Ok(true),
            Err(KubeError::ReleaseNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub compression: CompressionMethod,

    /// Revisions kept per release after an upgrade; 0 keeps all
    pub max_history: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::default(),
            max_history: 10,
        }
    }
}

/// How revision payloads are compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None,

    /// Default; readable by Helm tooling
    Gzip { level: u32 },

    Zstd { level: i32 },
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::Gzip { level: 6 }
    }
}

/// Which driver to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Secrets,
    ConfigMaps,
    Memory,
}

impl DriverKind {
    /// Whether this driver talks to the cluster
    pub fn needs_cluster(&self) -> bool {
        !matches!(self, Self::Memory)
    }
}

impl FromStr for DriverKind {
    type Err = KubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "secret" | "secrets" => Ok(Self::Secrets),
            "configmap" | "configmaps" => Ok(Self::ConfigMaps),
            "memory" => Ok(Self::Memory),
            other => Err(KubeError::InvalidConfig(format!(
                "unknown storage driver '{}' (expected secret, configmap or memory)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Secrets => "secret",
            Self::ConfigMaps => "configmap",
            Self::Memory => "memory",
        };
        write!(f, "{}", s)
    }
}

/// Build the driver selected by `kind`. Cluster drivers need a client.
pub fn driver_for(
    kind: DriverKind,
    client: Option<kube::Client>,
    config: StorageConfig,
) -> Result<Arc<dyn StorageDriver>> {
    match (kind, client) {
        (DriverKind::Memory, _) => Ok(Arc::new(MemoryDriver::new())),
        (DriverKind::Secrets, Some(client)) => Ok(Arc::new(SecretsDriver::new(client, config))),
        (DriverKind::ConfigMaps, Some(client)) => {
            Ok(Arc::new(ConfigMapDriver::new(client, config)))
        }
        (kind, None) => Err(KubeError::InvalidConfig(format!(
            "storage driver '{}' needs a Kubernetes client",
            kind
        ))),
    }
}

/// Compress an encoded revision
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { level } => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder
                .write_all(data)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| KubeError::Compression(e.to_string()))
        }
        CompressionMethod::Zstd { level } => zstd::encode_all(std::io::Cursor::new(data), level)
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Decompress data, detecting the method from its magic bytes
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.starts_with(&GZIP_MAGIC) {
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| KubeError::Compression(e.to_string()))?;
        Ok(decompressed)
    } else if data.starts_with(&ZSTD_MAGIC) {
        zstd::decode_all(std::io::Cursor::new(data))
            .map_err(|e| KubeError::Compression(e.to_string()))
    } else {
        Ok(data.to_vec())
    }
}

/// Encode a revision for storage (serialize + compress + base64)
pub fn encode_for_storage(release: &StoredRelease, config: &StorageConfig) -> Result<String> {
    let json = serde_json::to_vec(release)?;
    let compressed = compress(&json, config.compression)?;
    Ok(STANDARD.encode(compressed))
}

/// Decode a revision from storage (base64 + decompress + deserialize)
pub fn decode_from_storage(data: &str) -> Result<StoredRelease> {
    let decoded = STANDARD
        .decode(data.trim())
        .map_err(|e| KubeError::Serialization(format!("base64 decode error: {}", e)))?;
    let json = decompress(&decoded)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Labels applied to every storage object
pub fn storage_labels(release: &StoredRelease) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("owner".to_string(), OWNER.to_string()),
        ("name".to_string(), release.name.clone()),
        ("version".to_string(), release.version.to_string()),
        ("status".to_string(), release.state.status().to_string()),
    ])
}

/// Label selector matching every revision of a release
pub fn history_selector(name: &str) -> String {
    format!("owner={},name={}", OWNER, name)
}

/// Sort newest first and keep at most `max`
pub(crate) fn newest_first(
    mut releases: Vec<StoredRelease>,
    max: Option<usize>,
) -> Vec<StoredRelease> {
    releases.sort_by(|a, b| b.version.cmp(&a.version));
    if let Some(max) = max {
        releases.truncate(max);
    }
    releases
}
