//! Rigger Kube - Kubernetes side of a release
//!
//! - Release revisions persisted through pluggable storage drivers
//!   (Secrets, ConfigMaps, in-memory)
//! - [`StorageHistory`]: latest-revision lookup for the reconciler
//! - [`KubeReleaseRunner`]: render, record and apply a revision
//! - Server-Side Apply of rendered manifests in dependency order

pub mod client;
pub mod error;
pub mod history;
pub mod release;
pub mod resources;
pub mod runner;
pub mod storage;

pub use client::{connect, server_capabilities};
pub use error::{KubeError, Result};
pub use history::StorageHistory;
pub use kube::Client;
pub use release::{ReleaseState, StoredRelease};
pub use resources::{ApplySummary, ClusterApplier, DryRunApplier, ManifestApplier};
pub use runner::KubeReleaseRunner;
pub use storage::{
    CompressionMethod, ConfigMapDriver, DriverKind, MemoryDriver, SecretsDriver, StorageConfig,
    StorageDriver, driver_for,
};
