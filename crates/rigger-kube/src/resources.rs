//! Applying rendered manifests
//!
//! [`ClusterApplier`] uses Server-Side Apply on dynamic objects resolved
//! through API discovery, so any kind the cluster serves can be applied.
//! [`DryRunApplier`] parses and orders the same documents without
//! touching a cluster.

use async_trait::async_trait;
use kube::{
    Client,
    api::{Api, DynamicObject, Patch, PatchParams},
    core::{GroupVersionKind, TypeMeta},
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use rigger_core::OperationContext;
use serde::Deserialize;

use crate::error::{KubeError, Result};

/// Field manager name for Server-Side Apply
pub const FIELD_MANAGER: &str = "rigger";

/// Applies a multi-document manifest to a target
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    async fn apply(
        &self,
        namespace: &str,
        manifest: &str,
        ctx: &OperationContext,
    ) -> Result<ApplySummary>;
}

/// What an apply touched, in apply order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// `Kind/name` or `namespace/Kind/name`
    pub applied: Vec<String>,
}

/// Creation order: cluster-wide prerequisites, then configuration, then
/// workloads and whatever depends on them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApplyOrder {
    Crd,
    Namespace,
    NamespaceConfig,
    ClusterRbac,
    NamespacedRbac,
    Config,
    Storage,
    Network,
    Workload,
    Batch,
    Autoscaling,
    Other,
}

impl ApplyOrder {
    pub fn for_kind(kind: &str) -> Self {
        match kind {
            "CustomResourceDefinition" => Self::Crd,
            "Namespace" => Self::Namespace,
            "ResourceQuota" | "LimitRange" => Self::NamespaceConfig,
            "ClusterRole" | "ClusterRoleBinding" => Self::ClusterRbac,
            "Role" | "RoleBinding" | "ServiceAccount" => Self::NamespacedRbac,
            "ConfigMap" | "Secret" => Self::Config,
            "PersistentVolume" | "PersistentVolumeClaim" | "StorageClass" => Self::Storage,
            "NetworkPolicy" | "Service" | "Endpoints" | "Ingress" | "IngressClass" => Self::Network,
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Pod" => Self::Workload,
            "Job" | "CronJob" => Self::Batch,
            "HorizontalPodAutoscaler" | "PodDisruptionBudget" => Self::Autoscaling,
            _ => Self::Other,
        }
    }
}

/// One document of a manifest
#[derive(Debug, Clone)]
pub struct ManifestObject {
    pub object: DynamicObject,
    pub gvk: GroupVersionKind,
}

impl ManifestObject {
    pub fn name(&self) -> &str {
        self.object.metadata.name.as_deref().unwrap_or("unnamed")
    }

    /// Display name for logging
    pub fn display_name(&self) -> String {
        describe(&self.object, &self.gvk.kind)
    }
}

fn describe(object: &DynamicObject, kind: &str) -> String {
    let name = object.metadata.name.as_deref().unwrap_or("unnamed");
    match &object.metadata.namespace {
        Some(ns) => format!("{}/{}/{}", ns, kind, name),
        None => format!("{}/{}", kind, name),
    }
}

/// Built-in kinds that never live in a namespace
fn is_cluster_scoped(kind: &str) -> bool {
    matches!(
        kind,
        "CustomResourceDefinition"
            | "Namespace"
            | "ClusterRole"
            | "ClusterRoleBinding"
            | "PersistentVolume"
            | "StorageClass"
            | "IngressClass"
    )
}

/// Parse a manifest into objects sorted for creation. Empty documents
/// are skipped; each object needs `apiVersion`, `kind` and `metadata.name`.
pub fn parse_manifest(manifest: &str) -> Result<Vec<ManifestObject>> {
    let mut objects = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(manifest).enumerate() {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| {
            KubeError::InvalidManifest(format!("document {}: {}", index, e))
        })?;
        if value.is_null() {
            continue;
        }

        let object: DynamicObject = serde_yaml::from_value(value).map_err(|e| {
            KubeError::InvalidManifest(format!("document {}: {}", index, e))
        })?;
        let type_meta = object.types.as_ref().ok_or_else(|| {
            KubeError::InvalidManifest(format!("document {}: missing apiVersion or kind", index))
        })?;
        if object.metadata.name.is_none() {
            return Err(KubeError::InvalidManifest(format!(
                "document {}: {} is missing metadata.name",
                index, type_meta.kind
            )));
        }

        let gvk = gvk_from_type_meta(type_meta);
        objects.push(ManifestObject { object, gvk });
    }

    // Stable, so template order is kept within a category.
    objects.sort_by_key(|o| ApplyOrder::for_kind(&o.gvk.kind));
    Ok(objects)
}

/// Convert TypeMeta to GroupVersionKind
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}

/// Server-Side Apply against a live cluster
pub struct ClusterApplier {
    client: Client,
    discovery: Discovery,
}

impl ClusterApplier {
    /// Create an applier, running API discovery once
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self { client, discovery })
    }

    fn resolve(&self, object: &ManifestObject) -> Result<(ApiResource, ApiCapabilities)> {
        self.discovery.resolve_gvk(&object.gvk).ok_or_else(|| {
            KubeError::InvalidManifest(format!(
                "unknown resource type {}/{} for {}",
                object.gvk.group,
                object.gvk.kind,
                object.name()
            ))
        })
    }

    async fn apply_one(
        &self,
        namespace: &str,
        object: &ManifestObject,
        ctx: &OperationContext,
    ) -> Result<String> {
        let (resource, capabilities) = self.resolve(object)?;

        let mut obj = object.object.clone();
        let api: Api<DynamicObject> = if capabilities.scope == Scope::Namespaced {
            let ns = obj
                .metadata
                .namespace
                .get_or_insert_with(|| namespace.to_string())
                .clone();
            Api::namespaced_with(self.client.clone(), &ns, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        };

        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;

        let name = object.name().to_string();
        ctx.run(api.patch(&name, &params, &Patch::Apply(&obj)))
            .await?
            .map_err(|e| {
                KubeError::ApplyFailed(format!("{}: {}", object.display_name(), e))
            })?;

        Ok(describe(&obj, &object.gvk.kind))
    }
}

#[async_trait]
impl ManifestApplier for ClusterApplier {
    async fn apply(
        &self,
        namespace: &str,
        manifest: &str,
        ctx: &OperationContext,
    ) -> Result<ApplySummary> {
        let objects = parse_manifest(manifest)?;
        let mut summary = ApplySummary::default();
        let mut failed = Vec::new();

        for object in &objects {
            match self.apply_one(namespace, object, ctx).await {
                Ok(name) => {
                    tracing::info!(resource = %name, "applied");
                    summary.applied.push(name);
                }
                Err(KubeError::Interrupted(reason)) => return Err(KubeError::Interrupted(reason)),
                Err(e) => {
                    tracing::warn!(resource = %object.display_name(), error = %e, "apply failed");
                    failed.push(e.to_string());
                }
            }
        }

        if !failed.is_empty() {
            return Err(KubeError::ApplyFailed(failed.join("; ")));
        }
        Ok(summary)
    }
}

/// Validates and orders documents, applies nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunApplier;

#[async_trait]
impl ManifestApplier for DryRunApplier {
    async fn apply(
        &self,
        namespace: &str,
        manifest: &str,
        ctx: &OperationContext,
    ) -> Result<ApplySummary> {
        ctx.check()?;
        let mut summary = ApplySummary::default();

        for mut object in parse_manifest(manifest)? {
            // Without discovery, custom cluster-scoped kinds are shown namespaced.
            if object.object.metadata.namespace.is_none() && !is_cluster_scoped(&object.gvk.kind) {
                object.object.metadata.namespace = Some(namespace.to_string());
            }
            let name = object.display_name();
            tracing::info!(resource = %name, "would apply (dry run)");
            summary.applied.push(name);
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"---
# Source: web/templates/deployment.yaml
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
---
# Source: web/templates/configmap.yaml
apiVersion: v1
kind: ConfigMap
metadata:
  name: web-config
---
---
apiVersion: v1
kind: Namespace
metadata:
  name: web-system
"#;

    #[test]
    fn test_apply_order() {
        assert!(ApplyOrder::Crd < ApplyOrder::Namespace);
        assert!(ApplyOrder::Namespace < ApplyOrder::ClusterRbac);
        assert!(ApplyOrder::Config < ApplyOrder::Workload);
        assert_eq!(ApplyOrder::for_kind("Widget"), ApplyOrder::Other);
    }

    #[test]
    fn test_parse_manifest_sorts_and_skips_empty() {
        let objects = parse_manifest(MANIFEST).unwrap();
        let kinds: Vec<&str> = objects.iter().map(|o| o.gvk.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Namespace", "ConfigMap", "Deployment"]);
        assert_eq!(objects[2].gvk.group, "apps");
    }

    #[test]
    fn test_parse_manifest_requires_name() {
        let err = parse_manifest("apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n").unwrap_err();
        assert!(matches!(err, KubeError::InvalidManifest(_)));
    }

    #[test]
    fn test_gvk_from_type_meta() {
        let gvk = gvk_from_type_meta(&TypeMeta {
            api_version: "networking.k8s.io/v1".to_string(),
            kind: "Ingress".to_string(),
        });
        assert_eq!(gvk.group, "networking.k8s.io");
        assert_eq!(gvk.version, "v1");

        let core = gvk_from_type_meta(&TypeMeta {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
        });
        assert_eq!(core.group, "");
    }

    #[tokio::test]
    async fn test_dry_run_applier() {
        let summary = DryRunApplier
            .apply("prod", MANIFEST, &OperationContext::new())
            .await
            .unwrap();

        assert_eq!(
            summary.applied,
            vec![
                "Namespace/web-system",
                "prod/ConfigMap/web-config",
                "prod/Deployment/web"
            ]
        );
    }

    #[tokio::test]
    async fn test_dry_run_respects_cancellation() {
        let ctx = OperationContext::new();
        ctx.cancel();

        let err = DryRunApplier.apply("prod", MANIFEST, &ctx).await.unwrap_err();
        assert!(matches!(err, KubeError::Interrupted(_)));
    }
}
