//! Template rendering context

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::chart::ChartMetadata;
use crate::release::ReleaseInfo;
use crate::values::Values;

/// Context available to all templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    /// Coalesced values
    pub values: JsonValue,

    pub release: ReleaseInfo,

    pub chart: ChartInfo,

    pub capabilities: Capabilities,
}

/// Chart information for templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
    pub app_version: Option<String>,
}

impl From<&ChartMetadata> for ChartInfo {
    fn from(meta: &ChartMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            version: meta.version.to_string(),
            app_version: meta.app_version.clone(),
        }
    }
}

/// Cluster capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub kube_version: KubeVersion,
}

/// Kubernetes version info
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeVersion {
    pub version: String,
    pub major: String,
    pub minor: String,
}

impl Default for KubeVersion {
    fn default() -> Self {
        Self::new("1.31.0")
    }
}

impl KubeVersion {
    pub fn new(version: &str) -> Self {
        let version = version.trim_start_matches('v');
        let mut parts = version.split('.');
        let major = parts.next().unwrap_or("1").to_string();
        let minor = parts.next().unwrap_or("31").to_string();

        Self {
            version: format!("v{}", version),
            major,
            minor,
        }
    }
}

impl TemplateContext {
    pub fn new(values: Values, release: ReleaseInfo, chart: &ChartMetadata) -> Self {
        Self {
            values: values.into_inner(),
            release,
            chart: ChartInfo::from(chart),
            capabilities: Capabilities::default(),
        }
    }

    /// Same release and capabilities, different chart and values.
    /// Used to render subcharts.
    pub fn for_subchart(&self, values: Values, chart: &ChartMetadata) -> Self {
        Self {
            values: values.into_inner(),
            release: self.release.clone(),
            chart: ChartInfo::from(chart),
            capabilities: self.capabilities.clone(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kube_version_parsing() {
        let v = KubeVersion::new("v1.29.3");
        assert_eq!(v.version, "v1.29.3");
        assert_eq!(v.major, "1");
        assert_eq!(v.minor, "29");
    }

    #[test]
    fn test_context_serializes_camel_case() {
        let meta: ChartMetadata =
            serde_yaml::from_str("apiVersion: v2\nname: demo\nversion: 1.0.0\nappVersion: \"2\"\n")
                .unwrap();
        let ctx = TemplateContext::new(
            Values::from_yaml("replicas: 3").unwrap(),
            ReleaseInfo::for_install("demo", "default"),
            &meta,
        );

        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["chart"]["appVersion"], "2");
        assert_eq!(json["release"]["isInstall"], true);
        assert_eq!(json["capabilities"]["kubeVersion"]["minor"], "31");
    }
}
