//! Chart definition and loading
//!
//! A chart is loaded entirely into memory, either from an unpacked
//! directory or from a `.tgz` archive. Subcharts under `charts/` are loaded
//! recursively in both layouts.

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::archive::{self, ArchiveFiles};
use crate::error::{CoreError, Result};
use crate::values::Values;

pub const CHART_FILE: &str = "Chart.yaml";
pub const VALUES_FILE: &str = "values.yaml";
const TEMPLATES_DIR: &str = "templates/";
const CHARTS_DIR: &str = "charts/";
const NOTES_FILE: &str = "NOTES.txt";

/// Contents of `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// `v1` or `v2`
    pub api_version: String,

    pub name: String,

    /// Chart version (required, SemVer)
    #[serde(with = "version_serde")]
    pub version: Version,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Kubernetes version constraint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_version: Option<String>,

    #[serde(default, rename = "type")]
    pub chart_type: ChartType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ChartDependency>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Application,
    Library,
}

/// A dependency declared in `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDependency {
    pub name: String,

    /// Version constraint (semver)
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub repository: Option<String>,

    /// Comma-separated dot paths evaluated against the parent's values
    #[serde(default)]
    pub condition: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Alias name (overrides dependency name in values and templates)
    #[serde(default)]
    pub alias: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ChartDependency {
    /// Get the effective name (alias if set, otherwise name)
    #[inline]
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Whether the dependency is active for the given values
    pub fn is_enabled(&self, values: &Values) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.condition {
            Some(condition) => evaluate_condition(condition, values),
            None => true,
        }
    }
}

/// Evaluate a condition: comma-separated dot paths, the first one that
/// resolves decides. Nothing resolving is false.
fn evaluate_condition(condition: &str, values: &Values) -> bool {
    let resolved = condition
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .find_map(|path| values.get(path).filter(|v| !v.is_null()));

    match resolved {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::String(s)) => !s.is_empty() && s != "false" && s != "0",
        Some(JsonValue::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(JsonValue::Array(a)) => !a.is_empty(),
        Some(JsonValue::Object(o)) => !o.is_empty(),
        Some(JsonValue::Null) | None => false,
    }
}

/// A chart fully loaded into memory
#[derive(Debug, Clone)]
pub struct ChartPackage {
    pub metadata: ChartMetadata,

    /// Contents of `values.yaml`
    pub default_values: Values,

    /// Template sources keyed by path relative to `templates/`
    pub templates: BTreeMap<String, String>,

    /// Raw `templates/NOTES.txt`
    pub notes: Option<String>,

    pub subcharts: Vec<ChartPackage>,

    /// Where the chart was loaded from
    pub source: PathBuf,
}

impl ChartPackage {
    /// Load a chart from a directory or a `.tgz` archive
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(CoreError::ChartNotFound {
                path: path.display().to_string(),
            });
        }

        let files = if path.is_dir() {
            read_directory(path)?
        } else if archive::is_chart_archive(path) {
            archive::read_archive_file(path)?
        } else {
            return Err(CoreError::InvalidChart {
                message: format!(
                    "{} is neither a chart directory nor a .tgz archive",
                    path.display()
                ),
            });
        };

        Self::from_files(path.to_path_buf(), files)
    }

    /// Build a chart from chart-relative file contents
    pub fn from_files(source: PathBuf, files: ArchiveFiles) -> Result<Self> {
        let chart_yaml = files.get(CHART_FILE).ok_or_else(|| CoreError::InvalidChart {
            message: format!("{} not found in {}", CHART_FILE, source.display()),
        })?;
        let metadata: ChartMetadata = serde_yaml::from_slice(chart_yaml)?;
        validate_metadata(&metadata, &source)?;

        let default_values = match files.get(VALUES_FILE) {
            Some(bytes) => Values::from_yaml(&utf8(VALUES_FILE, bytes)?)?,
            None => Values::new(),
        };

        let mut templates = BTreeMap::new();
        let mut notes = None;
        let mut nested: BTreeMap<String, ArchiveFiles> = BTreeMap::new();
        let mut subcharts = Vec::new();

        for (name, bytes) in &files {
            if let Some(template) = name.strip_prefix(TEMPLATES_DIR) {
                let content = utf8(name, bytes)?;
                if template == NOTES_FILE {
                    notes = Some(content);
                } else {
                    templates.insert(template.to_string(), content);
                }
            } else if let Some(rest) = name.strip_prefix(CHARTS_DIR) {
                match rest.split_once('/') {
                    Some((dir, inner)) => {
                        nested
                            .entry(dir.to_string())
                            .or_default()
                            .insert(inner.to_string(), bytes.clone());
                    }
                    None if archive::is_chart_archive(Path::new(rest)) => {
                        let inner = archive::read_archive(bytes)?;
                        subcharts.push(Self::from_files(source.join(name), inner)?);
                    }
                    None => {}
                }
            }
        }

        for (dir, inner) in nested {
            subcharts.push(Self::from_files(source.join(CHARTS_DIR).join(dir), inner)?);
        }

        Ok(Self {
            metadata,
            default_values,
            templates,
            notes,
            subcharts,
            source,
        })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Library charts only provide helpers and cannot be released
    pub fn ensure_installable(&self) -> Result<()> {
        if self.metadata.chart_type == ChartType::Library {
            return Err(CoreError::InvalidChart {
                message: format!("library chart '{}' is not installable", self.name()),
            });
        }
        Ok(())
    }

    /// Name under which a subchart sees its values: the dependency alias
    /// if one is declared, otherwise the subchart's own name.
    pub fn scope_name<'a>(&'a self, subchart: &'a ChartPackage) -> &'a str {
        self.dependency_for(subchart)
            .map(ChartDependency::effective_name)
            .unwrap_or(subchart.name())
    }

    fn dependency_for(&self, subchart: &ChartPackage) -> Option<&ChartDependency> {
        self.metadata
            .dependencies
            .iter()
            .find(|d| d.name == subchart.metadata.name)
    }

    /// Subcharts enabled for the given (coalesced) values, with their scope names
    pub fn enabled_subcharts<'a>(&'a self, values: &Values) -> Vec<(&'a str, &'a ChartPackage)> {
        self.subcharts
            .iter()
            .filter(|sub| {
                self.dependency_for(sub)
                    .map(|dep| dep.is_enabled(values))
                    .unwrap_or(true)
            })
            .map(|sub| (self.scope_name(sub), sub))
            .collect()
    }

    /// Final values for a release: subchart defaults under their scope
    /// names, then this chart's defaults, then the user overrides.
    pub fn coalesce_values(&self, overrides: &Values) -> Values {
        let mut result = Values::new();

        for sub in &self.subcharts {
            let sub_defaults = sub.coalesce_values(&Values::new());
            let mut wrapped = serde_json::Map::new();
            wrapped.insert(self.scope_name(sub).to_string(), sub_defaults.into_inner());
            result.merge(&Values(JsonValue::Object(wrapped)));
        }

        result.merge(&self.default_values);
        result.merge(overrides);
        result
    }
}

fn validate_metadata(metadata: &ChartMetadata, source: &Path) -> Result<()> {
    if !matches!(metadata.api_version.as_str(), "v1" | "v2") {
        return Err(CoreError::InvalidChart {
            message: format!(
                "unsupported apiVersion '{}' in {}",
                metadata.api_version,
                source.display()
            ),
        });
    }
    if metadata.name.trim().is_empty() {
        return Err(CoreError::InvalidChart {
            message: format!("chart name is empty in {}", source.display()),
        });
    }
    Ok(())
}

fn utf8(name: &str, bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CoreError::InvalidChart {
        message: format!("{} is not valid UTF-8", name),
    })
}

fn read_directory(root: &Path) -> Result<ArchiveFiles> {
    let mut files = BTreeMap::new();

    for entry in walkdir::WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| CoreError::InvalidChart {
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| CoreError::InvalidChart {
                message: e.to_string(),
            })?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(key, std::fs::read(entry.path())?);
    }

    Ok(files)
}

/// Custom serde for semver::Version
mod version_serde {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(version: &Version, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&version.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Version, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::parse(s.trim_start_matches('v')).map_err(serde::de::Error::custom)
    }
}
