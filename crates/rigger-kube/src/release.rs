//! Stored release revisions and their state machine

use chrono::{DateTime, Utc};
use rigger_core::{ChartMetadata, ReleaseRecord, ReleaseStatus, Values};
use serde::{Deserialize, Serialize};

/// Prefix of every storage object name
pub const STORAGE_KEY_PREFIX: &str = "sh.rigger.release.v1";

/// Name of the storage object holding one revision
pub fn storage_key(name: &str, version: u32) -> String {
    format!("{}.{}.v{}", STORAGE_KEY_PREFIX, name, version)
}

/// One revision of a release as persisted by a storage driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRelease {
    pub name: String,

    pub namespace: String,

    /// Revision number, starting at 1
    pub version: u32,

    pub state: ReleaseState,

    /// Chart metadata at deploy time
    pub chart: ChartMetadata,

    /// Coalesced values the manifest was rendered with
    pub values: Values,

    /// Rendered manifest (all documents)
    pub manifest: String,

    #[serde(default)]
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl StoredRelease {
    /// First revision of a new release
    pub fn for_install(
        name: String,
        namespace: String,
        chart: ChartMetadata,
        values: Values,
        manifest: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            name,
            namespace,
            version: 1,
            state: ReleaseState::PendingInstall { started_at: now },
            chart,
            values,
            manifest,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Next revision after `previous`
    pub fn for_upgrade(
        previous: &StoredRelease,
        chart: ChartMetadata,
        values: Values,
        manifest: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: previous.name.clone(),
            namespace: previous.namespace.clone(),
            version: previous.version + 1,
            state: ReleaseState::PendingUpgrade {
                started_at: now,
                previous_version: previous.version,
            },
            chart,
            values,
            manifest,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn storage_key(&self) -> String {
        storage_key(&self.name, self.version)
    }

    pub fn mark_deployed(&mut self) {
        self.state = ReleaseState::Deployed;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        let now = Utc::now();
        self.state = ReleaseState::Failed {
            reason: reason.into(),
            failed_at: now,
        };
        self.updated_at = now;
    }

    /// Replaced by a newer revision
    pub fn mark_superseded(&mut self) {
        self.state = ReleaseState::Superseded;
        self.updated_at = Utc::now();
    }

    /// Summary handed back to the reconciler
    pub fn to_record(&self) -> ReleaseRecord {
        ReleaseRecord {
            name: self.name.clone(),
            revision: self.version,
            status: self.state.status(),
        }
    }
}

/// Release state, with timing for pending operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ReleaseState {
    Deployed,

    Failed {
        reason: String,
        failed_at: DateTime<Utc>,
    },

    Superseded,

    PendingInstall {
        started_at: DateTime<Utc>,
    },

    PendingUpgrade {
        started_at: DateTime<Utc>,
        previous_version: u32,
    },
}

impl ReleaseState {
    pub fn is_pending(&self) -> bool {
        self.status().is_pending()
    }

    pub fn status(&self) -> ReleaseStatus {
        match self {
            Self::Deployed => ReleaseStatus::Deployed,
            Self::Failed { .. } => ReleaseStatus::Failed,
            Self::Superseded => ReleaseStatus::Superseded,
            Self::PendingInstall { .. } => ReleaseStatus::PendingInstall,
            Self::PendingUpgrade { .. } => ReleaseStatus::PendingUpgrade,
        }
    }
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { reason, .. } => write!(f, "failed: {}", reason),
            other => write!(f, "{}", other.status()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn chart_metadata() -> ChartMetadata {
        serde_yaml::from_str("apiVersion: v2\nname: web\nversion: 1.2.3\n").unwrap()
    }

    pub(crate) fn release(name: &str, version: u32) -> StoredRelease {
        let mut release = StoredRelease::for_install(
            name.to_string(),
            "default".to_string(),
            chart_metadata(),
            Values::from_yaml("replicas: 2").unwrap(),
            "apiVersion: v1\nkind: ConfigMap\n".to_string(),
        );
        release.version = version;
        release.mark_deployed();
        release
    }

    #[test]
    fn test_storage_key_format() {
        assert_eq!(storage_key("myapp", 3), "sh.rigger.release.v1.myapp.v3");
        assert_eq!(release("web", 1).storage_key(), "sh.rigger.release.v1.web.v1");
    }

    #[test]
    fn test_upgrade_revision_follows_previous() {
        let previous = release("web", 4);
        let next =
            StoredRelease::for_upgrade(&previous, chart_metadata(), Values::new(), String::new());

        assert_eq!(next.version, 5);
        assert!(next.state.is_pending());
        assert!(matches!(
            next.state,
            ReleaseState::PendingUpgrade { previous_version: 4, .. }
        ));
    }

    #[test]
    fn test_state_serializes_tagged() {
        let mut r = release("web", 1);
        r.mark_failed("boom");

        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["state"]["status"], "failed");
        assert_eq!(json["state"]["reason"], "boom");
        assert_eq!(r.state.to_string(), "failed: boom");
    }

    #[test]
    fn test_to_record() {
        let record = release("web", 2).to_record();
        assert_eq!(record.revision, 2);
        assert_eq!(record.status, ReleaseStatus::Deployed);
    }
}
