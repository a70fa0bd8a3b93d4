//! Install-or-upgrade reconciliation
//!
//! The [`Reconciler`] asks its [`HistoryLookup`] whether a release already
//! exists and then drives exactly one [`ReleaseRunner`] action:
//!
//! - no history: locate the chart by name alone, merge overrides, install
//! - history: locate the chart with repository and version, merge
//!   overrides, upgrade with install-if-absent
//!
//! Every collaborator failure ends the reconcile immediately. Nothing is
//! retried or rolled back here.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::Instrument;

use crate::cancel::{Interruption, OperationContext};
use crate::chart::ChartPackage;
use crate::error::CoreError;
use crate::release::{ReleaseRecord, ReleaseRequest};
use crate::values::Values;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_STORAGE_DRIVER: &str = "secret";

/// Process-wide settings, fixed for the lifetime of a reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Namespace every managed release lives in
    pub namespace: String,

    /// Identifier of the release storage backend
    pub storage_driver: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            storage_driver: DEFAULT_STORAGE_DRIVER.to_string(),
        }
    }
}

/// Where a release lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseScope {
    pub namespace: String,
    pub release_name: String,
}

impl ReleaseScope {
    pub fn new(namespace: impl Into<String>, release_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            release_name: release_name.into(),
        }
    }
}

impl fmt::Display for ReleaseScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.release_name)
    }
}

/// Read access to recorded release revisions
#[async_trait]
pub trait HistoryLookup: Send + Sync {
    /// Latest recorded revision, or `None` if the release has no history
    async fn latest_revision(
        &self,
        scope: &ReleaseScope,
        ctx: &OperationContext,
    ) -> Result<Option<u32>, BoxError>;
}

/// Finds and loads charts
#[async_trait]
pub trait ChartResolver: Send + Sync {
    /// Locate a chart and return a local path to it.
    /// A `None` version means the latest available.
    async fn locate(
        &self,
        name: &str,
        repository_url: Option<&str>,
        version: Option<&str>,
    ) -> Result<PathBuf, BoxError>;

    /// Load a located chart. `None` means the path held no chart.
    async fn load(&self, path: &Path) -> Result<Option<ChartPackage>, BoxError>;
}

/// Turns raw `key=value` overrides into a values tree
pub trait ValueMerger: Send + Sync {
    fn merge(&self, raw_overrides: &[String]) -> Result<Values, BoxError>;
}

/// Performs releases against a target
#[async_trait]
pub trait ReleaseRunner: Send + Sync {
    async fn install(
        &self,
        scope: &ReleaseScope,
        chart: ChartPackage,
        values: Values,
        ctx: &OperationContext,
    ) -> Result<ReleaseRecord, BoxError>;

    async fn upgrade(
        &self,
        scope: &ReleaseScope,
        chart: ChartPackage,
        values: Values,
        ctx: &OperationContext,
        install_if_absent: bool,
    ) -> Result<ReleaseRecord, BoxError>;
}

/// Progress of a single reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    Start,
    HistoryChecked,
    ChartResolved,
    ValuesMerged,
    Executed,
    Done,
    Failed,
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::HistoryChecked => "history-checked",
            Self::ChartResolved => "chart-resolved",
            Self::ValuesMerged => "values-merged",
            Self::Executed => "executed",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The action chosen from the release history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    Install,
    Upgrade { previous_revision: u32 },
}

impl ReleaseAction {
    pub fn from_latest(latest: Option<u32>) -> Self {
        match latest {
            None => Self::Install,
            Some(previous_revision) => Self::Upgrade { previous_revision },
        }
    }

    /// What to ask the chart resolver for.
    ///
    /// A first install uses the chart name alone; repository URL and
    /// version only apply to upgrades.
    pub fn chart_query<'a>(&self, request: &'a ReleaseRequest) -> ChartQuery<'a> {
        match self {
            Self::Install => ChartQuery {
                name: &request.package_name,
                repository_url: None,
                version: None,
            },
            Self::Upgrade { .. } => ChartQuery {
                name: &request.package_name,
                repository_url: request.repository_url.as_deref(),
                version: request.version.as_deref(),
            },
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Install => "installed",
            Self::Upgrade { .. } => "upgraded",
        }
    }
}

impl fmt::Display for ReleaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => f.write_str("install"),
            Self::Upgrade { .. } => f.write_str("upgrade"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartQuery<'a> {
    pub name: &'a str,
    pub repository_url: Option<&'a str>,
    pub version: Option<&'a str>,
}

/// Which part of a reconcile failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Lookup,
    Resolution,
    ValueMerge,
    Execution,
    Cancellation,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{0}")]
    InvalidRequest(#[source] CoreError),

    #[error("failed to read history of release '{release}': {source}")]
    History { release: String, source: BoxError },

    #[error("failed to resolve chart '{chart}': {source}")]
    Resolution { chart: String, source: BoxError },

    #[error("chart '{chart}' located at {} could not be loaded", .path.display())]
    EmptyChart { chart: String, path: PathBuf },

    #[error("failed to merge values: {source}")]
    ValueMerge { source: BoxError },

    #[error("{action} of release '{release}' failed: {source}")]
    Execution {
        action: ReleaseAction,
        release: String,
        source: BoxError,
    },

    #[error("reconcile interrupted at {state}: {reason}")]
    Cancelled {
        state: ReconcileState,
        reason: Interruption,
    },
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::History { .. } => ErrorKind::Lookup,
            Self::Resolution { .. } | Self::EmptyChart { .. } => ErrorKind::Resolution,
            Self::ValueMerge { .. } => ErrorKind::ValueMerge,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Cancelled { .. } => ErrorKind::Cancellation,
        }
    }
}

/// Decides between install and upgrade and carries it out
pub struct Reconciler<H, C, V, R> {
    config: ReconcilerConfig,
    history: H,
    charts: C,
    values: V,
    runner: R,
}

impl<H, C, V, R> Reconciler<H, C, V, R>
where
    H: HistoryLookup,
    C: ChartResolver,
    V: ValueMerger,
    R: ReleaseRunner,
{
    pub fn new(config: ReconcilerConfig, history: H, charts: C, values: V, runner: R) -> Self {
        Self {
            config,
            history,
            charts,
            values,
            runner,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Install or upgrade the requested release
    pub async fn reconcile(
        &self,
        request: &ReleaseRequest,
        ctx: &OperationContext,
    ) -> Result<ReleaseRecord, ReconcileError> {
        let span = tracing::info_span!(
            "reconcile",
            release = %request.release_name,
            namespace = %self.config.namespace,
            storage = %self.config.storage_driver,
        );

        async {
            let mut state = ReconcileState::Start;
            let result = self.drive(request, ctx, &mut state).await;
            if let Err(err) = &result {
                tracing::debug!(
                    from = %state,
                    to = %ReconcileState::Failed,
                    error = %err,
                    "transition"
                );
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        request: &ReleaseRequest,
        ctx: &OperationContext,
        state: &mut ReconcileState,
    ) -> Result<ReleaseRecord, ReconcileError> {
        request.validate().map_err(ReconcileError::InvalidRequest)?;
        let scope = ReleaseScope::new(&self.config.namespace, &request.release_name);

        let latest = step(*state, ctx, self.history.latest_revision(&scope, ctx), |source| {
            ReconcileError::History {
                release: request.release_name.clone(),
                source,
            }
        })
        .await?;
        advance(state, ReconcileState::HistoryChecked);

        let action = ReleaseAction::from_latest(latest);
        match action {
            ReleaseAction::Install => {
                tracing::info!("release has no history, installing");
                if request.version.is_some() || request.repository_url.is_some() {
                    tracing::warn!(
                        version = request.version.as_deref().unwrap_or(""),
                        repository = request.repository_url.as_deref().unwrap_or(""),
                        "first install ignores the requested version and repository"
                    );
                }
            }
            ReleaseAction::Upgrade { previous_revision } => {
                tracing::info!(previous_revision, "release exists, upgrading");
            }
        }

        let query = action.chart_query(request);
        let resolution_error = |source: BoxError| ReconcileError::Resolution {
            chart: query.name.to_string(),
            source,
        };
        let path = step(
            *state,
            ctx,
            self.charts.locate(query.name, query.repository_url, query.version),
            resolution_error,
        )
        .await?;
        let chart = step(*state, ctx, self.charts.load(&path), resolution_error)
            .await?
            .ok_or_else(|| ReconcileError::EmptyChart {
                chart: query.name.to_string(),
                path: path.clone(),
            })?;
        tracing::debug!(
            chart = %chart.name(),
            version = %chart.metadata.version,
            path = %path.display(),
            "chart resolved"
        );
        advance(state, ReconcileState::ChartResolved);

        interrupt_check(*state, ctx)?;
        let values = self
            .values
            .merge(&request.overrides)
            .map_err(|source| ReconcileError::ValueMerge { source })?;
        advance(state, ReconcileState::ValuesMerged);

        let execution_error = |source: BoxError| ReconcileError::Execution {
            action,
            release: request.release_name.clone(),
            source,
        };
        let record = match action {
            ReleaseAction::Install => {
                step(
                    *state,
                    ctx,
                    self.runner.install(&scope, chart, values, ctx),
                    execution_error,
                )
                .await?
            }
            ReleaseAction::Upgrade { .. } => {
                step(
                    *state,
                    ctx,
                    self.runner.upgrade(&scope, chart, values, ctx, true),
                    execution_error,
                )
                .await?
            }
        };
        advance(state, ReconcileState::Executed);

        tracing::info!(
            revision = record.revision,
            status = %record.status,
            "release {}",
            action.past_tense()
        );
        advance(state, ReconcileState::Done);
        Ok(record)
    }
}

fn advance(state: &mut ReconcileState, next: ReconcileState) {
    tracing::debug!(from = %state, to = %next, "transition");
    *state = next;
}

fn interrupt_check(state: ReconcileState, ctx: &OperationContext) -> Result<(), ReconcileError> {
    ctx.check()
        .map_err(|reason| ReconcileError::Cancelled { state, reason })
}

/// Await a collaborator call under the context.
///
/// A failure observed after the context was interrupted is reported as an
/// interruption rather than as the collaborator's own error.
async fn step<T, F, E>(
    state: ReconcileState,
    ctx: &OperationContext,
    fut: F,
    on_error: E,
) -> Result<T, ReconcileError>
where
    F: Future<Output = Result<T, BoxError>>,
    E: FnOnce(BoxError) -> ReconcileError,
{
    match ctx.run(fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => match ctx.interruption() {
            Some(reason) => Err(ReconcileError::Cancelled { state, reason }),
            None => Err(on_error(source)),
        },
        Err(reason) => Err(ReconcileError::Cancelled { state, reason }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::ReleaseStatus;
    use crate::values::SetValuesMerger;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        History(String),
        Locate {
            name: String,
            repository_url: Option<String>,
            version: Option<String>,
        },
        Load,
        Merge,
        Install { release: String, values: serde_json::Value },
        Upgrade { release: String, install_if_absent: bool },
    }

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<Call>>>,
        latest: Arc<Mutex<Option<u32>>>,
    }

    impl Recorder {
        fn push(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn executions(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Install { .. } | Call::Upgrade { .. }))
                .count()
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum HistoryMode {
        Normal,
        Fail,
        CancelAndHang,
    }

    struct FakeHistory {
        rec: Recorder,
        mode: HistoryMode,
    }

    #[async_trait]
    impl HistoryLookup for FakeHistory {
        async fn latest_revision(
            &self,
            scope: &ReleaseScope,
            ctx: &OperationContext,
        ) -> Result<Option<u32>, BoxError> {
            self.rec.push(Call::History(scope.release_name.clone()));
            let latest = *self.rec.latest.lock().unwrap();
            match self.mode {
                HistoryMode::Normal => Ok(latest),
                HistoryMode::Fail => Err("storage unreachable".into()),
                HistoryMode::CancelAndHang => {
                    ctx.cancel();
                    std::future::pending().await
                }
            }
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum ResolverMode {
        Normal,
        FailLocate,
        LoadNothing,
    }

    struct FakeResolver {
        rec: Recorder,
        mode: ResolverMode,
    }

    fn chart(name: &str) -> ChartPackage {
        ChartPackage {
            metadata: serde_yaml::from_str(&format!(
                "apiVersion: v2\nname: {name}\nversion: 1.0.0\n"
            ))
            .unwrap(),
            default_values: Values::new(),
            templates: BTreeMap::new(),
            notes: None,
            subcharts: Vec::new(),
            source: PathBuf::from(name),
        }
    }

    #[async_trait]
    impl ChartResolver for FakeResolver {
        async fn locate(
            &self,
            name: &str,
            repository_url: Option<&str>,
            version: Option<&str>,
        ) -> Result<PathBuf, BoxError> {
            self.rec.push(Call::Locate {
                name: name.to_string(),
                repository_url: repository_url.map(str::to_string),
                version: version.map(str::to_string),
            });
            if self.mode == ResolverMode::FailLocate {
                return Err("no such chart".into());
            }
            Ok(PathBuf::from(format!("/charts/{name}")))
        }

        async fn load(&self, path: &Path) -> Result<Option<ChartPackage>, BoxError> {
            self.rec.push(Call::Load);
            if self.mode == ResolverMode::LoadNothing {
                return Ok(None);
            }
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            Ok(Some(chart(&name)))
        }
    }

    struct RecordingMerger {
        rec: Recorder,
    }

    impl ValueMerger for RecordingMerger {
        fn merge(&self, raw_overrides: &[String]) -> Result<Values, BoxError> {
            self.rec.push(Call::Merge);
            SetValuesMerger.merge(raw_overrides)
        }
    }

    struct FakeRunner {
        rec: Recorder,
    }

    #[async_trait]
    impl ReleaseRunner for FakeRunner {
        async fn install(
            &self,
            scope: &ReleaseScope,
            _chart: ChartPackage,
            values: Values,
            _ctx: &OperationContext,
        ) -> Result<ReleaseRecord, BoxError> {
            self.rec.push(Call::Install {
                release: scope.release_name.clone(),
                values: values.into_inner(),
            });
            *self.rec.latest.lock().unwrap() = Some(1);
            Ok(ReleaseRecord {
                name: scope.release_name.clone(),
                revision: 1,
                status: ReleaseStatus::Deployed,
            })
        }

        async fn upgrade(
            &self,
            scope: &ReleaseScope,
            _chart: ChartPackage,
            _values: Values,
            _ctx: &OperationContext,
            install_if_absent: bool,
        ) -> Result<ReleaseRecord, BoxError> {
            self.rec.push(Call::Upgrade {
                release: scope.release_name.clone(),
                install_if_absent,
            });
            let mut latest = self.rec.latest.lock().unwrap();
            let revision = latest.map(|r| r + 1).unwrap_or(1);
            *latest = Some(revision);
            Ok(ReleaseRecord {
                name: scope.release_name.clone(),
                revision,
                status: ReleaseStatus::Deployed,
            })
        }
    }

    type TestReconciler = Reconciler<FakeHistory, FakeResolver, RecordingMerger, FakeRunner>;

    fn reconciler(rec: &Recorder, history: HistoryMode, resolver: ResolverMode) -> TestReconciler {
        Reconciler::new(
            ReconcilerConfig::default(),
            FakeHistory {
                rec: rec.clone(),
                mode: history,
            },
            FakeResolver {
                rec: rec.clone(),
                mode: resolver,
            },
            RecordingMerger { rec: rec.clone() },
            FakeRunner { rec: rec.clone() },
        )
    }

    fn request() -> ReleaseRequest {
        ReleaseRequest::new("widgets", "demo")
            .with_repository("https://charts.example.com")
            .with_version("2.0.0")
    }

    #[tokio::test]
    async fn test_first_install_ignores_version_and_repository() {
        let rec = Recorder::default();
        let r = reconciler(&rec, HistoryMode::Normal, ResolverMode::Normal);

        let record = r.reconcile(&request(), &OperationContext::new()).await.unwrap();

        assert_eq!(record.name, "demo");
        assert_eq!(record.revision, 1);
        assert_eq!(
            rec.calls(),
            vec![
                Call::History("demo".to_string()),
                Call::Locate {
                    name: "widgets".to_string(),
                    repository_url: None,
                    version: None,
                },
                Call::Load,
                Call::Merge,
                Call::Install {
                    release: "demo".to_string(),
                    values: json!({}),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_existing_release_upgrades_pinned_version() {
        let rec = Recorder::default();
        *rec.latest.lock().unwrap() = Some(3);
        let r = reconciler(&rec, HistoryMode::Normal, ResolverMode::Normal);

        let record = r.reconcile(&request(), &OperationContext::new()).await.unwrap();

        assert_eq!(record.name, "demo");
        assert_eq!(record.revision, 4);
        let calls = rec.calls();
        assert!(calls.contains(&Call::Locate {
            name: "widgets".to_string(),
            repository_url: Some("https://charts.example.com".to_string()),
            version: Some("2.0.0".to_string()),
        }));
        assert_eq!(
            calls.last(),
            Some(&Call::Upgrade {
                release: "demo".to_string(),
                install_if_absent: true,
            })
        );
        assert_eq!(rec.executions(), 1);
    }

    #[tokio::test]
    async fn test_revisions_increase_by_one() {
        let rec = Recorder::default();
        let r = reconciler(&rec, HistoryMode::Normal, ResolverMode::Normal);
        let ctx = OperationContext::new();

        let mut revisions = Vec::new();
        for _ in 0..3 {
            revisions.push(r.reconcile(&request(), &ctx).await.unwrap().revision);
        }

        assert_eq!(revisions, vec![1, 2, 3]);
        assert_eq!(rec.executions(), 3);
    }

    #[tokio::test]
    async fn test_overrides_reach_runner_as_strings() {
        let rec = Recorder::default();
        let r = reconciler(&rec, HistoryMode::Normal, ResolverMode::Normal);
        let req = request().with_overrides(vec!["a=1".to_string(), "b=2".to_string()]);

        r.reconcile(&req, &OperationContext::new()).await.unwrap();

        assert!(rec.calls().contains(&Call::Install {
            release: "demo".to_string(),
            values: json!({"a": "1", "b": "2"}),
        }));
    }

    #[tokio::test]
    async fn test_locate_failure_stops_before_merge() {
        let rec = Recorder::default();
        let r = reconciler(&rec, HistoryMode::Normal, ResolverMode::FailLocate);

        let err = r.reconcile(&request(), &OperationContext::new()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert!(!rec.calls().contains(&Call::Load));
        assert!(!rec.calls().contains(&Call::Merge));
        assert_eq!(rec.executions(), 0);
    }

    #[tokio::test]
    async fn test_empty_chart_is_resolution_error() {
        let rec = Recorder::default();
        let r = reconciler(&rec, HistoryMode::Normal, ResolverMode::LoadNothing);

        let err = r.reconcile(&request(), &OperationContext::new()).await.unwrap_err();

        assert!(matches!(err, ReconcileError::EmptyChart { .. }));
        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert!(!rec.calls().contains(&Call::Merge));
        assert_eq!(rec.executions(), 0);
    }

    #[tokio::test]
    async fn test_merge_failure_stops_before_execution() {
        let rec = Recorder::default();
        let r = reconciler(&rec, HistoryMode::Normal, ResolverMode::Normal);
        let req = request().with_overrides(vec!["broken".to_string()]);

        let err = r.reconcile(&req, &OperationContext::new()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ValueMerge);
        assert!(rec.calls().contains(&Call::Merge));
        assert_eq!(rec.executions(), 0);
    }

    #[tokio::test]
    async fn test_history_failure_is_lookup_error() {
        let rec = Recorder::default();
        let r = reconciler(&rec, HistoryMode::Fail, ResolverMode::Normal);

        let err = r.reconcile(&request(), &OperationContext::new()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Lookup);
        assert_eq!(rec.calls(), vec![Call::History("demo".to_string())]);
    }

    #[tokio::test]
    async fn test_cancel_during_history_lookup() {
        let rec = Recorder::default();
        let r = reconciler(&rec, HistoryMode::CancelAndHang, ResolverMode::Normal);

        let err = r.reconcile(&request(), &OperationContext::new()).await.unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::Cancelled {
                state: ReconcileState::Start,
                reason: Interruption::Cancelled,
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Cancellation);
        assert_eq!(rec.executions(), 0);
    }

    #[tokio::test]
    async fn test_invalid_release_name_touches_nothing() {
        let rec = Recorder::default();
        let r = reconciler(&rec, HistoryMode::Normal, ResolverMode::Normal);
        let req = ReleaseRequest::new("widgets", "Not_Valid");

        let err = r.reconcile(&req, &OperationContext::new()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(rec.calls().is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.storage_driver, "secret");
    }
}
