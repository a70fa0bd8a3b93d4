//! Rigger Core - types and the install-or-upgrade decision
//!
//! - `ChartPackage`: a chart loaded into memory from a directory or archive
//! - `Values`: configuration values with deep merge support
//! - `ReleaseRequest` / `ReleaseRecord`: what was asked for and what happened
//! - `OperationContext`: cancellation and deadlines
//! - `Reconciler`: chooses install or upgrade and drives the collaborators

pub mod archive;
pub mod cancel;
pub mod chart;
pub mod context;
pub mod error;
pub mod reconcile;
pub mod release;
pub mod values;

pub use cancel::{Interruption, OperationContext};
pub use chart::{ChartDependency, ChartMetadata, ChartPackage, ChartType};
pub use context::{Capabilities, KubeVersion, TemplateContext};
pub use error::CoreError;
pub use reconcile::{
    BoxError, ChartResolver, ErrorKind, HistoryLookup, ReconcileError, ReconcileState,
    Reconciler, ReconcilerConfig, ReleaseAction, ReleaseRunner, ReleaseScope, ValueMerger,
};
pub use release::{ReleaseInfo, ReleaseRecord, ReleaseRequest, ReleaseStatus};
pub use values::{SetValuesMerger, Values, parse_overrides};
