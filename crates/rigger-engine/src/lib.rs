//! Rigger Engine - chart templating for Kubernetes
//!
//! A MiniJinja environment with Kubernetes-oriented filters (`toyaml`,
//! `b64encode`, `nindent`, ...) that renders a chart and its enabled
//! subcharts into manifests.

pub mod engine;
pub mod error;
pub mod filters;
pub mod functions;

pub use engine::{Engine, EngineBuilder, RenderResult};
pub use error::{EngineError, TemplateError, TemplateErrorKind};
