//! Rigger chart location
//!
//! Turns a chart reference into a chart on local disk:
//!
//! - **Local charts**: a directory or `.tgz` archive path is used as is
//! - **HTTP repositories**: `index.yaml` lookup with SemVer selection,
//!   digest-checked downloads into a local cache
//! - **Aliases**: `alias/chart` names resolved through `repositories.yaml`
//!
//! [`RepoChartResolver`] plugs all of this into the reconciler as its
//! [`rigger_core::ChartResolver`].

pub mod config;
pub mod error;
pub mod http;
pub mod index;
pub mod resolver;

pub use config::{Repository, RepositoryConfig};
pub use error::{RepoError, Result};
pub use http::HttpRepository;
pub use index::{ChartEntry, RepositoryIndex};
pub use resolver::RepoChartResolver;
