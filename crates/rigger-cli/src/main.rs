//! Rigger CLI - install or upgrade one release from a chart

use clap::Parser;
use rigger_core::reconcile::{DEFAULT_NAMESPACE, DEFAULT_STORAGE_DRIVER};
use rigger_core::{
    Capabilities, OperationContext, ReconcilerConfig, Reconciler, ReleaseRecord, ReleaseRequest,
    SetValuesMerger,
};
use rigger_kube::{
    Client, ClusterApplier, DriverKind, DryRunApplier, KubeReleaseRunner, ManifestApplier,
    MemoryDriver, StorageConfig, StorageDriver, StorageHistory, driver_for,
};
use rigger_repo::RepoChartResolver;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

mod error;
mod exit_codes;
mod logging;

use error::{CliError, Result};
use logging::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "rigger")]
#[command(about = "Install a release, or upgrade it if it already exists", long_about = None)]
struct Cli {
    /// Path to a kubeconfig file (default: in-cluster or ~/.kube/config)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Chart to deploy: a name, a local path or repo/chart
    #[arg(long = "chartName", default_value = "nginx-ingress")]
    chart_name: String,

    /// Name of the release
    #[arg(long = "releaseName", default_value = "nginx-ingress")]
    release_name: String,

    /// Chart repository used when upgrading
    #[arg(long = "repoURL", default_value = "https://helm.nginx.com/stable")]
    repo_url: String,

    /// Chart version used when upgrading (default: latest)
    #[arg(long, default_value = "")]
    version: String,

    /// Comma separated key=value overrides
    #[arg(long, default_value = "")]
    values: String,

    /// Namespace of every release this process manages
    #[arg(long, env = "RIGGER_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Release storage: secret, configmap or memory
    #[arg(long, env = "RIGGER_STORAGE_DRIVER", default_value = DEFAULT_STORAGE_DRIVER)]
    storage_driver: String,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Render the release without applying it; revisions stay in memory
    #[arg(long)]
    dry_run: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable debug output
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    miette::set_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    logging::init(cli.log_format, cli.debug);
    tracing::info!(
        chart = %cli.chart_name,
        release = %cli.release_name,
        repository = %cli.repo_url,
        version = %cli.version,
        values = %cli.values,
        namespace = %cli.namespace,
        storage = %cli.storage_driver,
        timeout = ?cli.timeout,
        dry_run = cli.dry_run,
        "received arguments"
    );

    let ctx = match cli.timeout {
        Some(secs) => OperationContext::with_timeout(Duration::from_secs(secs)),
        None => OperationContext::new(),
    };
    cancel_on_interrupt(ctx.clone());

    let release_name = cli.release_name.clone();
    match run(cli, &ctx).await {
        Ok(record) => {
            tracing::info!(
                "Successfully installed or updated release {} at revision {}",
                record.name,
                record.revision
            );
            ExitCode::from(exit_codes::SUCCESS)
        }
        Err(err) => {
            let code = err.exit_code();
            tracing::error!(
                release = %release_name,
                exit_code = code,
                "Failed to install or update release: {}",
                err
            );
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code)
        }
    }
}

fn cancel_on_interrupt(ctx: OperationContext) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            ctx.cancel();
        }
    });
}

async fn run(cli: Cli, ctx: &OperationContext) -> Result<ReleaseRecord> {
    let driver: DriverKind = cli.storage_driver.parse().map_err(|e| {
        CliError::config_with_help(
            format!("{}", e),
            "use --storage-driver secret, configmap or memory",
        )
    })?;

    // A dry run only needs the cluster for its capabilities.
    let client = if driver.needs_cluster() || !cli.dry_run {
        Some(ctx.run(rigger_kube::connect(cli.kubeconfig.as_deref())).await??)
    } else {
        None
    };

    let storage = release_storage(driver, cli.dry_run, client.clone())?;
    let (applier, capabilities): (Arc<dyn ManifestApplier>, Capabilities) = match &client {
        Some(client) => {
            let capabilities = ctx.run(rigger_kube::server_capabilities(client)).await??;
            if cli.dry_run {
                (Arc::new(DryRunApplier), capabilities)
            } else {
                let applier = ctx.run(ClusterApplier::new(client.clone())).await??;
                (Arc::new(applier), capabilities)
            }
        }
        None => (Arc::new(DryRunApplier), Capabilities::default()),
    };

    let reconciler = Reconciler::new(
        ReconcilerConfig {
            namespace: cli.namespace,
            storage_driver: driver.to_string(),
        },
        StorageHistory::new(storage.clone()),
        RepoChartResolver::from_environment()?,
        SetValuesMerger,
        KubeReleaseRunner::new(storage, applier).with_capabilities(capabilities),
    );

    let request = ReleaseRequest::new(cli.chart_name, cli.release_name)
        .with_repository(cli.repo_url)
        .with_version(cli.version)
        .with_overrides(split_values(&cli.values));

    Ok(reconciler.reconcile(&request, ctx).await?)
}

/// Storage for release revisions. A dry run keeps its history in memory
/// so nothing is written to the cluster.
fn release_storage(
    driver: DriverKind,
    dry_run: bool,
    client: Option<Client>,
) -> Result<Arc<dyn StorageDriver>> {
    if dry_run {
        if driver.needs_cluster() {
            tracing::debug!(storage = %driver, "dry run, keeping revisions in memory");
        }
        return Ok(Arc::new(MemoryDriver::new()));
    }
    Ok(driver_for(driver, client, StorageConfig::default())?)
}

/// Split `--values` on commas and trim each entry
fn split_values(raw: &str) -> Vec<String> {
    raw.split(',').map(|v| v.trim().to_string()).collect()
}
