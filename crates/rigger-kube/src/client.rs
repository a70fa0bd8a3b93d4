//! Cluster connection

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use rigger_core::{Capabilities, KubeVersion};
use std::path::Path;

use crate::error::{KubeError, Result};

/// Connect using `kubeconfig`, or the inferred in-cluster/default config
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| KubeError::Config(format!("{}: {}", path.display(), e)))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| KubeError::Config(e.to_string()))?
        }
        None => Config::infer()
            .await
            .map_err(|e| KubeError::Config(e.to_string()))?,
    };

    tracing::debug!(
        cluster = %config.cluster_url,
        namespace = %config.default_namespace,
        "connecting"
    );
    Ok(Client::try_from(config)?)
}

/// Capabilities reported by the API server
pub async fn server_capabilities(client: &Client) -> Result<Capabilities> {
    let info = client.apiserver_version().await?;
    Ok(Capabilities {
        kube_version: KubeVersion::new(&info.git_version),
    })
}
