//! Existing remote cluster reached through a kubeconfig.
//!
//! Nothing is created here: `ensure_cluster` only verifies the API server
//! answers. Edge nodes come from the configuration or, when none are listed,
//! from nodes carrying the edge label.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, ExternalCommand};

use super::Provisioner;

/// Default label selector for ingress-capable nodes.
pub const DEFAULT_EDGE_SELECTOR: &str = "sanic.io/edge-node=true";

/// Settings for an externally managed cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalConfig {
    /// Kubeconfig with the cluster's credentials (defaults to kubectl's default)
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    /// Context within the kubeconfig
    #[serde(default)]
    pub context: Option<String>,
    /// Registry host images are pushed to
    #[serde(default)]
    pub registry: String,
    /// Static list of edge node addresses; discovered when empty
    #[serde(default)]
    pub edge_nodes: Vec<String>,
    /// Label selector used for discovery
    #[serde(default)]
    pub edge_selector: Option<String>,
}

/// Provisioner for a cluster someone else runs.
pub struct ExternalProvisioner {
    config: ExternalConfig,
    kubeconfig: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl ExternalProvisioner {
    /// Create a provisioner. Fails if no registry is configured.
    pub fn new(config: ExternalConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        if config.registry.trim().is_empty() {
            return Err(Error::Config(
                "external provisioner requires a registry".to_string(),
            ));
        }
        let kubeconfig = config
            .kubeconfig
            .clone()
            .unwrap_or_else(super::default_kubeconfig);
        Ok(Self {
            config,
            kubeconfig,
            runner,
        })
    }

    fn edge_selector(&self) -> &str {
        self.config
            .edge_selector
            .as_deref()
            .unwrap_or(DEFAULT_EDGE_SELECTOR)
    }
}

impl Provisioner for ExternalProvisioner {
    fn kind(&self) -> &'static str {
        "external"
    }

    fn ensure_cluster(&self) -> Result<()> {
        if !self.kubeconfig.is_file() {
            return Err(Error::Config(format!(
                "kubeconfig {} does not exist",
                self.kubeconfig.display()
            )));
        }

        let output = self
            .runner
            .output(&self.cluster_command(&["cluster-info"]))?;
        if !output.success {
            return Err(Error::ClusterLifecycle(format!(
                "cluster from {} is unreachable: {}",
                self.kubeconfig.display(),
                output.combined()
            )));
        }
        Ok(())
    }

    fn registry(&self) -> Result<String> {
        Ok(self.config.registry.trim().to_string())
    }

    fn kube_config_location(&self) -> PathBuf {
        self.kubeconfig.clone()
    }

    fn cluster_command(&self, args: &[&str]) -> ExternalCommand {
        super::kubectl(&self.kubeconfig, self.config.context.as_deref(), args)
    }

    fn in_cluster_dir(&self, local_root: &Path) -> PathBuf {
        local_root.to_path_buf()
    }

    fn edge_nodes(&self) -> Result<Vec<String>> {
        if !self.config.edge_nodes.is_empty() {
            return Ok(self.config.edge_nodes.clone());
        }

        let selector = self.edge_selector();
        let output = self
            .runner
            .output(&self.cluster_command(&["get", "nodes", "-l", selector, "-o", "json"]))?;
        if !output.success {
            return Err(Error::EdgeDiscovery(output.combined()));
        }

        let json: serde_json::Value = serde_json::from_str(&output.stdout)?;
        Ok(parse_node_addresses(&json))
    }
}

/// Extract one address per node from `kubectl get nodes -o json`,
/// preferring `ExternalIP` over `InternalIP`.
pub fn parse_node_addresses(json: &serde_json::Value) -> Vec<String> {
    let empty = Vec::new();
    let nodes = json["items"].as_array().unwrap_or(&empty);

    nodes
        .iter()
        .filter_map(|node| {
            let addresses = node["status"]["addresses"].as_array()?;
            let find = |kind: &str| {
                addresses
                    .iter()
                    .find(|a| a["type"].as_str() == Some(kind))
                    .and_then(|a| a["address"].as_str())
                    .map(str::to_string)
            };
            find("ExternalIP").or_else(|| find("InternalIP"))
        })
        .collect()
}
