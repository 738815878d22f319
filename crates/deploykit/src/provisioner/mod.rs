//! Cluster provisioners.
//!
//! The [`Provisioner`] trait is the capability set the deploy pipeline needs
//! from a cluster backend:
//! - lifecycle (`ensure_cluster`)
//! - the registry images are pushed to
//! - credentials, as a kubeconfig location and pre-bound `kubectl` commands
//! - the project path as the cluster sees it
//! - ingress ("edge") node discovery
//!
//! Exactly one provisioner is resolved per invocation, from the environment's
//! [`ProvisionerConfig`].

pub mod external;
pub mod minikube;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::exec::{CommandRunner, ExternalCommand};

pub use external::{ExternalConfig, ExternalProvisioner};
pub use minikube::{MinikubeConfig, MinikubeProvisioner};

/// Backend trait for cluster operations.
pub trait Provisioner: Send + Sync {
    /// Short backend name for messages (`minikube`, `external`).
    fn kind(&self) -> &'static str;

    /// Bring the cluster into a ready state, creating it if needed.
    ///
    /// Idempotent: a ready cluster is left alone. Blocks until the cluster
    /// is ready or the attempt fails.
    fn ensure_cluster(&self) -> Result<()>;

    /// Address (`host[:port]`) of the registry this cluster pulls from.
    fn registry(&self) -> Result<String>;

    /// Kubeconfig file holding this cluster's credentials.
    fn kube_config_location(&self) -> PathBuf;

    /// A `kubectl` invocation bound to this cluster's credentials.
    fn cluster_command(&self, args: &[&str]) -> ExternalCommand;

    /// Map a host path to the path the cluster's runtime sees for it.
    fn in_cluster_dir(&self, local_root: &Path) -> PathBuf;

    /// Whether this backend has ingress-capable nodes at all.
    ///
    /// Backends returning `false` are never asked for [`edge_nodes`](Self::edge_nodes).
    fn supports_edge_nodes(&self) -> bool {
        true
    }

    /// Addresses of ingress-capable nodes.
    fn edge_nodes(&self) -> Result<Vec<String>>;
}

/// Which backend an environment deploys to, and its settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProvisionerConfig {
    /// Single-node local cluster managed through `minikube`
    Minikube(MinikubeConfig),
    /// Existing cluster reached through a kubeconfig
    External(ExternalConfig),
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        ProvisionerConfig::Minikube(MinikubeConfig::default())
    }
}

/// Resolve the provisioner for a configuration.
pub fn from_config(
    config: &ProvisionerConfig,
    runner: Arc<dyn CommandRunner>,
) -> Result<Box<dyn Provisioner>> {
    let provisioner: Box<dyn Provisioner> = match config {
        ProvisionerConfig::Minikube(cfg) => Box::new(MinikubeProvisioner::new(cfg.clone(), runner)),
        ProvisionerConfig::External(cfg) => {
            Box::new(ExternalProvisioner::new(cfg.clone(), runner)?)
        }
    };
    log::debug!("using {} provisioner", provisioner.kind());
    Ok(provisioner)
}

/// The kubeconfig kubectl would use by default: the first `$KUBECONFIG`
/// entry, else `~/.kube/config`.
pub fn default_kubeconfig() -> PathBuf {
    if let Some(paths) = std::env::var_os("KUBECONFIG")
        && let Some(first) = std::env::split_paths(&paths).find(|p| !p.as_os_str().is_empty())
    {
        return first;
    }
    dirs::home_dir()
        .unwrap_or_default()
        .join(".kube")
        .join("config")
}

pub(crate) fn kubectl(kubeconfig: &Path, context: Option<&str>, args: &[&str]) -> ExternalCommand {
    let mut cmd = ExternalCommand::new("kubectl")
        .arg("--kubeconfig")
        .arg(kubeconfig.display().to_string());
    if let Some(context) = context {
        cmd = cmd.arg("--context").arg(context);
    }
    cmd.args(args.iter().copied())
}
