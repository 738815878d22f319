//! Local single-node cluster backed by `minikube`.
//!
//! The cluster runs the registry addon, so images are pushed to
//! `<minikube ip>:<registry_port>`. Minikube mounts the host's `/home` at
//! `/hosthome`, which is how the cluster sees the project directory.
//! There are no edge nodes; services are reached through minikube itself.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, ExternalCommand};

use super::Provisioner;

/// Settings for the minikube backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinikubeConfig {
    /// Minikube profile (also the kubectl context name)
    #[serde(default = "default_profile")]
    pub profile: String,
    /// VM/container driver passed to `minikube start`
    #[serde(default)]
    pub driver: Option<String>,
    /// Extra arguments for `minikube start`
    #[serde(default)]
    pub start_args: Vec<String>,
    /// Port of the registry addon
    #[serde(default = "default_registry_port")]
    pub registry_port: u16,
    /// Kubeconfig override (defaults to kubectl's default)
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
}

fn default_profile() -> String {
    "sanic".to_string()
}

fn default_registry_port() -> u16 {
    5000
}

impl Default for MinikubeConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            driver: None,
            start_args: Vec::new(),
            registry_port: default_registry_port(),
            kubeconfig: None,
        }
    }
}

/// Provisioner that drives the `minikube` CLI.
pub struct MinikubeProvisioner {
    config: MinikubeConfig,
    runner: Arc<dyn CommandRunner>,
}

impl MinikubeProvisioner {
    /// Create a provisioner for the given profile settings.
    pub fn new(config: MinikubeConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    fn minikube(&self, args: &[&str]) -> ExternalCommand {
        ExternalCommand::new("minikube")
            .arg("-p")
            .arg(&self.config.profile)
            .args(args.iter().copied())
    }

    /// Whether both the host and the API server report `Running`.
    ///
    /// `minikube status` exits non-zero for stopped or missing profiles, which
    /// is reported as not running rather than as an error.
    pub fn is_running(&self) -> Result<bool> {
        let output = self
            .runner
            .output(&self.minikube(&["status", "--format", "{{.Host}}/{{.APIServer}}"]))?;
        Ok(output.success && output.stdout.trim() == "Running/Running")
    }

    fn start(&self) -> Result<()> {
        let mut cmd = self.minikube(&["start", "--addons", "registry"]);
        if let Some(driver) = &self.config.driver {
            cmd = cmd.arg("--driver").arg(driver);
        }
        cmd = cmd.args(self.config.start_args.iter().cloned());

        if !self.runner.stream(&cmd)? {
            return Err(Error::ClusterLifecycle(format!(
                "`{cmd}` failed for minikube profile {}",
                self.config.profile
            )));
        }
        Ok(())
    }
}

impl Provisioner for MinikubeProvisioner {
    fn kind(&self) -> &'static str {
        "minikube"
    }

    fn ensure_cluster(&self) -> Result<()> {
        if self.is_running()? {
            log::info!("minikube profile {} is already running", self.config.profile);
            return Ok(());
        }

        log::info!("starting minikube profile {}", self.config.profile);
        self.start()?;

        if !self.is_running()? {
            return Err(Error::ClusterLifecycle(format!(
                "minikube profile {} did not reach the Running state",
                self.config.profile
            )));
        }
        Ok(())
    }

    fn registry(&self) -> Result<String> {
        let output = self.runner.output(&self.minikube(&["ip"]))?;
        let ip = output.stdout.trim();
        if !output.success || ip.is_empty() {
            return Err(Error::ClusterLifecycle(format!(
                "could not determine the minikube ip: {}",
                output.combined()
            )));
        }
        Ok(format!("{ip}:{}", self.config.registry_port))
    }

    fn kube_config_location(&self) -> PathBuf {
        self.config
            .kubeconfig
            .clone()
            .unwrap_or_else(super::default_kubeconfig)
    }

    fn cluster_command(&self, args: &[&str]) -> ExternalCommand {
        super::kubectl(
            &self.kube_config_location(),
            Some(&self.config.profile),
            args,
        )
    }

    fn in_cluster_dir(&self, local_root: &Path) -> PathBuf {
        host_mount_path(local_root)
    }

    fn supports_edge_nodes(&self) -> bool {
        false
    }

    fn edge_nodes(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// `/home/<rest>` → `/hosthome/<rest>`; anything else maps to itself.
pub fn host_mount_path(path: &Path) -> PathBuf {
    match path.strip_prefix("/home") {
        Ok(rest) => Path::new("/hosthome").join(rest),
        Err(_) => path.to_path_buf(),
    }
}
