//! Deploy pipeline for pushing a project's services to a Kubernetes cluster.
//!
//! The pipeline ([`Deployer`]) brings a cluster up through a [`Provisioner`],
//! renders manifests with a containerized templater, makes sure the
//! environment's namespace exists, applies the manifests and reports where
//! the services can be reached.
//!
//! # Architecture
//!
//! All cluster and container tooling is driven through the [`CommandRunner`]
//! trait, with [`SystemRunner`] spawning real processes. Cluster backends
//! implement [`Provisioner`]:
//! - [`MinikubeProvisioner`]: local single-node cluster
//! - [`ExternalProvisioner`]: existing cluster reached through a kubeconfig
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use deploykit::{ApplyMode, DeployRequest, Deployer, ProvisionerConfig, SystemRunner};
//!
//! let runner = Arc::new(SystemRunner);
//! let provisioner = deploykit::provisioner::from_config(
//!     &ProvisionerConfig::default(),
//!     runner.clone(),
//! )?;
//! let deployer = Deployer::new(runner, provisioner.into());
//!
//! let root = PathBuf::from("/home/dev/project");
//! let outcome = deployer.deploy(&DeployRequest {
//!     environment: "dev".to_string(),
//!     namespace: Some("dev".to_string()),
//!     service_dirs: vec![root.join("services/api")],
//!     input_dir: root.join("deploy/in"),
//!     output_dir: root.join("deploy/out"),
//!     project_root: root,
//!     templater_image: "sanic/templater".to_string(),
//!     selection: Vec::new(),
//!     apply_mode: ApplyMode::Standard,
//! })?;
//! println!("deployed {}", outcome.build_tag);
//! # Ok::<(), deploykit::Error>(())
//! ```

pub mod apply;
pub mod buildtag;
pub mod error;
pub mod exec;
pub mod namespace;
pub mod pipeline;
pub mod provisioner;
pub mod services;
pub mod template;

#[cfg(test)]
mod testing;

pub use apply::ApplyMode;
pub use buildtag::BuildTag;
pub use error::{Error, ErrorCategory, Result};
pub use exec::{CommandOutput, CommandRunner, ExternalCommand, SystemRunner};
pub use namespace::NamespaceStatus;
pub use pipeline::{DeployObserver, DeployOutcome, DeployRequest, Deployer, NoObserver, Stage};
pub use provisioner::{
    ExternalConfig, ExternalProvisioner, MinikubeConfig, MinikubeProvisioner, Provisioner,
    ProvisionerConfig,
};
pub use services::Service;
pub use template::{RenderOutcome, RenderRequest, Renderer, TemplateContext};
