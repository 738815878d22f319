//! Idempotent namespace creation.

use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::provisioner::Provisioner;

/// Marker kubectl prints when the namespace is already there.
const ALREADY_EXISTS: &str = "AlreadyExists";

/// What [`ensure`] found or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceStatus {
    /// The environment does not manage a namespace
    Unmanaged,
    /// The namespace was created by this call
    Created(String),
    /// The namespace already existed
    AlreadyExists(String),
}

impl NamespaceStatus {
    /// The namespace name, when one is managed.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Unmanaged => None,
            Self::Created(name) | Self::AlreadyExists(name) => Some(name),
        }
    }
}

/// Make sure `namespace` exists in the provisioner's cluster.
///
/// `None` or an empty name means the environment has no namespace and no
/// command is run. Pre-existence counts as success; any other failure is an
/// [`Error::Namespace`] carrying kubectl's output.
pub fn ensure(
    runner: &dyn CommandRunner,
    provisioner: &dyn Provisioner,
    namespace: Option<&str>,
) -> Result<NamespaceStatus> {
    let Some(namespace) = namespace.filter(|ns| !ns.is_empty()) else {
        return Ok(NamespaceStatus::Unmanaged);
    };

    let command = provisioner.cluster_command(&["create", "namespace", namespace]);
    let output = runner.output(&command)?;
    if output.success {
        log::info!("created namespace {namespace}");
        return Ok(NamespaceStatus::Created(namespace.to_string()));
    }

    let combined = output.combined();
    if combined.contains(ALREADY_EXISTS) {
        log::debug!("namespace {namespace} already exists");
        return Ok(NamespaceStatus::AlreadyExists(namespace.to_string()));
    }

    Err(Error::Namespace {
        namespace: namespace.to_string(),
        output: combined,
    })
}
