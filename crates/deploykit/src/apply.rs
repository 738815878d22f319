//! Manifest application with `kubectl apply`.

use std::path::Path;

use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::provisioner::Provisioner;

/// How manifests are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ApplyMode {
    /// Create or update the objects in the directory
    #[default]
    Standard,
    /// Also delete cluster objects that are no longer in the directory.
    ///
    /// Without a selector every object kubectl considers prunable is a
    /// candidate (`--all`).
    Prune {
        /// Label selector limiting what can be pruned
        selector: Option<String>,
    },
}

/// Apply every manifest in `dir` to the provisioner's cluster.
///
/// Returns kubectl's standard output on success.
pub fn apply(
    runner: &dyn CommandRunner,
    provisioner: &dyn Provisioner,
    dir: &Path,
    mode: &ApplyMode,
) -> Result<String> {
    let dir_arg = dir.display().to_string();
    let mut args = vec!["apply", "-f", dir_arg.as_str()];
    if let ApplyMode::Prune { selector } = mode {
        args.push("--prune");
        match selector.as_deref().filter(|s| !s.is_empty()) {
            Some(selector) => args.extend(["-l", selector]),
            None => args.push("--all"),
        }
    }

    let output = runner.output(&provisioner.cluster_command(&args))?;
    if !output.success {
        return Err(Error::Apply {
            dir: dir.to_path_buf(),
            output: output.combined(),
        });
    }
    Ok(output.stdout.trim_end().to_string())
}
