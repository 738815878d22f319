//! Project root resolution and path expansion.
//!
//! The project root is the directory holding `sanic.toml`. It is taken from
//! `--root` / `SANIC_ROOT` when given, otherwise found by walking up from
//! the current directory.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::config::CONFIG_FILE;

/// Environment variable for the project root override
pub const ENV_ROOT: &str = "SANIC_ROOT";

/// Resolve the project root from an override or the current directory.
pub fn project_root(root_override: Option<&Path>) -> Result<PathBuf> {
    if let Some(root) = root_override {
        let path = expand(&root.to_string_lossy());
        let path = path
            .canonicalize()
            .with_context(|| format!("Project root {} does not exist", path.display()))?;
        if !path.join(CONFIG_FILE).is_file() {
            bail!("{} has no {CONFIG_FILE}", path.display());
        }
        log::debug!("Using project root from --root/{ENV_ROOT}: {}", path.display());
        return Ok(path);
    }

    let cwd = std::env::current_dir().context("Could not determine the current directory")?;
    find_project_root(&cwd)
}

/// Nearest ancestor of `start` (inclusive) that contains `sanic.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf> {
    let found = start
        .ancestors()
        .find(|dir| dir.join(CONFIG_FILE).is_file())
        .with_context(|| {
            format!(
                "Could not find {CONFIG_FILE} in {} or any parent directory (use --root or {ENV_ROOT})",
                start.display()
            )
        })?;
    log::debug!("Found project root: {}", found.display());
    Ok(found.to_path_buf())
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Shorten a path for display by replacing the home directory with `~`.
pub fn display(path: &Path) -> String {
    if let Some(home) = dirs::home_dir()
        && let Ok(rest) = path.strip_prefix(&home)
    {
        return Path::new("~").join(rest).display().to_string();
    }
    path.display().to_string()
}
