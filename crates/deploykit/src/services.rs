//! Service discovery.
//!
//! A service is any directory under the project root that contains a
//! `Dockerfile`. Hidden directories and configured ignore directories are
//! never descended into.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::error::{Error, Result};

/// File that marks a directory as a service.
pub const SERVICE_MARKER: &str = "Dockerfile";

/// A buildable unit of source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Directory name
    pub name: String,
    /// Absolute directory path
    pub dir: PathBuf,
}

/// Find every service under `root`, sorted by directory.
///
/// `ignore_dirs` entries match either a directory name anywhere in the tree
/// (`node_modules`) or a path relative to the root (`vendor/third_party`).
pub fn discover(root: &Path, ignore_dirs: &[String]) -> Result<Vec<Service>> {
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "project root {} is not a directory",
            root.display()
        )));
    }

    let mut services = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped(root, e, ignore_dirs));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::source_state(path, e.to_string())
        })?;
        if entry.file_type().is_dir() && entry.path().join(SERVICE_MARKER).is_file() {
            let name = entry.file_name().to_string_lossy().to_string();
            log::debug!("found service {name} at {}", entry.path().display());
            services.push(Service {
                name,
                dir: entry.path().to_path_buf(),
            });
        }
    }

    Ok(services)
}

fn is_skipped(root: &Path, entry: &DirEntry, ignore_dirs: &[String]) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
    ignore_dirs.iter().any(|ignored| {
        let ignored = ignored.trim_end_matches('/');
        name == ignored || rel == Path::new(ignored)
    })
}
