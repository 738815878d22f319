//! Content-addressed build tags.
//!
//! The tag is a BLAKE3 digest over every file under the given service
//! directories in the working tree, uncommitted changes included. Each file
//! contributes its path relative to the project root and a digest of its
//! content, so renames, edits, additions and deletions all change the tag.
//!
//! Files excluded by the project's own `.gitignore` / `.ignore` files are not
//! hashed. Ignore sources that live outside the project (global excludes,
//! `.git/info/exclude`, ignore files above the project root) are not read, so
//! the same tree produces the same tag on every machine.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use blake3::Hasher;
use ignore::WalkBuilder;

use crate::error::{Error, Result};

/// Number of hex characters kept from the digest.
const TAG_LEN: usize = 32;

/// Bumped whenever the hashing scheme changes.
const SCHEME: &[u8] = b"sanic-buildtag-v1";

/// A deterministic identifier for the content of a set of directories.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildTag(String);

impl BuildTag {
    /// The tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<BuildTag> for String {
    fn from(tag: BuildTag) -> Self {
        tag.0
    }
}

/// Compute the build tag for `dirs` (absolute, or relative to `project_root`).
///
/// The order of `dirs` does not matter and duplicates are ignored. Fails if
/// the root or any directory is unreadable, missing, outside the project
/// root, or excluded by the project's ignore rules.
pub fn compute(project_root: &Path, dirs: &[PathBuf]) -> Result<BuildTag> {
    let root = project_root.canonicalize().map_err(|e| {
        Error::source_state(project_root, format!("project root is not readable: {e}"))
    })?;

    let service_dirs = resolve_dirs(&root, dirs)?;
    let files = collect_files(&root, &service_dirs)?;

    let mut hasher = Hasher::new();
    hasher.update(SCHEME);
    for dir in &service_dirs {
        write_record(&mut hasher, b'd', &relative(&root, dir), &[]);
    }
    for (rel, path) in &files {
        let unreadable = |e: std::io::Error| Error::source_state(path, e.to_string());
        let meta = fs::symlink_metadata(path).map_err(unreadable)?;
        if meta.file_type().is_symlink() {
            let target = fs::read_link(path).map_err(unreadable)?;
            write_record(&mut hasher, b'l', rel, target.to_string_lossy().as_bytes());
        } else {
            let digest = hash_file(path).map_err(unreadable)?;
            write_record(&mut hasher, b'f', rel, digest.as_bytes());
        }
    }

    let hex = hasher.finalize().to_hex();
    let tag = BuildTag(hex[..TAG_LEN].to_string());
    log::debug!(
        "build tag {tag} over {} files in {} directories",
        files.len(),
        service_dirs.len()
    );
    Ok(tag)
}

fn resolve_dirs(root: &Path, dirs: &[PathBuf]) -> Result<BTreeSet<PathBuf>> {
    let mut resolved = BTreeSet::new();
    for dir in dirs {
        let joined = if dir.is_absolute() {
            dir.clone()
        } else {
            root.join(dir)
        };
        let canonical = joined.canonicalize().map_err(|e| {
            Error::source_state(&joined, format!("service directory is not readable: {e}"))
        })?;
        if !canonical.starts_with(root) {
            return Err(Error::source_state(
                &joined,
                format!("directory is outside the project root {}", root.display()),
            ));
        }
        if !canonical.is_dir() {
            return Err(Error::source_state(&joined, "not a directory"));
        }
        resolved.insert(canonical);
    }
    Ok(resolved)
}

/// Walk from the project root so root-level ignore files apply, descending
/// only into the service directories and their ancestors.
fn collect_files(
    root: &Path,
    service_dirs: &BTreeSet<PathBuf>,
) -> Result<BTreeMap<String, PathBuf>> {
    let wanted: Vec<PathBuf> = service_dirs.iter().cloned().collect();
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .parents(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let path = entry.path();
            entry.file_name() != ".git"
                && wanted
                    .iter()
                    .any(|dir| path.starts_with(dir) || dir.starts_with(path))
        })
        .build();

    let mut files = BTreeMap::new();
    let mut seen_dirs = BTreeSet::new();
    for entry in walker {
        let entry = entry.map_err(|e| Error::source_state(root, e.to_string()))?;
        let path = entry.path();
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if service_dirs.contains(path) {
                seen_dirs.insert(path.to_path_buf());
            }
            continue;
        }
        if service_dirs.iter().any(|dir| path.starts_with(dir)) {
            files.insert(relative(root, path), path.to_path_buf());
        }
    }

    if let Some(missed) = service_dirs.iter().find(|dir| !seen_dirs.contains(*dir)) {
        return Err(Error::source_state(
            missed,
            "directory is excluded by the project's ignore rules",
        ));
    }
    Ok(files)
}

/// Path relative to the root with `/` separators, independent of platform.
fn relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn write_record(hasher: &mut Hasher, kind: u8, rel: &str, payload: &[u8]) {
    hasher.update(&[kind]);
    hasher.update(&(rel.len() as u64).to_le_bytes());
    hasher.update(rel.as_bytes());
    hasher.update(&(payload.len() as u64).to_le_bytes());
    hasher.update(payload);
}

fn hash_file(path: &Path) -> std::io::Result<blake3::Hash> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(1024 * 1024, file);
    let mut hasher = Hasher::new();

    let mut buffer = [0u8; 65536];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}
