//! Manifest rendering through a templater container.
//!
//! Templates are never interpreted here. The selected files are copied into a
//! scoped staging directory that is mounted read-only at `/in`, the templater
//! image writes its results to a second staging directory mounted at `/out`,
//! and the results are copied into the project's output directory by this
//! process, so published files are owned by the invoking user.
//!
//! Rendering always starts from a clean slate: manifests generated by earlier
//! runs are removed from the output directory before new ones are published.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::{NamedTempFile, TempDir};

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, ExternalCommand};

/// First line of every published manifest.
pub const GENERATED_BANNER: &str =
    "#WARNING: THIS FILE IS AUTOMATICALLY GENERATED, DO NOT EDIT IT DIRECTLY OR COMMIT IT";

/// `NAMESPACE` value for environments that do not define one.
pub const NAMESPACE_SENTINEL: &str = "<ERROR_NAMESPACE_NOT_DEFINED_IN_THIS_ENV>";

/// Suffix that marks a file as a template in the default selection.
pub const TEMPLATE_SUFFIX: &str = ".tmpl";

/// Container runtime used when none is configured.
pub const DEFAULT_RUNTIME: &str = "docker";

/// Mode of published manifests: readable, not writable, not executable.
const PUBLISHED_MODE: u32 = 0o440;

/// Values injected into the templater, fixed for the whole render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
    /// Environment name as configured
    pub environment: String,
    /// Registry images are pushed to
    pub registry_host: String,
    /// Build tag of the services being deployed
    pub image_tag: String,
    /// Project directory as the cluster sees it
    pub project_dir: PathBuf,
    /// Environment namespace, if any
    pub namespace: Option<String>,
}

impl TemplateContext {
    /// `SANIC_ENV` value: `ci` renders as `dev`, everything else as itself.
    pub fn sanic_env(&self) -> &str {
        match self.environment.as_str() {
            "ci" => "dev",
            other => other,
        }
    }

    /// `NAMESPACE` value, falling back to [`NAMESPACE_SENTINEL`].
    pub fn namespace_value(&self) -> &str {
        self.namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(NAMESPACE_SENTINEL)
    }

    /// The variables passed to the templater container, in a fixed order.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("SANIC_ENV", self.sanic_env().to_string()),
            ("REGISTRY_HOST", self.registry_host.clone()),
            ("IMAGE_TAG", self.image_tag.clone()),
            ("PROJECT_DIR", self.project_dir.display().to_string()),
            ("NAMESPACE", self.namespace_value().to_string()),
        ]
    }
}

/// What to render and where.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Directory holding the templates
    pub input_dir: PathBuf,
    /// Directory receiving the published manifests
    pub output_dir: PathBuf,
    /// Templater image reference
    pub image: String,
    /// Exact file names to render; empty selects every `*.tmpl` file
    pub selection: Vec<String>,
}

/// Result of a successful render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOutcome {
    /// Templates that were rendered, by file name
    pub templates: Vec<String>,
    /// Published manifests, in template order
    pub published: Vec<PathBuf>,
    /// Stale generated files removed from the output directory
    pub cleared: Vec<PathBuf>,
    /// Whether the templater image had to be pulled
    pub pulled_image: bool,
}

/// Renders templates with a containerized templater.
pub struct Renderer {
    runner: Arc<dyn CommandRunner>,
    runtime: String,
}

impl Renderer {
    /// Renderer using the default container runtime.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            runtime: DEFAULT_RUNTIME.to_string(),
        }
    }

    /// Use another docker-compatible runtime (`podman`, `nerdctl`).
    #[must_use]
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Render the request's templates with `context` and publish the results.
    ///
    /// Selection happens before anything else, so an empty selection leaves
    /// the output directory untouched.
    pub fn render(
        &self,
        request: &RenderRequest,
        context: &TemplateContext,
    ) -> Result<RenderOutcome> {
        let image = normalize_image(&request.image);
        let templates = select_templates(&request.input_dir, &request.selection)?;
        log::info!("rendering {} template(s) with {image}", templates.len());

        let pulled_image = self.ensure_image(&image)?;
        let cleared = clear_generated(&request.output_dir)?;

        let stage_in = staging_dir()?;
        let stage_out = staging_dir()?;
        for name in &templates {
            let source = request.input_dir.join(name);
            fs::copy(&source, stage_in.path().join(name))
                .map_err(|source_err| Error::TemplateInput {
                    path: source.clone(),
                    source: source_err,
                })?;
        }

        let command = self.templater_command(&image, stage_in.path(), stage_out.path(), context);
        let output = self.runner.output(&command)?;
        if !output.success {
            return Err(Error::TemplateExecution {
                image,
                message: output.combined(),
            });
        }

        let mut published = Vec::with_capacity(templates.len());
        let mut expected = BTreeSet::new();
        for name in &templates {
            let target = published_name(name);
            let rendered = stage_out.path().join(target);
            let content = fs::read(&rendered).map_err(|_| Error::TemplateExecution {
                image: image.clone(),
                message: format!("template {name} did not produce {target}"),
            })?;
            published.push(publish(&request.output_dir, target, &content)?);
            expected.insert(target.to_string());
        }
        warn_unexpected(stage_out.path(), &expected);

        Ok(RenderOutcome {
            templates,
            published,
            cleared,
            pulled_image,
        })
    }

    /// Make sure `image` is available locally, pulling it if needed.
    ///
    /// Returns whether a pull happened.
    pub fn ensure_image(&self, image: &str) -> Result<bool> {
        let unavailable = |err: Error| match err {
            Error::CommandSpawn { command, source } => Error::ImagePull {
                image: image.to_string(),
                message: format!("could not run `{command}`: {source}"),
            },
            other => other,
        };

        let inspect = ExternalCommand::new(&self.runtime).args(["image", "inspect", image]);
        if self.runner.output(&inspect).map_err(unavailable)?.success {
            return Ok(false);
        }

        log::info!("image {image} not found locally, pulling it");
        let pull = ExternalCommand::new(&self.runtime).args(["pull", image]);
        if !self.runner.stream(&pull).map_err(unavailable)? {
            return Err(Error::ImagePull {
                image: image.to_string(),
                message: format!("`{pull}` failed"),
            });
        }
        Ok(true)
    }

    fn templater_command(
        &self,
        image: &str,
        stage_in: &Path,
        stage_out: &Path,
        context: &TemplateContext,
    ) -> ExternalCommand {
        let mut cmd = ExternalCommand::new(&self.runtime)
            .args(["run", "--rm"])
            .arg("-v")
            .arg(format!("{}:/in:ro", stage_in.display()))
            .arg("-v")
            .arg(format!("{}:/out", stage_out.display()));
        for (key, value) in context.env_vars() {
            cmd = cmd.arg("-e").arg(format!("{key}={value}"));
        }
        cmd.arg(image)
    }
}

/// Append `:latest` when the reference names neither a tag nor a digest.
///
/// Only the last path segment is inspected, so a registry port
/// (`localhost:5000/app`) is not mistaken for a tag.
pub fn normalize_image(image: &str) -> String {
    let last = image.rsplit('/').next().unwrap_or(image);
    if last.contains(':') || last.contains('@') {
        image.to_string()
    } else {
        format!("{image}:latest")
    }
}

/// File name a template is published under.
pub fn published_name(template: &str) -> &str {
    template.strip_suffix(TEMPLATE_SUFFIX).unwrap_or(template)
}

/// Choose the templates to render from `input_dir`.
///
/// With an explicit `selection`, files whose name equals one of its entries
/// are kept, each once, in directory order. Otherwise every `*.tmpl` file is
/// kept. Only regular files count.
pub fn select_templates(input_dir: &Path, selection: &[String]) -> Result<Vec<String>> {
    let read_err = |source: std::io::Error| Error::TemplateInput {
        path: input_dir.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(input_dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        if !entry.file_type().map_err(read_err)?.is_file() {
            continue;
        }
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort();

    let selected: Vec<String> = if selection.is_empty() {
        names
            .into_iter()
            .filter(|name| name.ends_with(TEMPLATE_SUFFIX))
            .collect()
    } else {
        names
            .into_iter()
            .filter(|name| selection.iter().any(|wanted| wanted == name))
            .collect()
    };

    if selected.is_empty() {
        return Err(Error::NoTemplates {
            dir: input_dir.to_path_buf(),
        });
    }
    Ok(selected)
}

fn staging_dir() -> Result<TempDir> {
    TempDir::new().map_err(|source| Error::Staging {
        path: std::env::temp_dir(),
        source,
    })
}

/// Remove previously generated manifests from `output_dir`.
///
/// Removes every `*.yaml` / `*.yml` entry that is a regular file or a
/// symlink (the link itself, never its target), and any regular file whose
/// first line is [`GENERATED_BANNER`]. Everything else is left alone.
pub fn clear_generated(output_dir: &Path) -> Result<Vec<PathBuf>> {
    let write_err = |path: &Path, source: std::io::Error| Error::OutputWrite {
        path: path.to_path_buf(),
        source,
    };

    let mut removed = Vec::new();
    let entries = fs::read_dir(output_dir).map_err(|e| write_err(output_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| write_err(output_dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| write_err(&path, e))?;
        let stale = if file_type.is_symlink() {
            is_manifest(&path)
        } else {
            file_type.is_file() && (is_manifest(&path) || has_banner(&path))
        };
        if !stale {
            continue;
        }
        fs::remove_file(&path).map_err(|e| write_err(&path, e))?;
        log::debug!("removed stale {}", path.display());
        removed.push(path);
    }
    removed.sort();
    Ok(removed)
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}

fn has_banner(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut first = Vec::new();
    if BufReader::new(file).read_until(b'\n', &mut first).is_err() {
        return false;
    }
    first.trim_ascii_end() == GENERATED_BANNER.as_bytes()
}

/// Write `content` to `<output_dir>/<name>` behind the banner, atomically.
fn publish(output_dir: &Path, name: &str, content: &[u8]) -> Result<PathBuf> {
    let dest = output_dir.join(name);
    let write_err = |source: std::io::Error| Error::OutputWrite {
        path: dest.clone(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(output_dir).map_err(write_err)?;
    if !content.starts_with(GENERATED_BANNER.as_bytes()) {
        writeln!(tmp, "{GENERATED_BANNER}").map_err(write_err)?;
    }
    tmp.write_all(content).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    set_published_mode(tmp.as_file()).map_err(write_err)?;
    tmp.persist(&dest).map_err(|e| write_err(e.error))?;

    log::debug!("published {}", dest.display());
    Ok(dest)
}

#[cfg(unix)]
fn set_published_mode(file: &File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(PUBLISHED_MODE))
}

#[cfg(not(unix))]
fn set_published_mode(file: &File) -> std::io::Result<()> {
    let mut permissions = file.metadata()?.permissions();
    permissions.set_readonly(true);
    file.set_permissions(permissions)
}

fn warn_unexpected(stage_out: &Path, expected: &BTreeSet<String>) {
    let Ok(entries) = fs::read_dir(stage_out) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !expected.contains(&name) {
            log::warn!("ignoring templater output {name}: no selected template produces it");
        }
    }
}
