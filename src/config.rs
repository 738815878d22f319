//! `sanic.toml` project configuration.
//!
//! ```toml
//! default_environment = "dev"
//!
//! [build]
//! ignore_dirs = ["node_modules", "vendor"]
//!
//! [deploy]
//! folder = "deploy"
//! templater_image = "sanic/templater:v1"
//!
//! [environments.dev]
//! namespace = "dev"
//! provisioner = { kind = "minikube" }
//!
//! [environments.dev.commands]
//! test = "go test ./..."
//!
//! [environments.prod]
//! namespace = "prod"
//! provisioner = { kind = "external", kubeconfig = "~/.kube/prod", registry = "registry.example.com" }
//! ```

use anyhow::{Context, Result, bail};
use deploykit::ProvisionerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::paths;

/// Name of the project configuration file
pub const CONFIG_FILE: &str = "sanic.toml";

// ============================================================================
// Schema
// ============================================================================

/// The project configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SanicConfig {
    /// Environment used when neither --env nor SANIC_ENV is given
    #[serde(default)]
    pub default_environment: Option<String>,

    /// Build settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Deploy settings
    #[serde(default)]
    pub deploy: DeployConfig,

    /// Environments by name
    #[serde(default)]
    pub environments: BTreeMap<String, Environment>,
}

/// Build settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Directories never searched for services (names or root-relative paths)
    #[serde(default)]
    pub ignore_dirs: Vec<String>,
}

/// Deploy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Folder under the project root holding `in/` (templates) and `out/`
    #[serde(default = "default_folder")]
    pub folder: String,

    /// Image that renders the templates
    #[serde(default)]
    pub templater_image: String,

    /// Docker-compatible container runtime
    #[serde(default = "default_runtime")]
    pub container_runtime: String,
}

fn default_folder() -> String {
    "deploy".to_string()
}

fn default_runtime() -> String {
    deploykit::template::DEFAULT_RUNTIME.to_string()
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            folder: default_folder(),
            templater_image: String::new(),
            container_runtime: default_runtime(),
        }
    }
}

/// One deploy target
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    /// Namespace created and injected into templates; none when absent
    #[serde(default)]
    pub namespace: Option<String>,

    /// Cluster backend
    #[serde(default)]
    pub provisioner: ProvisionerConfig,

    /// Scripts runnable with `sanic run <name>`
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
}

// ============================================================================
// Loading & Validation
// ============================================================================

impl SanicConfig {
    /// Parse a config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).context("Invalid TOML format")?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.deploy.validate()?;

        if self.environments.is_empty() {
            bail!("No environments defined (add an [environments.<name>] table)");
        }

        for (name, env) in &self.environments {
            env.validate()
                .with_context(|| format!("Invalid environment '{name}'"))?;
        }

        if let Some(default) = &self.default_environment
            && !self.environments.contains_key(default)
        {
            bail!("default_environment '{default}' is not a defined environment");
        }

        Ok(())
    }

    fn expand_paths(&mut self) {
        for env in self.environments.values_mut() {
            let kubeconfig = match &mut env.provisioner {
                ProvisionerConfig::Minikube(cfg) => &mut cfg.kubeconfig,
                ProvisionerConfig::External(cfg) => &mut cfg.kubeconfig,
            };
            if let Some(path) = kubeconfig {
                *path = paths::expand(&path.to_string_lossy());
            }
        }
    }

    /// Names of all environments, sorted.
    pub fn environment_names(&self) -> Vec<&str> {
        self.environments.keys().map(String::as_str).collect()
    }
}

impl DeployConfig {
    /// Validate the deploy settings
    pub fn validate(&self) -> Result<()> {
        let folder = Path::new(&self.folder);
        if self.folder.trim().is_empty() || folder.is_absolute() {
            bail!("deploy.folder must be a non-empty path relative to the project root");
        }
        if self.container_runtime.trim().is_empty() {
            bail!("deploy.container_runtime cannot be empty");
        }
        Ok(())
    }

    /// The templater image, which deploys cannot do without.
    pub fn templater_image(&self) -> Result<&str> {
        let image = self.templater_image.trim();
        if image.is_empty() {
            bail!("deploy.templater_image is not set in {CONFIG_FILE}");
        }
        Ok(image)
    }
}

impl Environment {
    /// Validate one environment
    pub fn validate(&self) -> Result<()> {
        if let Some(ns) = &self.namespace
            && ns.trim() != ns
        {
            bail!("namespace '{ns}' has surrounding whitespace");
        }

        if let ProvisionerConfig::External(cfg) = &self.provisioner
            && cfg.registry.trim().is_empty()
        {
            bail!("external provisioner needs a registry");
        }

        for (name, script) in &self.commands {
            if script.trim().is_empty() {
                bail!("command '{name}' has an empty script");
            }
        }

        Ok(())
    }

    /// The namespace, if one is managed.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }
}

// ============================================================================
// Project
// ============================================================================

/// A loaded project: its root and configuration
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: SanicConfig,
}

impl Project {
    /// Find the project root and load its config.
    pub fn load(root_override: Option<&Path>) -> Result<Self> {
        let root = paths::project_root(root_override)?;
        let config = SanicConfig::load(&root.join(CONFIG_FILE))?;
        Ok(Self { root, config })
    }

    /// Select an environment by name, falling back to `default_environment`.
    pub fn environment(&self, name: Option<&str>) -> Result<(&str, &Environment)> {
        let name = name
            .filter(|n| !n.is_empty())
            .or(self.config.default_environment.as_deref())
            .with_context(|| {
                format!(
                    "No environment selected (use --env, SANIC_ENV or default_environment); available: {}",
                    self.config.environment_names().join(", ")
                )
            })?;

        match self.config.environments.get_key_value(name) {
            Some((name, env)) => Ok((name.as_str(), env)),
            None => bail!(
                "Environment '{name}' is not defined in {CONFIG_FILE}; available: {}",
                self.config.environment_names().join(", ")
            ),
        }
    }

    /// `<root>/<deploy.folder>`
    pub fn deploy_dir(&self) -> PathBuf {
        self.root.join(&self.config.deploy.folder)
    }

    /// Directory holding the templates
    pub fn input_dir(&self) -> PathBuf {
        self.deploy_dir().join("in")
    }

    /// Directory receiving the rendered manifests
    pub fn output_dir(&self) -> PathBuf {
        self.deploy_dir().join("out")
    }
}

// ============================================================================
// Tests
// ============================================================================
