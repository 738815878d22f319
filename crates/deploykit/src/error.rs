//! Error types for deploy operations.
//!
//! Every failure carries the context of the operation that produced it
//! (path, image, namespace, command line) so it can be diagnosed without
//! re-running the deploy. Errors are grouped into [`ErrorCategory`] values
//! for user feedback.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;

/// Categories of deploy errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or invalid environment / project configuration
    Configuration,
    /// The content state of the service directories could not be read
    SourceState,
    /// The templater image could not be pulled
    Image,
    /// Template selection, execution or publishing failed
    Template,
    /// The cluster could not be brought into a ready state
    ClusterLifecycle,
    /// Namespace creation failed
    Namespace,
    /// Manifest application failed
    Apply,
    /// No usable ingress node was found
    EdgeDiscovery,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Configuration => "Configuration error",
            Self::SourceState => "Could not read source state",
            Self::Image => "Templater image unavailable",
            Self::Template => "Template rendering failed",
            Self::ClusterLifecycle => "Cluster not ready",
            Self::Namespace => "Namespace creation failed",
            Self::Apply => "Manifest application failed",
            Self::EdgeDiscovery => "No edge routers found",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Configuration => "Check sanic.toml and the selected environment",
            Self::SourceState => "Make sure every service directory exists inside the project root",
            Self::Image => "Check the templater image name and your registry access",
            Self::Template => "Fix the reported template and deploy again",
            Self::ClusterLifecycle => "Check that the cluster tooling is installed and reachable",
            Self::Namespace => "Check your cluster permissions for namespaces",
            Self::Apply => "Inspect the kubectl output above and fix the manifests",
            Self::EdgeDiscovery => "Try reprovisioning your cluster or configure edge nodes",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while deploying.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration
    #[error("{0}")]
    Config(String),

    /// Build tag could not be computed from the service directories
    #[error("could not read source state at {}: {message}", .path.display())]
    SourceState {
        /// Directory or file that could not be read
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Templater image pull failed
    #[error("could not pull the templater image {image}: {message}")]
    ImagePull {
        /// Fully qualified image reference
        image: String,
        /// Underlying failure
        message: String,
    },

    /// Selection produced no template files
    #[error("no configuration files found in {}", .dir.display())]
    NoTemplates {
        /// Input directory that was searched
        dir: PathBuf,
    },

    /// Input directory missing or unreadable
    #[error("could not read template files at {}: {source}", .path.display())]
    TemplateInput {
        /// Path that could not be read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The templater failed to parse or execute a template
    #[error("could not generate the kubernetes configurations with {image}: {message}")]
    TemplateExecution {
        /// Templater image
        image: String,
        /// Templater output or the name of the template that produced nothing
        message: String,
    },

    /// A rendered file could not be written to the output directory
    #[error(
        "could not write {} (is the output directory writable and mounted?): {source}",
        .path.display()
    )]
    OutputWrite {
        /// Destination path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A scoped staging directory for the templater could not be created
    #[error("could not create a staging directory in {}: {source}", .path.display())]
    Staging {
        /// Parent directory of the staging area
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Cluster could not be readied
    #[error("cluster is not ready: {0}")]
    ClusterLifecycle(String),

    /// Namespace creation failed for a reason other than pre-existence
    #[error("namespace {namespace} couldn't be created: {output}")]
    Namespace {
        /// Namespace name
        namespace: String,
        /// Trimmed kubectl output
        output: String,
    },

    /// `kubectl apply` exited non-zero
    #[error("could not apply manifests in {}: {output}", .dir.display())]
    Apply {
        /// Manifest directory
        dir: PathBuf,
        /// Trimmed kubectl output
        output: String,
    },

    /// Edge node discovery failed or returned nothing
    #[error("could not find edge routers: {0}")]
    EdgeDiscovery(String),

    /// An external program could not be started
    #[error("failed to execute {command}: {source}")]
    CommandSpawn {
        /// Command line
        command: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A deploy stage failed; displays the inner error inline
    #[error("{stage} failed: {inner}")]
    Stage {
        /// The stage that was running
        stage: Stage,
        /// The error it produced
        inner: Box<Error>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get the error category.
    ///
    /// Stage wrappers report the category of the error they wrap. Errors
    /// without a category of their own, such as a tool that could not be
    /// started, take the category of the stage they failed in.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Configuration,
            Error::SourceState { .. } => ErrorCategory::SourceState,
            Error::ImagePull { .. } => ErrorCategory::Image,
            Error::NoTemplates { .. }
            | Error::TemplateInput { .. }
            | Error::TemplateExecution { .. }
            | Error::OutputWrite { .. }
            | Error::Staging { .. } => ErrorCategory::Template,
            Error::ClusterLifecycle(_) => ErrorCategory::ClusterLifecycle,
            Error::Namespace { .. } => ErrorCategory::Namespace,
            Error::Apply { .. } => ErrorCategory::Apply,
            Error::EdgeDiscovery(_) => ErrorCategory::EdgeDiscovery,
            Error::Stage { stage, inner } => match inner.category() {
                ErrorCategory::Other => stage_category(*stage),
                category => category,
            },
            Error::CommandSpawn { .. } | Error::Io(_) | Error::Json(_) => ErrorCategory::Other,
        }
    }

    /// The stage this error was raised in, if it passed through the pipeline.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub(crate) fn in_stage(self, stage: Stage) -> Self {
        Error::Stage {
            stage,
            inner: Box::new(self),
        }
    }

    pub(crate) fn source_state(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::SourceState {
            path: path.into(),
            message: message.into(),
        }
    }
}

fn stage_category(stage: Stage) -> ErrorCategory {
    match stage {
        Stage::ResolveEnvironment => ErrorCategory::Configuration,
        Stage::EnsureCluster => ErrorCategory::ClusterLifecycle,
        Stage::RenderTemplates => ErrorCategory::Template,
        Stage::EnsureNamespace => ErrorCategory::Namespace,
        Stage::ApplyManifests => ErrorCategory::Apply,
        Stage::DiscoverEdgeNodes => ErrorCategory::EdgeDiscovery,
    }
}

/// Result type for deploy operations.
pub type Result<T> = std::result::Result<T, Error>;
