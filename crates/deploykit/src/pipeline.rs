//! The deploy pipeline.
//!
//! A deploy is a fixed, linear sequence of [`Stage`]s run against one
//! provisioner:
//!
//! ```text
//! ResolveEnvironment → EnsureCluster → RenderTemplates → EnsureNamespace
//!     → ApplyManifests → DiscoverEdgeNodes → done
//! ```
//!
//! The first failure stops the pipeline and is returned wrapped in
//! [`Error::Stage`]. Nothing is retried or rolled back; running the deploy
//! again converges because every stage is idempotent.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::apply::{self, ApplyMode};
use crate::buildtag::{self, BuildTag};
use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::namespace::{self, NamespaceStatus};
use crate::provisioner::Provisioner;
use crate::template::{RenderRequest, Renderer, TemplateContext};

/// Mode of the output directory when it has to be created.
const OUTPUT_DIR_MODE: u32 = 0o750;

/// A step of the deploy pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ResolveEnvironment,
    EnsureCluster,
    RenderTemplates,
    EnsureNamespace,
    ApplyManifests,
    DiscoverEdgeNodes,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::ResolveEnvironment,
        Stage::EnsureCluster,
        Stage::RenderTemplates,
        Stage::EnsureNamespace,
        Stage::ApplyManifests,
        Stage::DiscoverEdgeNodes,
    ];

    /// Present-participle description used in messages.
    pub fn description(self) -> &'static str {
        match self {
            Stage::ResolveEnvironment => "resolving environment",
            Stage::EnsureCluster => "ensuring cluster",
            Stage::RenderTemplates => "rendering templates",
            Stage::EnsureNamespace => "ensuring namespace",
            Stage::ApplyManifests => "applying manifests",
            Stage::DiscoverEdgeNodes => "discovering edge nodes",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Receives progress notifications while a deploy runs.
///
/// All methods default to doing nothing.
pub trait DeployObserver {
    /// A stage is about to run.
    fn stage_started(&mut self, _stage: Stage) {}

    /// A stage completed successfully.
    fn stage_finished(&mut self, _stage: Stage) {}

    /// A stage does not apply to this deploy.
    fn stage_skipped(&mut self, _stage: Stage, _reason: &str) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoObserver;

impl DeployObserver for NoObserver {}

/// Everything one deploy needs to know.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Environment name
    pub environment: String,
    /// Environment namespace; `None` disables namespace management
    pub namespace: Option<String>,
    /// Project root
    pub project_root: PathBuf,
    /// Service directories that make up the build tag
    pub service_dirs: Vec<PathBuf>,
    /// Directory holding the templates
    pub input_dir: PathBuf,
    /// Directory receiving the rendered manifests
    pub output_dir: PathBuf,
    /// Templater image reference
    pub templater_image: String,
    /// Explicit template selection; empty selects every `*.tmpl`
    pub selection: Vec<String>,
    /// How manifests are applied
    pub apply_mode: ApplyMode,
}

/// What a successful deploy did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    /// Build tag stamped into the manifests
    pub build_tag: BuildTag,
    /// Published manifests
    pub published: Vec<PathBuf>,
    /// Namespace handling result
    pub namespace: NamespaceStatus,
    /// `kubectl apply` output
    pub apply_output: String,
    /// Where HTTP services can be reached, for providers with edge nodes
    pub endpoint: Option<String>,
}

/// Runs the deploy pipeline against one provisioner.
pub struct Deployer {
    runner: Arc<dyn CommandRunner>,
    provisioner: Arc<dyn Provisioner>,
    renderer: Renderer,
}

impl Deployer {
    /// Create a deployer using the default container runtime.
    pub fn new(runner: Arc<dyn CommandRunner>, provisioner: Arc<dyn Provisioner>) -> Self {
        let renderer = Renderer::new(runner.clone());
        Self {
            runner,
            provisioner,
            renderer,
        }
    }

    /// Render with another docker-compatible container runtime.
    #[must_use]
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.renderer = self.renderer.with_runtime(runtime);
        self
    }

    /// The provisioner this deployer targets.
    pub fn provisioner(&self) -> &dyn Provisioner {
        self.provisioner.as_ref()
    }

    /// Run the whole pipeline without progress reporting.
    pub fn deploy(&self, request: &DeployRequest) -> Result<DeployOutcome> {
        self.deploy_observed(request, &mut NoObserver)
    }

    /// Run the whole pipeline, reporting progress to `observer`.
    pub fn deploy_observed(
        &self,
        request: &DeployRequest,
        observer: &mut dyn DeployObserver,
    ) -> Result<DeployOutcome> {
        let provisioner = self.provisioner.as_ref();
        let runner = self.runner.as_ref();

        run_stage(observer, Stage::ResolveEnvironment, || {
            resolve_environment(request)
        })?;

        run_stage(observer, Stage::EnsureCluster, || provisioner.ensure_cluster())?;

        let (build_tag, render) = run_stage(observer, Stage::RenderTemplates, || {
            let build_tag = buildtag::compute(&request.project_root, &request.service_dirs)?;
            let context = TemplateContext {
                environment: request.environment.clone(),
                registry_host: provisioner.registry()?,
                image_tag: build_tag.to_string(),
                project_dir: provisioner.in_cluster_dir(&request.project_root),
                namespace: request.namespace.clone(),
            };
            let render_request = RenderRequest {
                input_dir: request.input_dir.clone(),
                output_dir: request.output_dir.clone(),
                image: request.templater_image.clone(),
                selection: request.selection.clone(),
            };
            let render = self.renderer.render(&render_request, &context)?;
            Ok((build_tag, render))
        })?;

        let namespace = match request.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            Some(ns) => run_stage(observer, Stage::EnsureNamespace, || {
                namespace::ensure(runner, provisioner, Some(ns))
            })?,
            None => {
                observer.stage_skipped(Stage::EnsureNamespace, "no namespace configured");
                NamespaceStatus::Unmanaged
            }
        };

        let apply_output = run_stage(observer, Stage::ApplyManifests, || {
            apply::apply(runner, provisioner, &request.output_dir, &request.apply_mode)
        })?;

        let endpoint = if provisioner.supports_edge_nodes() {
            let node = run_stage(observer, Stage::DiscoverEdgeNodes, || {
                first_edge_node(provisioner)
            })?;
            Some(format!("http://{node}"))
        } else {
            observer.stage_skipped(
                Stage::DiscoverEdgeNodes,
                &format!("{} clusters have no edge nodes", provisioner.kind()),
            );
            None
        };

        Ok(DeployOutcome {
            build_tag,
            published: render.published,
            namespace,
            apply_output,
            endpoint,
        })
    }
}

fn run_stage<T>(
    observer: &mut dyn DeployObserver,
    stage: Stage,
    body: impl FnOnce() -> Result<T>,
) -> Result<T> {
    log::info!("{stage}");
    observer.stage_started(stage);
    let value = body().map_err(|e| e.in_stage(stage))?;
    observer.stage_finished(stage);
    Ok(value)
}

fn resolve_environment(request: &DeployRequest) -> Result<()> {
    if request.environment.trim().is_empty() {
        return Err(Error::Config("no environment selected".to_string()));
    }
    if !request.input_dir.is_dir() {
        return Err(Error::Config(format!(
            "template directory {} does not exist (templates live in <project>/<deploy folder>/in)",
            request.input_dir.display()
        )));
    }
    create_output_dir(&request.output_dir)
}

fn create_output_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    let write_err = |source: std::io::Error| Error::OutputWrite {
        path: dir.to_path_buf(),
        source,
    };

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(OUTPUT_DIR_MODE);
    }
    builder.create(dir).map_err(write_err)?;
    log::debug!("created output directory {} ({OUTPUT_DIR_MODE:o})", dir.display());
    Ok(())
}

fn first_edge_node(provisioner: &dyn Provisioner) -> Result<String> {
    let nodes = provisioner.edge_nodes().map_err(|err| match err {
        err @ Error::EdgeDiscovery(_) => err,
        other => Error::EdgeDiscovery(other.to_string()),
    })?;
    nodes.into_iter().next().ok_or_else(|| {
        Error::EdgeDiscovery(
            "there are no edge routers in this environment. Try reprovisioning your cluster"
                .to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::exec::CommandOutput;
    use crate::testing::{FakeProvisioner, FakeRunner};
    use crate::template::GENERATED_BANNER;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl DeployObserver for Recorder {
        fn stage_started(&mut self, stage: Stage) {
            self.events.push(format!("start {stage}"));
        }

        fn stage_finished(&mut self, stage: Stage) {
            self.events.push(format!("done {stage}"));
        }

        fn stage_skipped(&mut self, stage: Stage, _reason: &str) {
            self.events.push(format!("skip {stage}"));
        }
    }

    fn project() -> (TempDir, DeployRequest) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        fs::create_dir_all(root.join("api")).unwrap();
        fs::write(root.join("api/Dockerfile"), "FROM scratch\n").unwrap();
        fs::create_dir_all(root.join("deploy/in")).unwrap();
        fs::write(
            root.join("deploy/in/deployment.yaml.tmpl"),
            "image: {{getenv \"REGISTRY_HOST\"}}/api:{{getenv \"IMAGE_TAG\"}}\n\
             namespace: {{getenv \"NAMESPACE\"}}\n",
        )
        .unwrap();

        let request = DeployRequest {
            environment: "dev".to_string(),
            namespace: Some("dev".to_string()),
            project_root: root.clone(),
            service_dirs: vec![root.join("api")],
            input_dir: root.join("deploy/in"),
            output_dir: root.join("deploy/out"),
            templater_image: "sanic/templater".to_string(),
            selection: Vec::new(),
            apply_mode: ApplyMode::Standard,
        };
        (tmp, request)
    }

    fn deployer(runner: &Arc<FakeRunner>, provisioner: &Arc<FakeProvisioner>) -> Deployer {
        Deployer::new(runner.clone(), provisioner.clone())
    }

    #[test]
    fn test_local_deploy_end_to_end() {
        let (_tmp, request) = project();
        let runner = Arc::new(FakeRunner::new());
        let provisioner = Arc::new(FakeProvisioner::local());
        let mut recorder = Recorder::default();

        let outcome = deployer(&runner, &provisioner)
            .deploy_observed(&request, &mut recorder)
            .unwrap();

        let manifest = fs::read_to_string(request.output_dir.join("deployment.yaml")).unwrap();
        assert!(manifest.starts_with(GENERATED_BANNER));
        assert!(manifest.contains(&format!("192.168.49.2:5000/api:{}", outcome.build_tag)));
        assert!(manifest.contains("namespace: dev"));
        assert_eq!(outcome.endpoint, None);
        assert_eq!(outcome.namespace, NamespaceStatus::Created("dev".to_string()));
        assert_eq!(provisioner.edge_calls(), 0);
        assert_eq!(
            recorder.events.last().map(String::as_str),
            Some("skip discovering edge nodes")
        );
        assert!(runner.called("kubectl", &["apply", "-f"]));
    }

    #[test]
    fn test_in_cluster_project_dir_is_injected() {
        let (_tmp, request) = project();
        let runner = Arc::new(FakeRunner::new());
        let provisioner = Arc::new(FakeProvisioner::local());
        deployer(&runner, &provisioner).deploy(&request).unwrap();

        let project_dir = provisioner.in_cluster_dir(&request.project_root);
        let expected = format!("PROJECT_DIR={}", project_dir.display());
        assert!(runner.called("docker", &["-e", expected.as_str()]));
    }

    #[test]
    fn test_remote_deploy_reports_first_edge_node() {
        let (_tmp, request) = project();
        let runner = Arc::new(FakeRunner::new());
        let provisioner = Arc::new(FakeProvisioner::remote(&["34.1.2.3", "34.1.2.4"]));

        let outcome = deployer(&runner, &provisioner).deploy(&request).unwrap();
        assert_eq!(outcome.endpoint.as_deref(), Some("http://34.1.2.3"));
        assert_eq!(provisioner.edge_calls(), 1);
    }

    #[test]
    fn test_remote_without_edge_nodes_fails() {
        let (_tmp, request) = project();
        let runner = Arc::new(FakeRunner::new());
        let provisioner = Arc::new(FakeProvisioner::remote(&[]));

        let err = deployer(&runner, &provisioner).deploy(&request).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::EdgeDiscovery);
        assert_eq!(err.stage(), Some(Stage::DiscoverEdgeNodes));
        assert!(err.to_string().contains("no edge routers"));
    }

    #[test]
    fn test_missing_tools_report_their_stage() {
        let cases = [
            ("docker", Some("dev"), Stage::RenderTemplates, ErrorCategory::Image),
            ("kubectl", Some("dev"), Stage::EnsureNamespace, ErrorCategory::Namespace),
            ("kubectl", None, Stage::ApplyManifests, ErrorCategory::Apply),
        ];
        for (program, namespace, stage, category) in cases {
            let (_tmp, mut request) = project();
            request.namespace = namespace.map(str::to_string);
            let runner = Arc::new(FakeRunner::new());
            runner.missing(program);
            let provisioner = Arc::new(FakeProvisioner::local());

            let err = deployer(&runner, &provisioner).deploy(&request).unwrap_err();
            assert_eq!(err.stage(), Some(stage), "{program}");
            assert_eq!(err.category(), category, "{program}");
        }
    }

    #[test]
    fn test_namespace_skipped_when_unset() {
        let (_tmp, mut request) = project();
        request.namespace = None;
        let runner = Arc::new(FakeRunner::new());
        let provisioner = Arc::new(FakeProvisioner::local());
        let mut recorder = Recorder::default();

        let outcome = deployer(&runner, &provisioner)
            .deploy_observed(&request, &mut recorder)
            .unwrap();

        assert_eq!(outcome.namespace, NamespaceStatus::Unmanaged);
        assert!(!runner.called("kubectl", &["create", "namespace"]));
        assert!(recorder.events.contains(&"skip ensuring namespace".to_string()));
        let manifest = fs::read_to_string(request.output_dir.join("deployment.yaml")).unwrap();
        assert!(manifest.contains(crate::template::NAMESPACE_SENTINEL));
    }

    #[test]
    fn test_cluster_failure_stops_before_render() {
        let (_tmp, request) = project();
        let runner = Arc::new(FakeRunner::new());
        let provisioner = Arc::new(FakeProvisioner {
            ensure_error: Some("minikube not installed".to_string()),
            ..FakeProvisioner::local()
        });

        let err = deployer(&runner, &provisioner).deploy(&request).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::EnsureCluster));
        assert_eq!(err.category(), ErrorCategory::ClusterLifecycle);
        assert!(runner.calls().is_empty());
        assert!(!request.output_dir.join("deployment.yaml").exists());
    }

    #[test]
    fn test_apply_failure_is_annotated() {
        let (_tmp, request) = project();
        let runner = Arc::new(FakeRunner::new());
        runner.on("kubectl", &["apply"], CommandOutput::failed("invalid manifest"));
        let provisioner = Arc::new(FakeProvisioner::local());

        let err = deployer(&runner, &provisioner).deploy(&request).unwrap_err();
        assert!(err.to_string().starts_with("applying manifests failed"));
        assert_eq!(err.category(), ErrorCategory::Apply);
    }

    #[test]
    fn test_missing_input_dir_is_config_error() {
        let (_tmp, mut request) = project();
        request.input_dir = request.project_root.join("nowhere/in");
        let runner = Arc::new(FakeRunner::new());
        let provisioner = Arc::new(FakeProvisioner::local());

        let err = deployer(&runner, &provisioner).deploy(&request).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::ResolveEnvironment));
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[cfg(unix)]
    #[test]
    fn test_output_dir_created_with_restricted_mode() {
        use std::os::unix::fs::PermissionsExt;

        let (_tmp, request) = project();
        let runner = Arc::new(FakeRunner::new());
        let provisioner = Arc::new(FakeProvisioner::local());
        deployer(&runner, &provisioner).deploy(&request).unwrap();

        let mode = fs::metadata(&request.output_dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o027, 0);
    }

    #[test]
    fn test_tag_follows_service_content() {
        let (_tmp, request) = project();
        let runner = Arc::new(FakeRunner::new());
        let provisioner = Arc::new(FakeProvisioner::local());
        let deployer = deployer(&runner, &provisioner);

        let first = deployer.deploy(&request).unwrap().build_tag;
        fs::write(request.project_root.join("api/main.go"), "package main\n").unwrap();
        let second = deployer.deploy(&request).unwrap().build_tag;
        assert_ne!(first, second);
    }
}
