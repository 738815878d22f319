//! End-to-end deploys through the public API with scripted tooling.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use deploykit::provisioner::minikube::host_mount_path;
use deploykit::template::GENERATED_BANNER;
use deploykit::{
    ApplyMode, CommandOutput, CommandRunner, DeployRequest, Deployer, ErrorCategory,
    ExternalCommand, NamespaceStatus, Provisioner, Result, Stage,
};
use tempfile::TempDir;

/// Plays docker and kubectl: namespaces are remembered so a second create
/// fails like the real thing, and `docker run` expands `{{getenv "X"}}`.
#[derive(Default)]
struct ScriptedCluster {
    log: Mutex<Vec<String>>,
    namespaces: Mutex<Vec<String>>,
}

impl ScriptedCluster {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn count(&self, needle: &str) -> usize {
        self.log().iter().filter(|line| line.contains(needle)).count()
    }

    fn kubectl(&self, args: &[String]) -> CommandOutput {
        let position = args.iter().position(|a| a == "namespace");
        if let Some(ns) = position.and_then(|i| args.get(i + 1)) {
            let mut namespaces = self.namespaces.lock().unwrap();
            if namespaces.contains(ns) {
                return CommandOutput::failed(format!(
                    "Error from server (AlreadyExists): namespaces \"{ns}\" already exists"
                ));
            }
            namespaces.push(ns.clone());
            return CommandOutput::ok(format!("namespace/{ns} created"));
        }
        CommandOutput::ok("deployment.apps/api configured\n")
    }

    fn templater(args: &[String]) -> CommandOutput {
        let mut mounts = HashMap::new();
        let mut vars = Vec::new();
        for pair in args.windows(2) {
            match pair[0].as_str() {
                "-v" => {
                    let (host, guest) = pair[1].split_once(':').unwrap();
                    mounts.insert(guest.trim_end_matches(":ro").to_string(), PathBuf::from(host));
                }
                "-e" => vars.push(pair[1].split_once('=').unwrap()),
                _ => {}
            }
        }

        for entry in fs::read_dir(&mounts["/in"]).unwrap() {
            let path = entry.unwrap().path();
            let mut text = fs::read_to_string(&path).unwrap();
            for (key, value) in &vars {
                text = text.replace(&format!("{{{{getenv \"{key}\"}}}}"), value);
            }
            let name = path.file_name().unwrap().to_string_lossy();
            let name = name.strip_suffix(".tmpl").unwrap_or(&name);
            fs::write(mounts["/out"].join(name), text).unwrap();
        }
        CommandOutput::ok("")
    }
}

impl CommandRunner for ScriptedCluster {
    fn output(&self, command: &ExternalCommand) -> Result<CommandOutput> {
        self.log.lock().unwrap().push(command.to_string());
        Ok(match command.program.as_str() {
            "kubectl" => self.kubectl(&command.args),
            "docker" if command.args.first().map(String::as_str) == Some("run") => {
                Self::templater(&command.args)
            }
            _ => CommandOutput::ok(""),
        })
    }

    fn stream(&self, command: &ExternalCommand) -> Result<bool> {
        self.log.lock().unwrap().push(command.to_string());
        Ok(true)
    }
}

/// Local-style provisioner: no edge nodes, `/home` visible as `/hosthome`.
struct Laptop;

impl Provisioner for Laptop {
    fn kind(&self) -> &'static str {
        "laptop"
    }

    fn ensure_cluster(&self) -> Result<()> {
        Ok(())
    }

    fn registry(&self) -> Result<String> {
        Ok("192.168.49.2:5000".to_string())
    }

    fn kube_config_location(&self) -> PathBuf {
        PathBuf::from("/k/laptop")
    }

    fn cluster_command(&self, args: &[&str]) -> ExternalCommand {
        ExternalCommand::new("kubectl")
            .args(["--kubeconfig", "/k/laptop"])
            .args(args.iter().copied())
    }

    fn in_cluster_dir(&self, local_root: &Path) -> PathBuf {
        host_mount_path(local_root)
    }

    fn supports_edge_nodes(&self) -> bool {
        false
    }

    fn edge_nodes(&self) -> Result<Vec<String>> {
        panic!("local clusters are never asked for edge nodes")
    }
}

/// Remote-style provisioner with a fixed edge list.
struct Datacenter(Vec<String>);

impl Provisioner for Datacenter {
    fn kind(&self) -> &'static str {
        "datacenter"
    }

    fn ensure_cluster(&self) -> Result<()> {
        Ok(())
    }

    fn registry(&self) -> Result<String> {
        Ok("registry.example.com".to_string())
    }

    fn kube_config_location(&self) -> PathBuf {
        PathBuf::from("/k/prod")
    }

    fn cluster_command(&self, args: &[&str]) -> ExternalCommand {
        ExternalCommand::new("kubectl")
            .args(["--kubeconfig", "/k/prod"])
            .args(args.iter().copied())
    }

    fn in_cluster_dir(&self, local_root: &Path) -> PathBuf {
        local_root.to_path_buf()
    }

    fn edge_nodes(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

fn project() -> (TempDir, DeployRequest) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    for service in ["api", "worker"] {
        fs::create_dir_all(root.join("services").join(service)).unwrap();
        fs::write(root.join("services").join(service).join("Dockerfile"), "FROM scratch\n")
            .unwrap();
    }
    fs::create_dir_all(root.join("deploy/in")).unwrap();
    fs::write(
        root.join("deploy/in/deployment.yaml.tmpl"),
        "image: {{getenv \"REGISTRY_HOST\"}}/api:{{getenv \"IMAGE_TAG\"}}\n\
         env: {{getenv \"SANIC_ENV\"}}\n",
    )
    .unwrap();
    fs::write(root.join("deploy/in/service.yaml.tmpl"), "kind: Service\n").unwrap();
    fs::write(root.join("deploy/in/README.md"), "not a template\n").unwrap();

    let service_dirs = deploykit::services::discover(&root, &[])
        .unwrap()
        .into_iter()
        .map(|s| s.dir)
        .collect();

    let request = DeployRequest {
        environment: "ci".to_string(),
        namespace: Some("ci".to_string()),
        service_dirs,
        input_dir: root.join("deploy/in"),
        output_dir: root.join("deploy/out"),
        project_root: root,
        templater_image: "sanic/templater".to_string(),
        selection: Vec::new(),
        apply_mode: ApplyMode::Standard,
    };
    (tmp, request)
}

#[test]
fn test_local_deploy_renders_applies_and_skips_edge_discovery() {
    let (_tmp, request) = project();
    let cluster = Arc::new(ScriptedCluster::default());
    let deployer = Deployer::new(cluster.clone(), Arc::new(Laptop));

    let outcome = deployer.deploy(&request).unwrap();

    assert_eq!(outcome.endpoint, None);
    assert_eq!(outcome.published.len(), 2);
    assert_eq!(outcome.apply_output, "deployment.apps/api configured");

    let manifest = fs::read_to_string(request.output_dir.join("deployment.yaml")).unwrap();
    let lines: Vec<_> = manifest.lines().collect();
    assert_eq!(lines[0], GENERATED_BANNER);
    assert_eq!(lines[1], format!("image: 192.168.49.2:5000/api:{}", outcome.build_tag));
    assert_eq!(lines[2], "env: dev");
    assert!(!request.output_dir.join("README.md").exists());
}

#[test]
fn test_redeploy_is_idempotent() {
    let (_tmp, request) = project();
    let cluster = Arc::new(ScriptedCluster::default());
    let deployer = Deployer::new(cluster.clone(), Arc::new(Laptop));

    let first = deployer.deploy(&request).unwrap();
    let second = deployer.deploy(&request).unwrap();

    assert_eq!(first.build_tag, second.build_tag);
    assert_eq!(first.namespace, NamespaceStatus::Created("ci".to_string()));
    assert_eq!(second.namespace, NamespaceStatus::AlreadyExists("ci".to_string()));
    assert_eq!(cluster.count("apply -f"), 2);
}

#[test]
fn test_selected_template_replaces_previous_manifests() {
    let (_tmp, mut request) = project();
    let cluster = Arc::new(ScriptedCluster::default());
    let deployer = Deployer::new(cluster, Arc::new(Laptop));

    deployer.deploy(&request).unwrap();
    request.selection = vec!["service.yaml.tmpl".to_string()];
    deployer.deploy(&request).unwrap();

    let mut left: Vec<_> = fs::read_dir(&request.output_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    left.sort();
    assert_eq!(left, vec!["service.yaml"]);
}

#[test]
fn test_remote_deploy_reports_edge_endpoint() {
    let (_tmp, request) = project();
    let cluster = Arc::new(ScriptedCluster::default());
    let provisioner = Datacenter(vec!["34.1.2.3".to_string()]);

    let outcome = Deployer::new(cluster.clone(), Arc::new(provisioner))
        .deploy(&request)
        .unwrap();

    assert_eq!(outcome.endpoint.as_deref(), Some("http://34.1.2.3"));
    assert!(cluster.log().iter().all(|line| !line.contains("/k/laptop")));
}

#[test]
fn test_remote_deploy_without_edge_nodes_fails_after_apply() {
    let (_tmp, request) = project();
    let cluster = Arc::new(ScriptedCluster::default());

    let err = Deployer::new(cluster.clone(), Arc::new(Datacenter(Vec::new())))
        .deploy(&request)
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::EdgeDiscovery);
    assert_eq!(err.stage(), Some(Stage::DiscoverEdgeNodes));
    assert_eq!(cluster.count("apply -f"), 1);
}

#[test]
fn test_empty_template_set_changes_nothing() {
    let (_tmp, mut request) = project();
    request.selection = vec!["missing.tmpl".to_string()];
    let cluster = Arc::new(ScriptedCluster::default());

    let err = Deployer::new(cluster.clone(), Arc::new(Laptop))
        .deploy(&request)
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::RenderTemplates));
    assert!(err.to_string().contains("no configuration files found"));
    assert!(cluster.log().is_empty());
}
