//! Test doubles shared by the unit tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;
use crate::exec::{CommandOutput, CommandRunner, ExternalCommand};
use crate::provisioner::Provisioner;

struct Rule {
    program: String,
    args: Vec<String>,
    output: CommandOutput,
    once: bool,
}

/// Records every command and answers from scripted rules.
///
/// Unmatched commands succeed with empty output. A `<runtime> run` carrying
/// `/in` and `/out` mounts is answered by a tiny templater that expands
/// `{{getenv "VAR"}}` using the `-e` variables. Programs marked
/// [`missing`](Self::missing) fail to spawn, as if not installed.
#[derive(Default)]
pub(crate) struct FakeRunner {
    calls: Mutex<Vec<ExternalCommand>>,
    streamed: Mutex<Vec<ExternalCommand>>,
    rules: Mutex<Vec<Rule>>,
    missing: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer commands for `program` whose args contain `args` with `output`.
    pub(crate) fn on(&self, program: &str, args: &[&str], output: CommandOutput) -> &Self {
        self.push(program, args, output, false)
    }

    /// Like [`on`](Self::on), but the rule is used for one matching call only.
    pub(crate) fn once(&self, program: &str, args: &[&str], output: CommandOutput) -> &Self {
        self.push(program, args, output, true)
    }

    /// Make every invocation of `program` fail to spawn.
    pub(crate) fn missing(&self, program: &str) -> &Self {
        self.missing.lock().unwrap().push(program.to_string());
        self
    }

    fn spawn(&self, command: &ExternalCommand) -> Result<()> {
        if self.missing.lock().unwrap().contains(&command.program) {
            return Err(crate::Error::CommandSpawn {
                command: command.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Ok(())
    }

    fn push(&self, program: &str, args: &[&str], output: CommandOutput, once: bool) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            output,
            once,
        });
        self
    }

    pub(crate) fn calls(&self) -> Vec<ExternalCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn streamed(&self) -> Vec<ExternalCommand> {
        self.streamed.lock().unwrap().clone()
    }

    pub(crate) fn called(&self, program: &str, args: &[&str]) -> bool {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .chain(self.streamed.lock().unwrap().iter())
            .any(|c| c.program == program && c.has_args(args))
    }

    fn answer(&self, command: &ExternalCommand) -> CommandOutput {
        let mut rules = self.rules.lock().unwrap();
        let scripted = rules.iter().position(|r| {
            r.program == command.program
                && command.has_args(&r.args.iter().map(String::as_str).collect::<Vec<_>>())
        });
        if let Some(index) = scripted {
            let output = rules[index].output.clone();
            if rules[index].once {
                rules.remove(index);
            }
            return output;
        }
        drop(rules);

        if command.args.first().map(String::as_str) == Some("run") {
            if let Some(output) = emulate_templater(command) {
                return output;
            }
        }
        CommandOutput::ok("")
    }
}

impl CommandRunner for FakeRunner {
    fn output(&self, command: &ExternalCommand) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.clone());
        self.spawn(command)?;
        Ok(self.answer(command))
    }

    fn stream(&self, command: &ExternalCommand) -> Result<bool> {
        self.streamed.lock().unwrap().push(command.clone());
        self.spawn(command)?;
        Ok(self.answer(command).success)
    }
}

fn emulate_templater(command: &ExternalCommand) -> Option<CommandOutput> {
    let mut input = None;
    let mut output = None;
    let mut vars = Vec::new();

    let mut args = command.args.iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-v" => {
                let mount = args.next()?;
                if let Some(host) = mount.strip_suffix(":/in:ro") {
                    input = Some(PathBuf::from(host));
                } else if let Some(host) = mount.strip_suffix(":/out") {
                    output = Some(PathBuf::from(host));
                }
            }
            "-e" => {
                let (key, value) = args.next()?.split_once('=')?;
                vars.push((key.to_string(), value.to_string()));
            }
            _ => {}
        }
    }

    let (input, output) = (input?, output?);
    for entry in fs::read_dir(&input).ok()? {
        let path = entry.ok()?.path();
        let name = path.file_name()?.to_string_lossy().to_string();
        let mut content = fs::read_to_string(&path).ok()?;
        for (key, value) in &vars {
            content = content.replace(&format!("{{{{getenv \"{key}\"}}}}"), value);
        }
        let published = name.strip_suffix(".tmpl").unwrap_or(&name).to_string();
        fs::write(output.join(published), content).ok()?;
    }
    Some(CommandOutput::ok(""))
}

/// Provisioner with canned answers that counts edge-node lookups.
pub(crate) struct FakeProvisioner {
    pub(crate) local: bool,
    pub(crate) edge: Vec<String>,
    pub(crate) registry: String,
    pub(crate) ensure_error: Option<String>,
    pub(crate) edge_calls: AtomicUsize,
}

impl FakeProvisioner {
    pub(crate) fn local() -> Self {
        Self {
            local: true,
            edge: Vec::new(),
            registry: "192.168.49.2:5000".to_string(),
            ensure_error: None,
            edge_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn remote(edge: &[&str]) -> Self {
        Self {
            local: false,
            edge: edge.iter().map(|e| e.to_string()).collect(),
            registry: "registry.example.com".to_string(),
            ensure_error: None,
            edge_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn edge_calls(&self) -> usize {
        self.edge_calls.load(Ordering::SeqCst)
    }
}

impl Provisioner for FakeProvisioner {
    fn kind(&self) -> &'static str {
        if self.local { "fake-local" } else { "fake-remote" }
    }

    fn ensure_cluster(&self) -> Result<()> {
        match &self.ensure_error {
            Some(message) => Err(crate::Error::ClusterLifecycle(message.clone())),
            None => Ok(()),
        }
    }

    fn registry(&self) -> Result<String> {
        Ok(self.registry.clone())
    }

    fn kube_config_location(&self) -> PathBuf {
        PathBuf::from("/tmp/fake-kubeconfig")
    }

    fn cluster_command(&self, args: &[&str]) -> ExternalCommand {
        ExternalCommand::new("kubectl")
            .arg("--kubeconfig")
            .arg(self.kube_config_location().display().to_string())
            .args(args.iter().copied())
    }

    fn in_cluster_dir(&self, local_root: &Path) -> PathBuf {
        Path::new("/cluster").join(local_root.strip_prefix("/").unwrap_or(local_root))
    }

    fn supports_edge_nodes(&self) -> bool {
        !self.local
    }

    fn edge_nodes(&self) -> Result<Vec<String>> {
        self.edge_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.edge.clone())
    }
}
