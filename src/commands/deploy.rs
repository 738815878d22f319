use anyhow::Result;
use deploykit::{
    ApplyMode, CommandRunner, DeployObserver, DeployOutcome, DeployRequest, Deployer,
    NamespaceStatus, Stage, SystemRunner, provisioner,
};
use indicatif::ProgressBar;
use std::sync::Arc;

use crate::Context;
use crate::cli::DeployArgs;
use crate::config::Project;
use crate::paths;
use crate::progress;
use crate::ui;

/// Render the environment's manifests and apply them to its cluster.
pub fn run(ctx: &Context, args: DeployArgs) -> Result<()> {
    let project = Project::load(ctx.root.as_deref())?;
    let (env_name, env) = project.environment(ctx.env.as_deref())?;
    let templater_image = project.config.deploy.templater_image()?.to_string();

    let services = super::discover_services(&project)?;
    if services.is_empty() {
        ui::warn("No services found (directories containing a Dockerfile)");
    }

    let apply_mode = if args.prune {
        ui::warn("--prune deletes cluster objects that are missing from the rendered manifests");
        ApplyMode::Prune {
            selector: args.prune_selector,
        }
    } else {
        ApplyMode::Standard
    };

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let provisioner = provisioner::from_config(&env.provisioner, runner.clone())?;

    if !ctx.quiet {
        ui::header(&format!("Deploying to {env_name}"));
        ui::kv("Project", &paths::display(&project.root));
        ui::kv("Provisioner", provisioner.kind());
        ui::kv("Namespace", env.namespace().unwrap_or("(none)"));
        ui::kv("Services", &services.len().to_string());
        println!();
    }

    let deployer = Deployer::new(runner, provisioner.into())
        .with_runtime(&project.config.deploy.container_runtime);
    let request = DeployRequest {
        environment: env_name.to_string(),
        namespace: env.namespace().map(str::to_string),
        project_root: project.root.clone(),
        service_dirs: services.into_iter().map(|s| s.dir).collect(),
        input_dir: project.input_dir(),
        output_dir: project.output_dir(),
        templater_image,
        selection: args.templates,
        apply_mode,
    };

    let mut observer = TerminalObserver::new(ctx.quiet);
    let outcome = match deployer.deploy_observed(&request, &mut observer) {
        Ok(outcome) => outcome,
        Err(err) => {
            observer.fail();
            return Err(err.into());
        }
    };

    report(ctx, &outcome);
    Ok(())
}

fn report(ctx: &Context, outcome: &DeployOutcome) {
    if ctx.quiet {
        if let Some(endpoint) = &outcome.endpoint {
            println!("{endpoint}");
        }
        return;
    }

    println!();
    ui::kv("Build tag", outcome.build_tag.as_str());
    if let NamespaceStatus::Created(ns) = &outcome.namespace {
        ui::kv("Created namespace", ns);
    }
    if ctx.verbose > 0 {
        for path in &outcome.published {
            ui::dim(&paths::display(path));
        }
    }
    if !outcome.apply_output.is_empty() {
        ui::block(&outcome.apply_output);
    }

    match &outcome.endpoint {
        Some(endpoint) => ui::success(&format!(
            "Configured HTTP services are available at {endpoint}"
        )),
        None => ui::success(&format!(
            "Deployed {} manifest(s)",
            outcome.published.len()
        )),
    }
}

/// Prints numbered steps, with a spinner around stages that are silent.
struct TerminalObserver {
    quiet: bool,
    spinner: Option<(Stage, ProgressBar)>,
}

impl TerminalObserver {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            spinner: None,
        }
    }

    fn number(stage: Stage) -> usize {
        Stage::ALL.iter().position(|s| *s == stage).unwrap_or(0) + 1
    }

    /// Stages whose tools write to the terminal themselves.
    fn streams_output(stage: Stage) -> bool {
        matches!(stage, Stage::EnsureCluster | Stage::RenderTemplates)
    }

    fn fail(&mut self) {
        if let Some((stage, pb)) = self.spinner.take() {
            progress::finish_error(&pb, &ui::sentence(stage.description()));
        }
    }
}

impl DeployObserver for TerminalObserver {
    fn stage_started(&mut self, stage: Stage) {
        if self.quiet {
            return;
        }
        let label = ui::sentence(stage.description());
        if Self::streams_output(stage) {
            ui::step(Self::number(stage), Stage::ALL.len(), &label);
        } else {
            self.spinner = Some((stage, progress::spinner(&label)));
        }
    }

    fn stage_finished(&mut self, stage: Stage) {
        if let Some((_, pb)) = self.spinner.take() {
            let done = format!("[{}/{}] {}", Self::number(stage), Stage::ALL.len(), stage);
            progress::finish_success(&pb, &ui::sentence(&done));
        }
    }

    fn stage_skipped(&mut self, stage: Stage, reason: &str) {
        if !self.quiet {
            ui::dim(&format!("skipped {stage}: {reason}"));
        }
    }
}
