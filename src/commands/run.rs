use anyhow::{Result, bail};
use std::process::ExitCode;

use crate::Context;
use crate::cli::RunArgs;
use crate::config::Project;
use crate::runner;

/// Most suggestions shown for an unknown command name.
const MAX_SUGGESTIONS: usize = 6;

/// Run a script from the environment's `[commands]` table.
///
/// The script's exit code becomes sanic's exit code.
pub fn run(ctx: &Context, args: RunArgs) -> Result<ExitCode> {
    let project = Project::load(ctx.root.as_deref())?;
    let (env_name, env) = project.environment(ctx.env.as_deref())?;

    let Some(script) = env.commands.get(&args.name) else {
        if env.commands.is_empty() {
            bail!("Environment {env_name} has no commands configured");
        }
        let suggestions = closest(&args.name, env.commands.keys().map(String::as_str));
        bail!(
            "Command {} was not found in environment {env_name}. Did you mean one of [{}]?",
            args.name,
            suggestions.join("|")
        );
    };

    let root = project.root.display().to_string();
    let status = runner::run_script(
        script,
        &args.args,
        &project.root,
        &[("SANIC_ENV", env_name), ("SANIC_ROOT", root.as_str())],
    )?;
    Ok(ExitCode::from(runner::exit_code(status)))
}

/// Candidate names ordered by edit distance to `name`, at most six.
fn closest<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut ranked: Vec<(usize, &str)> = candidates
        .map(|candidate| (strsim::levenshtein(name, candidate), candidate))
        .collect();
    ranked.sort_unstable();
    ranked
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, candidate)| candidate)
        .collect()
}
