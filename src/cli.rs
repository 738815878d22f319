use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sanic")]
#[command(author = "Sanic Contributors")]
#[command(version)]
#[command(about = "Deploy a project's services to local and remote Kubernetes environments", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Project root (defaults to the nearest directory containing sanic.toml)
    #[arg(long, global = true, env = "SANIC_ROOT", value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Environment from sanic.toml to use
    #[arg(short, long, global = true, env = "SANIC_ENV", value_name = "NAME")]
    pub env: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Render the deploy templates and apply them to the environment's cluster
    Deploy(DeployArgs),

    /// Run a script configured for the environment
    Run(RunArgs),

    /// Print the build tag of the current working tree
    Tag,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct DeployArgs {
    /// Template files to render (default: every *.tmpl in <deploy folder>/in)
    #[arg(value_name = "TEMPLATE")]
    pub templates: Vec<String>,

    /// Delete cluster objects that are no longer part of the rendered manifests
    #[arg(long)]
    pub prune: bool,

    /// Only prune objects matching this label selector
    #[arg(long, requires = "prune", value_name = "SELECTOR")]
    pub prune_selector: Option<String>,
}

#[derive(Args)]
pub struct RunArgs {
    /// Name of the command in the environment's [commands] table
    pub name: String,

    /// Arguments passed to the script
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
