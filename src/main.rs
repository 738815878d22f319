mod cli;
mod commands;
mod config;
mod paths;
mod progress;
mod runner;
mod ui;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Explicit project root (`--root` / `SANIC_ROOT`)
    pub root: Option<PathBuf>,
    /// Explicit environment (`--env` / `SANIC_ENV`)
    pub env: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        root: cli.root,
        env: cli.env,
    };

    let result = match cli.command {
        Command::Deploy(args) => commands::deploy::run(&ctx, args).map(|()| ExitCode::SUCCESS),
        Command::Run(args) => commands::run::run(&ctx, args),
        Command::Tag => commands::tag::run(&ctx).map(|()| ExitCode::SUCCESS),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "sanic", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    };

    result.unwrap_or_else(|err| {
        report_error(&err);
        ExitCode::FAILURE
    })
}

/// Print an error with its causes, plus advice when it came from a deploy stage.
fn report_error(err: &anyhow::Error) {
    let top = err.to_string();
    ui::error(&top);

    let mut last = top;
    for cause in err.chain().skip(1) {
        let text = cause.to_string();
        if last.contains(&text) {
            continue;
        }
        ui::dim_err(&format!("caused by: {text}"));
        last = text;
    }

    if let Some(deploy_err) = err
        .chain()
        .find_map(|e| e.downcast_ref::<deploykit::Error>())
    {
        let category = deploy_err.category();
        ui::dim_err(&format!("{}: {}", category.description(), category.advice()));
    }
}
