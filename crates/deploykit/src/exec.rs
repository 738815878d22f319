//! External command execution.
//!
//! All cluster and container tooling (`kubectl`, `minikube`, `docker`) is
//! invoked through the [`CommandRunner`] trait so the pipeline can be driven
//! by a fake runner in tests.

use std::fmt;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// A program invocation: program, arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    /// Program name or path
    pub program: String,
    /// Arguments, in order
    pub args: Vec<String>,
    /// Extra environment variables for the child process only
    pub env: Vec<(String, String)>,
}

impl ExternalCommand {
    /// Create a command for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Whether the arguments contain `needle` as a contiguous run.
    pub fn has_args(&self, needle: &[&str]) -> bool {
        needle.is_empty()
            || self
                .args
                .windows(needle.len())
                .any(|w| w.iter().zip(needle).all(|(a, b)| a == b))
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the process exited with status zero
    pub success: bool,
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result (exit code 1) with the given stderr.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout followed by stderr, trimmed.
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        out.push_str(self.stdout.trim_end());
        if !out.is_empty() && !self.stderr.trim().is_empty() {
            out.push('\n');
        }
        out.push_str(self.stderr.trim_end());
        out.trim().to_string()
    }
}

/// Executes external commands.
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing stdout and stderr.
    fn output(&self, command: &ExternalCommand) -> Result<CommandOutput>;

    /// Run to completion with the terminal attached, so progress output
    /// reaches the user. Returns whether the process succeeded.
    fn stream(&self, command: &ExternalCommand) -> Result<bool>;
}

/// Runner that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn output(&self, command: &ExternalCommand) -> Result<CommandOutput> {
        log::debug!("running: {command}");
        let output = command
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::CommandSpawn {
                command: command.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn stream(&self, command: &ExternalCommand) -> Result<bool> {
        log::debug!("running (attached): {command}");
        let status = command
            .to_command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| Error::CommandSpawn {
                command: command.to_string(),
                source,
            })?;
        Ok(status.success())
    }
}
