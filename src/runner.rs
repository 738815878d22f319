use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

/// Run a shell script with extra positional arguments, inheriting stdio.
///
/// The script sees the arguments as `$1`, `$2`, ... and `"$@"`.
pub fn run_script(
    script: &str,
    args: &[String],
    dir: &Path,
    env: &[(&str, &str)],
) -> Result<ExitStatus> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(script)
        .arg("sanic")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    for (key, value) in env {
        cmd.env(key, value);
    }

    log::debug!("sh -c {script:?} {}", args.join(" "));
    cmd.status()
        .with_context(|| format!("Failed to execute: sh -c {script:?}"))
}

/// Exit code to report for a finished script.
///
/// Signals and out-of-range codes are reported as 1.
pub fn exit_code(status: ExitStatus) -> u8 {
    status
        .code()
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}
