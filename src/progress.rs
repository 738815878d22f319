//! Progress indicators for sanic.
//!
//! Spinners are only used around work that produces no terminal output of
//! its own. Stages that stream tool output (cluster start, image pulls) print
//! a step line instead.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::ui;

/// Start a spinner with a message.
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Clear the spinner and print a success line.
pub fn finish_success(pb: &ProgressBar, msg: &str) {
    pb.finish_and_clear();
    ui::success(msg);
}

/// Clear the spinner and print an error line.
pub fn finish_error(pb: &ProgressBar, msg: &str) {
    pb.finish_and_clear();
    ui::error(msg);
}
