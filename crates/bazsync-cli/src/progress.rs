//! Progress feedback utilities for CLI commands
//!
//! Provides spinners for long-running operations.
//! All progress output is suppressed when --quiet flag is set.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Create a spinner with a message
pub fn spinner(message: &str, quiet: bool) -> Option<ProgressBar> {
    if quiet {
        return None;
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(style("{spinner:.cyan} {msg}").tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Finish a spinner with a success message
pub fn finish_spinner(pb: Option<ProgressBar>, message: &str) {
    finish(pb, "{prefix:.green} {msg}", "✓", message);
}

/// Finish a spinner with a warning message
pub fn finish_spinner_warn(pb: Option<ProgressBar>, message: &str) {
    finish(pb, "{prefix:.yellow} {msg}", "!", message);
}

/// Finish a spinner with an error message
pub fn finish_spinner_error(pb: Option<ProgressBar>, message: &str) {
    finish(pb, "{prefix:.red} {msg}", "✗", message);
}

fn finish(pb: Option<ProgressBar>, template: &str, prefix: &'static str, message: &str) {
    if let Some(pb) = pb {
        pb.set_style(style(template));
        pb.set_prefix(prefix);
        pb.finish_with_message(message.to_string());
    }
}
