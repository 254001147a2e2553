//! Progress indicators for long-running CLI work.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Bar counting evaluated test cases.
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Spinner for work without a known size, such as indexing a corpus.
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Runs `operation` behind a spinner that is cleared afterwards.
pub fn with_spinner<F, T>(message: &str, operation: F) -> T
where
    F: FnOnce() -> T,
{
    let spinner = create_spinner(message);
    let result = operation();
    spinner.finish_and_clear();
    result
}
