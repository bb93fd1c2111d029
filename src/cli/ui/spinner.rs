use std::future::Future;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

/// Stderr spinner shown while a reader operation is in flight.
#[derive(Debug)]
pub(crate) struct Spinner {
    enabled: bool,
}

impl Spinner {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Runs a fallible operation, finishing the spinner with a tick or a cross.
    pub(crate) async fn with_spinner<F, Fut, T, E>(&self, message: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.enabled {
            return operation().await;
        }

        let spinner = new_spinner(message);
        let result = operation().await;
        let outcome = match &result {
            Ok(_) => format!("{} {message}", "✓".green()),
            Err(_) => format!("{} {message}", "✗".red()),
        };
        spinner.finish_with_message(outcome);
        result
    }
}

fn new_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(spinner_style());
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(90));
    spinner
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan.bold} {msg}")
        .unwrap_or_else(|_error| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
}
