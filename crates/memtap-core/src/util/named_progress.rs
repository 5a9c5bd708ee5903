use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Extension trait for creating named progress bars.
pub trait NamedProgress {
    /// Creates a style for a bar counting seconds, labelled with `name`.
    fn named_bar(name: &str) -> Self;
}

impl NamedProgress for ProgressStyle {
    fn named_bar(name: &str) -> Self {
        let template = format!(
            "{:<31} {{wide_bar:40.cyan/blue}} {{pos:>4}}/{{len:<4}}s [{{elapsed_precise}}] {{msg}}",
            name
        );
        ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
    }
}

/// Adds a bar tracking a time budget of `budget` in whole seconds.
pub fn deadline_bar(progress: &MultiProgress, name: &str, budget: Duration) -> ProgressBar {
    let bar = progress.add(ProgressBar::new(budget.as_secs()));
    bar.set_style(ProgressStyle::named_bar(name));
    bar
}
