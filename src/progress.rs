//! Progress bar utilities for long-running operations
//!
//! Provides visual feedback during scanning, exit simulation and grid sweeps
//! using the indicatif crate. Bars created with `visible = false` are hidden,
//! which keeps tests and piped output quiet.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// Progress bar for one scheduler phase
pub struct ScanProgress {
    pub progress: ProgressBar,
    label: String,
}

impl ScanProgress {
    pub fn new(label: &str, total_units: usize, visible: bool) -> Self {
        let progress = if visible {
            ProgressBar::new(total_units as u64)
        } else {
            ProgressBar::hidden()
        };
        progress.set_style(bar_style(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})\n{msg}",
        ));

        Self {
            progress,
            label: label.to_string(),
        }
    }

    /// Update with the coordinator's running counters
    pub fn update(&self, processed: usize, succeeded: usize, failed: usize, skipped: usize) {
        self.progress.set_position(processed as u64);
        self.progress.set_message(format!(
            "📊 {}: ✅ {} | ❌ {} | ⏭️  {}",
            self.label, succeeded, failed, skipped
        ));
    }

    pub fn finish(&self, succeeded: usize, failed: usize, skipped: usize) {
        self.progress.finish_with_message(format!(
            "✅ {} complete! {} succeeded, {} failed, {} skipped",
            self.label, succeeded, failed, skipped
        ));
    }

    pub fn abandon(&self, message: &str) {
        self.progress.abandon_with_message(format!("⚠️  {}", message));
    }
}

/// Progress bar for grid sweep combinations
pub struct SweepProgress {
    pub progress: ProgressBar,
    pub total_combinations: usize,
}

impl SweepProgress {
    pub fn new(total_combinations: usize, visible: bool) -> Self {
        let progress = if visible {
            ProgressBar::new(total_combinations as u64)
        } else {
            ProgressBar::hidden()
        };
        progress.set_style(bar_style(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})\n{msg}",
        ));

        Self {
            progress,
            total_combinations,
        }
    }

    /// Update progress with completed combinations and best objective
    pub fn update(&self, completed: usize, best_score: Option<f64>, current: &str) {
        self.progress.set_position(completed as u64);
        self.progress.set_message(format!(
            "🎯 Best: {} | Testing: {}",
            best_label(best_score),
            current
        ));
    }

    pub fn finish(&self, best_score: Option<f64>) {
        self.progress.finish_with_message(format!(
            "✅ Sweep complete! Best objective: {}",
            best_label(best_score)
        ));
    }

    pub fn finish_with_error(&self, error: &str) {
        self.progress.finish_with_message(format!("❌ Failed: {}", error));
    }
}

/// "-" until a combination has been scored
fn best_label(best_score: Option<f64>) -> String {
    match best_score {
        Some(score) => format!("{:.4}", score),
        None => "-".to_string(),
    }
}

/// Spinner for quick operations
pub struct Spinner {
    pub spinner: ProgressBar,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner.set_message(message.to_string());

        Self { spinner }
    }

    pub fn update(&self, message: &str) {
        self.spinner.set_message(message.to_string());
    }

    pub fn finish(&self, message: &str) {
        self.spinner.finish_with_message(format!("✅ {}", message));
    }

    pub fn finish_with_error(&self, message: &str) {
        self.spinner.finish_with_message(format!("❌ {}", message));
    }
}
