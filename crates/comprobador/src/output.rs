//! Console output and progress reporting

use comprobar::{Report, RunStatus, StepResult, StepStatus, Summary};
use console::{style, Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter for script runs
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    spinner: Option<ProgressBar>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stdout(),
            spinner: None,
            use_color,
            quiet,
        }
    }

    /// Show a spinner while the harness runs
    pub fn start_spinner(&mut self, message: &str) {
        if self.quiet || !self.term.is_term() {
            return;
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(spinner);
    }

    /// Remove the spinner
    pub fn finish_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("✓").green().bold().to_string()
        } else {
            "PASS".to_string()
        };
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Failures are printed even in quiet mode
        let prefix = if self.use_color {
            style("✗").red().bold().to_string()
        } else {
            "FAIL".to_string()
        };
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("⚠").yellow().bold().to_string()
        } else {
            "WARN".to_string()
        };
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("ℹ").blue().bold().to_string()
        } else {
            "INFO".to_string()
        };
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }
        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };
        let _ = self.term.write_line("");
        let _ = self.term.write_line(&styled);
    }

    /// Print one step result
    pub fn step(&self, result: &StepResult) {
        let line = format!(
            "{:02} {} ({}ms)",
            result.index, result.description, result.duration_ms
        );
        match result.status {
            StepStatus::Passed => self.success(&line),
            StepStatus::Warned => self.warning(&format!("{line}: {}", result.message)),
            StepStatus::Failed => self.failure(&format!("{line}: {}", result.message)),
        }
        if let Some(path) = &result.screenshot {
            if !self.quiet {
                let _ = self.term.write_line(&format!("     screenshot: {}", path.display()));
            }
        }
        if !self.quiet {
            for event in &result.observations {
                let _ = self.term.write_line(&format!("     {event}"));
            }
        }
    }

    /// Print every step, the skipped ones and the summary
    pub fn report(&self, report: &Report) {
        self.header(&report.name);
        for result in &report.results {
            self.step(result);
        }
        if !self.quiet {
            for skipped in &report.skipped {
                let _ = self.term.write_line(&format!(
                    "SKIP {:02} {}",
                    skipped.index, skipped.description
                ));
            }
        }
        let duration = report
            .duration_ms()
            .and_then(|ms| u64::try_from(ms).ok())
            .map_or(Duration::ZERO, Duration::from_millis);
        self.summary(&report.summary(), &report.outcome, duration);
    }

    /// Print run summary
    pub fn summary(&self, summary: &Summary, outcome: &RunStatus, duration: Duration) {
        if self.quiet && summary.failed == 0 && !matches!(outcome, RunStatus::Aborted { .. }) {
            return;
        }
        let _ = self.term.write_line("");

        let failed = summary.failed > 0 || matches!(outcome, RunStatus::Aborted { .. });
        let secs = duration.as_secs_f64();
        let counts = format!(
            "{} steps in {secs:.2}s ({} passed, {} failed, {} warnings, {} skipped)",
            summary.total, summary.passed, summary.failed, summary.warnings, summary.skipped
        );

        if self.use_color {
            let status = if failed {
                Style::new().red().bold().apply_to("FAILED")
            } else {
                Style::new().green().bold().apply_to("PASSED")
            };
            let _ = self
                .term
                .write_line(&format!("{status} {counts} {}", style(outcome).dim()));
        } else {
            let status = if failed { "FAILED" } else { "PASSED" };
            let _ = self.term.write_line(&format!("{status} {counts} {outcome}"));
        }
    }
}
