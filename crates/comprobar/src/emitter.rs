//! Report emitter: console text, JSON, HTML, JUnit XML and screenshots.

use base64::Engine;
use chrono::Utc;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::config::HarnessConfig;
use crate::report::{Report, RunStatus, StepStatus, Summary};
use crate::result::HarnessResult;

/// Writes run artifacts into an output directory
#[derive(Debug, Clone)]
pub struct Emitter {
    output_dir: PathBuf,
    prefix: String,
}

impl Emitter {
    /// Create an emitter
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Emitter for the configured output directory and prefix
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(&config.output_dir, &config.screenshot_prefix)
    }

    /// Output directory
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Compute the summary and log problems
    pub fn finalize(&self, report: &Report) -> Summary {
        let summary = report.summary();
        for problem in report.problems() {
            tracing::warn!(
                index = problem.index,
                status = %problem.status,
                message = %problem.message,
                "{}",
                problem.description
            );
        }
        tracing::info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            warnings = summary.warnings,
            skipped = summary.skipped,
            outcome = %report.outcome,
            "run finalized"
        );
        summary
    }

    /// Write `png` as `<prefix>-<NN>-<slug>-<timestamp>.png`
    pub fn save_screenshot(
        &self,
        index: usize,
        description: &str,
        png: &[u8],
    ) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let name = format!(
            "{}-{index:02}-{}-{stamp}.png",
            self.prefix,
            slugify(description)
        );
        let path = self.output_dir.join(name);
        std::fs::write(&path, png)?;
        tracing::debug!(path = %path.display(), bytes = png.len(), "screenshot saved");
        Ok(path)
    }

    /// Write the JSON report
    pub fn write_json(&self, report: &Report, path: &Path) -> HarnessResult<()> {
        ensure_parent(path)?;
        std::fs::write(path, serde_json::to_string_pretty(report)?)?;
        tracing::info!(path = %path.display(), "json report written");
        Ok(())
    }

    /// Write the HTML report
    pub fn write_html(&self, report: &Report, path: &Path) -> HarnessResult<()> {
        ensure_parent(path)?;
        std::fs::write(path, render_html(report))?;
        tracing::info!(path = %path.display(), "html report written");
        Ok(())
    }

    /// Write JUnit XML for CI systems
    pub fn write_junit(&self, report: &Report, path: &Path) -> HarnessResult<()> {
        ensure_parent(path)?;
        std::fs::write(path, render_junit(report))?;
        tracing::info!(path = %path.display(), "junit report written");
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> HarnessResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Lower-case, dash-separated, at most 48 characters
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let mut slug: String = slug.trim_end_matches('-').chars().take(48).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "step".to_string()
    } else {
        slug
    }
}

const fn marker(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Passed => "PASS",
        StepStatus::Failed => "FAIL",
        StepStatus::Warned => "WARN",
    }
}

/// Plain-text console rendering
#[must_use]
pub fn render_text(report: &Report) -> String {
    let summary = report.summary();
    let mut out = String::new();
    let _ = writeln!(out, "{}", report.name);
    for result in &report.results {
        let _ = writeln!(
            out,
            "  [{}] {:02} {} ({}ms)",
            marker(result.status),
            result.index,
            result.description,
            result.duration_ms
        );
        if !result.status.is_passed() {
            let _ = writeln!(out, "         {}", result.message);
            if let Some(path) = &result.screenshot {
                let _ = writeln!(out, "         screenshot: {}", path.display());
            }
            for event in &result.observations {
                let _ = writeln!(out, "         {event}");
            }
        }
    }
    for skipped in &report.skipped {
        let _ = writeln!(
            out,
            "  [SKIP] {:02} {}",
            skipped.index, skipped.description
        );
    }
    let _ = writeln!(
        out,
        "{} total, {} passed, {} failed, {} warnings, {} skipped ({})",
        summary.total,
        summary.passed,
        summary.failed,
        summary.warnings,
        summary.skipped,
        report.outcome
    );
    out
}

/// Escape HTML special characters
fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Escape XML special characters
fn escape_xml(s: &str) -> String {
    escape_html(s).replace('\'', "&apos;")
}

/// Screenshot as a data URI, if it can be read
fn inline_png(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    Some(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

/// Self-contained HTML report; screenshots are inlined
#[must_use]
pub fn render_html(report: &Report) -> String {
    let summary = report.summary();
    let mut html = String::new();

    html.push_str(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Comprobar Report</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 20px; }
        .summary { background: #f5f5f5; padding: 20px; border-radius: 8px; margin-bottom: 20px; }
        .progress-bar { background: #ddd; height: 20px; border-radius: 10px; overflow: hidden; }
        .passed { background: #4caf50; height: 100%; }
        .step { padding: 10px; margin: 5px 0; border-radius: 4px; }
        .step.pass { background: #e8f5e9; border-left: 4px solid #4caf50; }
        .step.fail { background: #ffebee; border-left: 4px solid #f44336; }
        .step.warn { background: #fff8e1; border-left: 4px solid #ffb300; }
        .step.skip { background: #eceff1; border-left: 4px solid #90a4ae; }
        .message { font-family: monospace; white-space: pre-wrap; }
        .events { font-family: monospace; font-size: 12px; color: #555; }
        .step img { max-width: 480px; border: 1px solid #ddd; margin-top: 8px; }
    </style>
</head>
<body>
"#,
    );

    let _ = write!(
        html,
        r#"<div class="summary">
    <h1>{}</h1>
    <h2>{}/{} passed, {} failed, {} warnings, {} skipped</h2>
    <div class="progress-bar">
        <div class="passed" style="width: {:.1}%"></div>
    </div>
    <p>Outcome: {} &middot; Started: {}</p>
</div>
"#,
        escape_html(&report.name),
        summary.passed,
        summary.total,
        summary.failed,
        summary.warnings,
        summary.skipped,
        summary.pass_rate() * 100.0,
        escape_html(&report.outcome.to_string()),
        report.started_at.to_rfc3339()
    );

    html.push_str("<h2>Steps</h2>\n");
    for result in &report.results {
        let class = match result.status {
            StepStatus::Passed => "pass",
            StepStatus::Failed => "fail",
            StepStatus::Warned => "warn",
        };
        let _ = write!(
            html,
            "<div class=\"step {class}\">\n    <strong>{:02} {}</strong> - {} ({}ms)\n",
            result.index,
            escape_html(&result.description),
            result.status,
            result.duration_ms
        );
        if !result.message.is_empty() {
            let _ = writeln!(
                html,
                "    <div class=\"message\">{}</div>",
                escape_html(&result.message)
            );
        }
        if !result.observations.is_empty() {
            html.push_str("    <div class=\"events\">\n");
            for event in &result.observations {
                let _ = writeln!(html, "        {}<br>", escape_html(&event.to_string()));
            }
            html.push_str("    </div>\n");
        }
        if let Some(src) = result.screenshot.as_deref().and_then(inline_png) {
            let _ = writeln!(html, "    <img alt=\"screenshot\" src=\"{src}\">");
        }
        html.push_str("</div>\n");
    }
    for skipped in &report.skipped {
        let _ = writeln!(
            html,
            "<div class=\"step skip\"><strong>{:02} {}</strong> - skipped</div>",
            skipped.index,
            escape_html(&skipped.description)
        );
    }

    html.push_str(
        r"
<footer>
    <p>Generated by Comprobar</p>
</footer>
</body>
</html>
",
    );
    html
}

/// JUnit XML; warned steps pass with a system-out note, skipped steps are `<skipped/>`
#[must_use]
pub fn render_junit(report: &Report) -> String {
    let summary = report.summary();
    let seconds = |ms: u64| ms as f64 / 1000.0;
    let total_ms: u64 = report.results.iter().map(|r| r.duration_ms).sum();
    let mut xml = String::new();

    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    let _ = writeln!(
        xml,
        r#"<testsuite name="{}" tests="{}" failures="{}" skipped="{}" time="{:.3}">"#,
        escape_xml(&report.name),
        summary.total + summary.skipped,
        summary.failed,
        summary.skipped,
        seconds(total_ms)
    );
    for result in &report.results {
        let _ = writeln!(
            xml,
            r#"  <testcase name="{:02} {}" time="{:.3}">"#,
            result.index,
            escape_xml(&result.description),
            seconds(result.duration_ms)
        );
        match result.status {
            StepStatus::Failed => {
                let kind = result
                    .error_kind
                    .map_or_else(|| "failure".to_string(), |k| k.to_string());
                let _ = writeln!(
                    xml,
                    r#"    <failure type="{kind}" message="{}">{}</failure>"#,
                    escape_xml(&result.message),
                    escape_xml(&result.message)
                );
            }
            StepStatus::Warned => {
                let _ = writeln!(
                    xml,
                    "    <system-out>warning: {}</system-out>",
                    escape_xml(&result.message)
                );
            }
            StepStatus::Passed => {}
        }
        xml.push_str("  </testcase>\n");
    }
    for skipped in &report.skipped {
        let reason = match &report.outcome {
            RunStatus::Cancelled => "cancelled".to_string(),
            other => other.to_string(),
        };
        let _ = writeln!(
            xml,
            r#"  <testcase name="{:02} {}"><skipped message="{}"/></testcase>"#,
            skipped.index,
            escape_xml(&skipped.description),
            escape_xml(&reason)
        );
    }
    xml.push_str("</testsuite>\n");
    xml
}
