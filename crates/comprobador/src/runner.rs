//! Script runner and the non-browser subcommands

use comprobar::{
    Emitter, Harness, HarnessConfig, Launcher, Report, ReportComparison, Script, StepStatus,
};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::commands::{CompareArgs, InitArgs, ReportArgs, RunArgs, ValidateArgs};
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;

/// Script written by `comprobador init`
pub const STARTER_SCRIPT: &str = r#"# Comprobar verification script
name: smoke
description: Page loads, connects and stays free of console errors
base_url: http://localhost:3000

session:
  headless: true
  permissions: [microphone]
  fake_media: true

harness:
  default_timeout_ms: 10000
  observations: on_failure

steps:
  - description: Open the app
    action: navigate
    url: /
    wait_until: network_idle
    critical: true

  - description: Title is set
    action: check
    probe: title
    expect: { exists: true }

  - description: Start the session
    action: click
    target: { test_id: start }
    retries: 2

  - description: Server answered over the WebSocket
    action: wait
    until:
      event:
        filter: { kind: websocket, phase: frame_received }

  - description: No console errors
    action: check
    probe:
      events:
        filter: { kind: console, level: error }
    expect: { equals: 0, severity: soft }

  - description: Final state
    action: screenshot
"#;

/// Runs scripts and renders their reports
#[derive(Debug)]
pub struct ScriptRunner {
    reporter: ProgressReporter,
}

impl ScriptRunner {
    /// Create a runner
    #[must_use]
    pub fn new(config: &CliConfig) -> Self {
        Self {
            reporter: ProgressReporter::new(
                config.color.should_color(),
                config.verbosity.is_quiet(),
            ),
        }
    }

    /// Run a script against Chromium
    #[cfg(feature = "browser")]
    pub async fn run(&mut self, args: &RunArgs, cancel: CancellationToken) -> CliResult<Report> {
        self.run_with(comprobar::ChromiumLauncher, args, cancel).await
    }

    /// Run a script against Chromium
    #[cfg(not(feature = "browser"))]
    pub async fn run(&mut self, _args: &RunArgs, _cancel: CancellationToken) -> CliResult<Report> {
        Err(CliError::config(
            "comprobador was built without the `browser` feature",
        ))
    }

    /// Run a script with the given launcher.
    ///
    /// Outside CI mode the browser stays open after the report is printed
    /// until `cancel` fires.
    pub async fn run_with<L: Launcher>(
        &mut self,
        launcher: L,
        args: &RunArgs,
        cancel: CancellationToken,
    ) -> CliResult<Report> {
        let script = Script::load(&args.script)?;
        let config = effective_config(args, &script);
        let script = Script {
            session: None,
            harness: None,
            ..script
        };
        tracing::debug!(?config, "effective configuration");

        let mut harness = Harness::new(config.clone(), launcher);
        self.reporter.start_spinner(&format!("running {}", script.name));
        let outcome = harness.run(&script, cancel.clone()).await;
        self.reporter.finish_spinner();

        let report = outcome.report;
        self.reporter.report(&report);
        write_outputs(
            &Emitter::from_config(&config),
            &report,
            args.json.as_deref(),
            args.html.as_deref(),
            args.junit.as_deref(),
        )?;

        if harness.is_holding() {
            self.reporter
                .info("browser held open for inspection; press Ctrl-C to exit");
            harness.hold_for_inspection(&cancel).await?;
        }
        Ok(report)
    }

    /// Parse, validate and list a script
    pub fn validate(&self, args: &ValidateArgs) -> CliResult<Script> {
        let script = Script::load(&args.script)?;
        self.reporter.success(&format!(
            "{} is valid ({} steps)",
            args.script.display(),
            script.steps.len()
        ));
        if !self.reporter.quiet {
            for line in describe_steps(&script) {
                println!("  {line}");
            }
        }
        Ok(script)
    }

    /// Re-render a saved report
    pub fn report(&self, args: &ReportArgs) -> CliResult<Report> {
        let report = Report::load(&args.input)?;
        self.reporter.report(&report);
        let dir = args.input.parent().unwrap_or_else(|| Path::new("."));
        write_outputs(
            &Emitter::new(dir, "step"),
            &report,
            None,
            args.html.as_deref(),
            args.junit.as_deref(),
        )?;
        Ok(report)
    }

    /// Compare two saved reports; drift is an error
    pub fn compare(&self, args: &CompareArgs) -> CliResult<ReportComparison> {
        let left = Report::load(&args.left)?;
        let right = Report::load(&args.right)?;
        let comparison = ReportComparison::compare(&left, &right);
        if comparison.is_identical() {
            self.reporter.success(&format!(
                "{} steps, same statuses and outcome",
                left.results.len()
            ));
            return Ok(comparison);
        }

        let show = |status: Option<StepStatus>| {
            status.map_or_else(|| "-".to_string(), |s| s.to_string())
        };
        for drift in &comparison.drifts {
            self.reporter.failure(&format!(
                "{:02} {}: {} -> {}",
                drift.index,
                drift.description,
                show(drift.left),
                show(drift.right)
            ));
        }
        if comparison.outcome_changed {
            self.reporter
                .failure(&format!("outcome: {} -> {}", left.outcome, right.outcome));
        }
        Err(CliError::verification(format!(
            "{} step(s) changed status",
            comparison.drifts.len()
        )))
    }

    /// Write the starter script
    pub fn init(&self, args: &InitArgs) -> CliResult<()> {
        if args.path.exists() && !args.force {
            return Err(CliError::invalid_argument(format!(
                "{} already exists (use --force to overwrite)",
                args.path.display()
            )));
        }
        if let Some(parent) = args.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&args.path, STARTER_SCRIPT)?;
        self.reporter
            .success(&format!("wrote {}", args.path.display()));
        Ok(())
    }
}

/// Harness configuration from the script, with command-line flags on top
#[must_use]
pub fn effective_config(args: &RunArgs, script: &Script) -> HarnessConfig {
    let mut base = HarnessConfig::default()
        .with_ci_mode(!args.inspect)
        .with_output_dir(&args.output);
    if let Some(url) = &args.base_url {
        base = base.with_base_url(url);
    }

    let mut config = script.configure(base);
    if let Some(ms) = args.timeout {
        config.default_timeout_ms = ms;
    }
    if let Some(prefix) = &args.prefix {
        config.screenshot_prefix.clone_from(prefix);
    }

    let session = &mut config.session;
    if args.headed {
        session.headless = false;
    } else if let Some(headless) = args.headless {
        session.headless = headless;
    }
    if let Some(path) = &args.chromium {
        session.executable_path = Some(path.clone());
    }
    if args.no_sandbox {
        session.sandbox = false;
    }
    if args.record_video {
        session.record_video = true;
    }
    config
}

/// One line per step: index, action and description
#[must_use]
pub fn describe_steps(script: &Script) -> Vec<String> {
    script
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let critical = if step.critical { " [critical]" } else { "" };
            format!(
                "{:02} {:<10} {}{critical}",
                i + 1,
                step.action.name(),
                step.description
            )
        })
        .collect()
}

fn write_outputs(
    emitter: &Emitter,
    report: &Report,
    json: Option<&Path>,
    html: Option<&Path>,
    junit: Option<&Path>,
) -> CliResult<()> {
    if let Some(path) = json {
        emitter.write_json(report, path)?;
    }
    if let Some(path) = html {
        emitter.write_html(report, path)?;
    }
    if let Some(path) = junit {
        emitter.write_junit(report, path)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use comprobar::{MockBrowser, MockElement, RunStatus};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn run_args(script: PathBuf, output: &Path) -> RunArgs {
        RunArgs {
            script,
            base_url: Some("http://localhost:3000".into()),
            ci: true,
            inspect: false,
            headed: false,
            headless: None,
            chromium: None,
            no_sandbox: false,
            output: output.to_path_buf(),
            json: Some(output.join("report.json")),
            html: Some(output.join("report.html")),
            junit: None,
            prefix: None,
            timeout: Some(100),
            record_video: false,
        }
    }

    fn quiet() -> ScriptRunner {
        ScriptRunner::new(&CliConfig::new().with_verbosity(crate::config::Verbosity::Quiet))
    }

    mod config_tests {
        use super::*;

        #[test]
        fn test_flags_override_script() {
            let script = Script::from_yaml_str(STARTER_SCRIPT).unwrap();
            let mut args = run_args(PathBuf::from("s.yaml"), Path::new("out"));
            args.headed = true;
            args.base_url = Some("http://staging:8080".into());
            args.chromium = Some(PathBuf::from("/opt/chromium"));
            let config = effective_config(&args, &script);
            assert!(!config.session.headless);
            assert!(config.session.fake_media);
            assert_eq!(config.base_url.as_deref(), Some("http://staging:8080"));
            assert_eq!(config.default_timeout_ms, 100);
            assert_eq!(
                config.session.executable_path,
                Some(PathBuf::from("/opt/chromium"))
            );
            assert!(config.ci_mode);
        }

        #[test]
        fn test_inspect_disables_ci_mode() {
            let script = Script::from_yaml_str(STARTER_SCRIPT).unwrap();
            let mut args = run_args(PathBuf::from("s.yaml"), Path::new("out"));
            args.inspect = true;
            assert!(!effective_config(&args, &script).ci_mode);
        }

        #[test]
        fn test_starter_script_is_valid() {
            let script = Script::from_yaml_str(STARTER_SCRIPT).unwrap();
            assert!(script.issues().is_empty(), "{:?}", script.issues());
            assert_eq!(describe_steps(&script).len(), script.steps.len());
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test]
        async fn test_run_writes_reports() {
            let dir = TempDir::new().unwrap();
            let script_path = dir.path().join("smoke.yaml");
            std::fs::write(
                &script_path,
                "name: smoke\nsteps:\n  - description: Open\n    action: navigate\n    url: /\n  \
                 - description: Go\n    action: click\n    target: { css: '#go' }\n",
            )
            .unwrap();
            let browser = MockBrowser::new().with_element(MockElement::new("#go"));
            let args = run_args(script_path, dir.path());

            let report = quiet()
                .run_with(browser.launcher(), &args, CancellationToken::new())
                .await
                .unwrap();

            assert!(report.is_success());
            assert_eq!(report.outcome, RunStatus::Completed);
            assert!(dir.path().join("report.json").exists());
            assert!(dir.path().join("report.html").exists());
            assert!(browser.was_called("navigate:http://localhost:3000/"));
        }
    }

    mod subcommand_tests {
        use super::*;

        #[test]
        fn test_init_refuses_overwrite() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("comprobar.yaml");
            let runner = quiet();
            runner
                .init(&InitArgs {
                    path: path.clone(),
                    force: false,
                })
                .unwrap();
            assert!(runner
                .init(&InitArgs {
                    path: path.clone(),
                    force: false
                })
                .is_err());
            runner.init(&InitArgs { path, force: true }).unwrap();
        }

        #[test]
        fn test_compare_reports_drift() {
            let dir = TempDir::new().unwrap();
            let emitter = Emitter::new(dir.path(), "step");
            let mut left = Report::new("a");
            left.push(comprobar::StepResult::passed(1, "Open", "ok"));
            let mut right = Report::new("a");
            right.push(comprobar::StepResult::new(
                1,
                "Open",
                StepStatus::Warned,
                "slow",
            ));
            let (l, r) = (dir.path().join("l.json"), dir.path().join("r.json"));
            emitter.write_json(&left, &l).unwrap();
            emitter.write_json(&right, &r).unwrap();

            let runner = quiet();
            assert!(runner
                .compare(&CompareArgs {
                    left: l.clone(),
                    right: l.clone()
                })
                .is_ok());
            assert!(matches!(
                runner.compare(&CompareArgs { left: l, right: r }),
                Err(CliError::Verification { .. })
            ));
        }
    }
}
