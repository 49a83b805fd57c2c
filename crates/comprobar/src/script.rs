//! Declarative verification scripts (YAML or JSON).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{HarnessConfig, ObservationPolicy, RecorderLimits, SessionConfig};
use crate::result::{HarnessError, HarnessResult};
use crate::retry::RetryPolicy;
use crate::step::{Step, StepAction};
use crate::wait::WaitCondition;

/// Harness settings a script may override
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessOverrides {
    /// Default per-step timeout
    pub default_timeout_ms: Option<u64>,
    /// Retry backoff
    pub retry: Option<RetryPolicy>,
    /// Observation attachment policy
    pub observations: Option<ObservationPolicy>,
    /// Failure screenshots
    pub screenshot_on_failure: Option<bool>,
    /// Screenshot file prefix
    pub screenshot_prefix: Option<String>,
    /// Recorder bounds
    pub recorder: Option<RecorderLimits>,
}

/// A named sequence of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// Script name
    pub name: String,
    /// What the script verifies
    #[serde(default)]
    pub description: String,
    /// Base URL used when none is given on the command line
    #[serde(default)]
    pub base_url: Option<String>,
    /// Session configuration
    #[serde(default)]
    pub session: Option<SessionConfig>,
    /// Harness overrides
    #[serde(default)]
    pub harness: Option<HarnessOverrides>,
    /// Steps, executed in order
    pub steps: Vec<Step>,
}

impl Script {
    /// Create an empty script
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            base_url: None,
            session: None,
            harness: None,
            steps: Vec::new(),
        }
    }

    /// Append a step
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Parse YAML
    pub fn from_yaml_str(source: &str) -> HarnessResult<Self> {
        Ok(serde_yaml_ng::from_str(source)?)
    }

    /// Parse JSON
    pub fn from_json_str(source: &str) -> HarnessResult<Self> {
        Ok(serde_json::from_str(source)?)
    }

    /// Load from a file; `.json` is parsed as JSON, anything else as YAML.
    /// The script is validated before it is returned.
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let source = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let script = if is_json {
            Self::from_json_str(&source)?
        } else {
            Self::from_yaml_str(&source)?
        };
        script.validate()?;
        tracing::debug!(path = %path.display(), steps = script.steps.len(), "script loaded");
        Ok(script)
    }

    /// Every problem with the script, one line each
    #[must_use]
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push("script name is empty".to_string());
        }
        if self.steps.is_empty() {
            issues.push("script has no steps".to_string());
        }
        for (i, step) in self.steps.iter().enumerate() {
            let at = format!("step {}", i + 1);
            if step.description.trim().is_empty() {
                issues.push(format!("{at}: description is empty"));
            }
            if step.timeout_ms == Some(0) {
                issues.push(format!("{at}: timeout_ms must be positive"));
            }
            match (&step.expect, step.action.produces_value()) {
                (Some(_), false) => issues.push(format!(
                    "{at}: `expect` is not allowed on a {} step",
                    step.action.name()
                )),
                (None, true) if matches!(step.action, StepAction::Check { .. }) => {
                    issues.push(format!("{at}: check step needs an `expect`"));
                }
                _ => {}
            }
            if let Some(Err(e)) = step.expect.as_ref().map(crate::assertion::Expectation::validate)
            {
                issues.push(format!("{at}: {e}"));
            }
            if step.retries > 0 && !step.action.is_interaction() {
                issues.push(format!(
                    "{at}: retries only apply to click, fill and select"
                ));
            }
            match &step.action {
                StepAction::Navigate { url, .. } if url.trim().is_empty() => {
                    issues.push(format!("{at}: navigate url is empty"));
                }
                StepAction::Evaluate { script } if script.trim().is_empty() => {
                    issues.push(format!("{at}: evaluate script is empty"));
                }
                StepAction::Wait {
                    until: WaitCondition::Event { count: 0, .. },
                } => issues.push(format!("{at}: event count must be at least 1")),
                _ => {}
            }
        }
        issues
    }

    /// Fail with every issue joined, if there are any
    pub fn validate(&self) -> HarnessResult<()> {
        let issues = self.issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::script(issues.join("; ")))
        }
    }

    /// Layer the script's settings under `config`.
    ///
    /// An explicit base URL in `config` wins over the script's.
    #[must_use]
    pub fn configure(&self, mut config: HarnessConfig) -> HarnessConfig {
        if config.base_url.is_none() {
            config.base_url.clone_from(&self.base_url);
        }
        if let Some(session) = &self.session {
            config.session = session.clone();
        }
        if let Some(overrides) = &self.harness {
            if let Some(ms) = overrides.default_timeout_ms {
                config.default_timeout_ms = ms;
            }
            if let Some(retry) = overrides.retry {
                config.retry = retry;
            }
            if let Some(policy) = overrides.observations {
                config.observations = policy;
            }
            if let Some(enabled) = overrides.screenshot_on_failure {
                config.screenshot_on_failure = enabled;
            }
            if let Some(prefix) = &overrides.screenshot_prefix {
                config.screenshot_prefix.clone_from(prefix);
            }
            if let Some(limits) = overrides.recorder {
                config.recorder = limits;
            }
        }
        config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::assertion::{Expectation, Matcher};
    use crate::locator::Locator;
    use crate::step::Probe;
    use std::io::Write;

    const SAMPLE: &str = r#"
name: dashboard smoke
base_url: http://localhost:3000
session:
  headless: true
  permissions: [microphone]
  fake_media: true
harness:
  default_timeout_ms: 5000
  observations: always
steps:
  - description: Open dashboard
    action: navigate
    url: /
    critical: true
  - description: Title mentions dashboard
    action: check
    probe: title
    expect: { contains: Dashboard }
  - description: Start voice
    action: click
    target: { test_id: start-voice }
    retries: 2
"#;

    mod loading {
        use super::*;

        #[test]
        fn test_parse_sample() {
            let script = Script::from_yaml_str(SAMPLE).unwrap();
            assert_eq!(script.steps.len(), 3);
            assert!(script.validate().is_ok());
            assert!(script.session.as_ref().unwrap().fake_media);
        }

        #[test]
        fn test_load_yaml_file() {
            let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
            file.write_all(SAMPLE.as_bytes()).unwrap();
            let script = Script::load(file.path()).unwrap();
            assert_eq!(script.name, "dashboard smoke");
        }

        #[test]
        fn test_load_json_file() {
            let script = Script::new("json").step(Step::navigate("open", "/"));
            let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
            file.write_all(serde_json::to_string(&script).unwrap().as_bytes())
                .unwrap();
            assert_eq!(Script::load(file.path()).unwrap(), script);
        }

        #[test]
        fn test_load_rejects_invalid_script() {
            let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
            file.write_all(b"name: empty\nsteps: []\n").unwrap();
            let err = Script::load(file.path()).unwrap_err();
            assert!(matches!(err, HarnessError::Script { .. }));
        }

        #[test]
        fn test_missing_file_is_io_error() {
            let err = Script::load(Path::new("/nonexistent/script.yaml")).unwrap_err();
            assert!(matches!(err, HarnessError::Io(_)));
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn test_expect_on_click_rejected() {
            let script = Script::new("x").step(
                Step::click("go", Locator::new("#go"))
                    .with_expect(Expectation::hard(Matcher::Exists(true))),
            );
            let issues = script.issues();
            assert_eq!(issues.len(), 1);
            assert!(issues[0].contains("step 1"));
        }

        #[test]
        fn test_check_requires_expect() {
            let mut step = Step::check(
                "t",
                Probe::Title,
                Expectation::hard(Matcher::Exists(true)),
            );
            step.expect = None;
            assert!(!Script::new("x").step(step).issues().is_empty());
        }

        #[test]
        fn test_retries_on_navigate_rejected() {
            let script = Script::new("x").step(Step::navigate("open", "/").with_retries(2));
            assert!(script.issues()[0].contains("retries"));
        }

        #[test]
        fn test_bad_regex_reported() {
            let script = Script::new("x").step(Step::check(
                "url",
                Probe::Url,
                Expectation::hard(Matcher::Matches("[".into())),
            ));
            assert!(script.issues()[0].contains("invalid pattern"));
        }
    }

    mod configure {
        use super::*;

        #[test]
        fn test_script_settings_applied() {
            let script = Script::from_yaml_str(SAMPLE).unwrap();
            let config = script.configure(HarnessConfig::default());
            assert_eq!(config.base_url.as_deref(), Some("http://localhost:3000"));
            assert_eq!(config.default_timeout_ms, 5000);
            assert_eq!(config.observations, ObservationPolicy::Always);
            assert!(config.session.fake_media);
        }

        #[test]
        fn test_explicit_base_url_wins() {
            let script = Script::from_yaml_str(SAMPLE).unwrap();
            let config =
                script.configure(HarnessConfig::default().with_base_url("http://staging:8080"));
            assert_eq!(config.base_url.as_deref(), Some("http://staging:8080"));
        }
    }
}
