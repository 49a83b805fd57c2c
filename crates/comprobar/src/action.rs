//! Step execution against a live session.
//!
//! [`ActionDriver::execute`] never returns an error: every failure is folded
//! into the [`StepResult`] for the step, with its [`ErrorKind`](crate::ErrorKind).

use serde_json::Value;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::assertion::AssertionEngine;
use crate::config::HarnessConfig;
use crate::driver::PageDriver;
use crate::emitter::Emitter;
use crate::locator::{Locator, Selector};
use crate::recorder::ObservationHandle;
use crate::report::StepResult;
use crate::result::{HarnessError, HarnessResult};
use crate::session::Session;
use crate::step::{Probe, Step, StepAction};
use crate::wait::{poll_until, WaitCondition};

/// Shared state a step needs besides the session
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    /// Effective harness configuration
    pub config: &'a HarnessConfig,
    /// Events recorded for the session
    pub observations: &'a ObservationHandle,
    /// Screenshot and report writer
    pub emitter: &'a Emitter,
}

impl RunContext<'_> {
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms.max(1))
    }

    fn budget(&self, step: &Step) -> Duration {
        Duration::from_millis(step.timeout_ms.unwrap_or(self.config.default_timeout_ms))
    }
}

#[derive(Debug, Clone, Copy)]
enum Interaction<'a> {
    Click,
    Fill(&'a str),
    Select(&'a str),
}

impl Interaction<'_> {
    async fn apply(
        self,
        driver: &dyn PageDriver,
        selector: &Selector,
        index: usize,
    ) -> HarnessResult<()> {
        match self {
            Self::Click => driver.click(selector, index).await,
            Self::Fill(value) => driver.fill(selector, index, value).await,
            Self::Select(value) => driver.select_option(selector, index, value).await,
        }
    }
}

/// Executes steps one at a time
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionDriver {
    engine: AssertionEngine,
}

impl ActionDriver {
    /// Create a driver
    #[must_use]
    pub const fn new() -> Self {
        Self {
            engine: AssertionEngine::new(),
        }
    }

    /// Run `step` and classify the outcome.
    ///
    /// The result carries the step's time window relative to the session
    /// start. When the step asks for a screenshot one is taken afterwards,
    /// whatever the outcome.
    pub async fn execute(
        &self,
        session: &mut Session,
        index: usize,
        step: &Step,
        ctx: &RunContext<'_>,
    ) -> StepResult {
        let started_ms = session.elapsed_ms();
        tracing::debug!(index, action = step.action.name(), description = %step.description, "step started");

        let mut result = match self.perform(session, index, step, ctx).await {
            Ok(result) => result,
            Err(err) => {
                let mut result = StepResult::failed(index, &step.description, &err);
                if let StepAction::Wait { until } = &step.action {
                    result.annotate(&format!("waiting for {until}"));
                }
                result
            }
        };

        if step.screenshot && result.screenshot.is_none() {
            match capture(session, index, &step.description, ctx).await {
                Ok(path) => result = result.with_screenshot(path),
                Err(err) => result.annotate(&err.to_string()),
            }
        }

        let duration_ms = session.elapsed_ms().saturating_sub(started_ms);
        tracing::debug!(index, status = ?result.status, duration_ms, "step finished");
        result.with_timing(started_ms, duration_ms)
    }

    async fn perform(
        &self,
        session: &mut Session,
        index: usize,
        step: &Step,
        ctx: &RunContext<'_>,
    ) -> HarnessResult<StepResult> {
        let budget = ctx.budget(step);
        let ms = millis(budget);
        let passed = |message: String| StepResult::passed(index, &step.description, message);

        match &step.action {
            StepAction::Navigate { url, wait_until } => {
                let resolved = ctx.config.resolve_url(url);
                let driver = session.driver_mut()?;
                tokio::time::timeout(budget, driver.navigate(&resolved, *wait_until))
                    .await
                    .map_err(|_| {
                        HarnessError::navigation(&resolved, format!("not {wait_until} within {ms}ms"))
                    })??;
                Ok(passed(format!("loaded {resolved}")))
            }
            StepAction::Click { target } => {
                interact(session.driver()?, target, Interaction::Click, step.retries, budget, ctx)
                    .await?;
                Ok(passed(format!("clicked {target}")))
            }
            StepAction::Fill { target, value } => {
                let op = Interaction::Fill(value);
                interact(session.driver()?, target, op, step.retries, budget, ctx).await?;
                Ok(passed(format!("filled {target}")))
            }
            StepAction::Select { target, value } => {
                let op = Interaction::Select(value);
                interact(session.driver()?, target, op, step.retries, budget, ctx).await?;
                Ok(passed(format!("selected '{value}' in {target}")))
            }
            StepAction::Wait { until } => {
                wait_for(session.driver()?, until, budget, ctx).await?;
                Ok(passed(format!("{until}")))
            }
            StepAction::Evaluate { script } => {
                let driver = session.driver()?;
                let value = tokio::time::timeout(budget, driver.evaluate(script))
                    .await
                    .map_err(|_| HarnessError::Timeout { ms })??;
                Ok(self.engine.evaluate(index, step, &value))
            }
            StepAction::Screenshot { name } => {
                let label = name.as_deref().unwrap_or(&step.description);
                let path = capture(session, index, label, ctx).await?;
                Ok(passed(format!("saved {}", path.display())).with_screenshot(path))
            }
            StepAction::Check { probe } => {
                let value = read_probe(session.driver()?, probe, budget, ctx).await?;
                Ok(self.engine.evaluate(index, step, &value))
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Resolve `locator` to a match index, polling until it matches or `timeout`
/// elapses.
///
/// Ambiguity under strict matching fails immediately.
///
/// # Errors
///
/// [`HarnessError::Interaction`] naming the selector when nothing matched,
/// [`HarnessError::LocatorAmbiguity`] for several strict matches.
pub async fn locate(
    driver: &dyn PageDriver,
    locator: &Locator,
    timeout: Duration,
    interval: Duration,
) -> HarnessResult<usize> {
    let selector = locator.selector();
    let mode = locator.match_mode();
    let found = poll_until(timeout, interval, || async move {
        let count = driver.count(selector).await?;
        mode.pick(selector, count)
    })
    .await?;
    found.ok_or_else(|| {
        HarnessError::interaction(
            selector.to_string(),
            format!("no element matched within {}ms", millis(timeout)),
        )
    })
}

async fn locate_actionable(
    driver: &dyn PageDriver,
    locator: &Locator,
    timeout: Duration,
    interval: Duration,
) -> HarnessResult<usize> {
    let deadline = Instant::now() + timeout;
    let selector = locator.selector();
    let index = locate(driver, locator, timeout, interval).await?;

    let remaining = deadline.saturating_duration_since(Instant::now());
    let ready = poll_until(remaining, interval, || async move {
        let state = driver.element_state(selector, index).await?;
        Ok(state.is_actionable().then_some(()))
    })
    .await?;
    if ready.is_some() {
        return Ok(index);
    }

    let state = driver.element_state(selector, index).await?;
    let reason = if state.visible {
        "element is disabled"
    } else {
        "element is not visible"
    };
    Err(HarnessError::interaction(
        selector.to_string(),
        format!("{reason} after {}ms", millis(timeout)),
    ))
}

async fn interact(
    driver: &dyn PageDriver,
    target: &Locator,
    op: Interaction<'_>,
    retries: u32,
    budget: Duration,
    ctx: &RunContext<'_>,
) -> HarnessResult<()> {
    let interval = ctx.poll_interval();
    ctx.config
        .retry
        .run(retries, |attempt| async move {
            if attempt > 0 {
                tracing::debug!(attempt, %target, "retrying");
            }
            let act = async {
                let index = locate_actionable(driver, target, budget, interval).await?;
                op.apply(driver, target.selector(), index).await
            };
            tokio::time::timeout(budget, act).await.map_err(|_| {
                HarnessError::interaction(
                    target.selector().to_string(),
                    format!("not actionable within {}ms", millis(budget)),
                )
            })?
        })
        .await
}

async fn wait_for(
    driver: &dyn PageDriver,
    until: &WaitCondition,
    budget: Duration,
    ctx: &RunContext<'_>,
) -> HarnessResult<()> {
    let interval = ctx.poll_interval();
    let reached = match until {
        WaitCondition::Duration { ms } => {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
            Some(())
        }
        WaitCondition::Visible { target } => {
            let selector = target.selector();
            let mode = target.match_mode();
            poll_until(budget, interval, || async move {
                let count = driver.count(selector).await?;
                match mode.pick(selector, count)? {
                    Some(index) => {
                        let state = driver.element_state(selector, index).await?;
                        Ok(state.visible.then_some(()))
                    }
                    None => Ok(None),
                }
            })
            .await?
        }
        WaitCondition::Hidden { target } => {
            let selector = target.selector();
            poll_until(budget, interval, || async move {
                let count = driver.count(selector).await?;
                for index in 0..count {
                    if driver.element_state(selector, index).await?.visible {
                        return Ok(None);
                    }
                }
                Ok(Some(()))
            })
            .await?
        }
        WaitCondition::Event { filter, count } => {
            let observations = ctx.observations;
            poll_until(budget, interval, || async move {
                Ok((observations.count(filter) >= *count).then_some(()))
            })
            .await?
        }
    };
    reached.ok_or(HarnessError::Timeout {
        ms: millis(budget),
    })
}

async fn read_probe(
    driver: &dyn PageDriver,
    probe: &Probe,
    budget: Duration,
    ctx: &RunContext<'_>,
) -> HarnessResult<Value> {
    let ms = millis(budget);
    let read = async {
        Ok::<_, HarnessError>(match probe {
            Probe::Url => Value::String(driver.current_url().await?),
            Probe::Title => Value::String(driver.title().await?),
            Probe::Text { target } => {
                let index = locate(driver, target, budget, ctx.poll_interval()).await?;
                Value::String(driver.text_content(target.selector(), index).await?)
            }
            Probe::Count { target } => Value::from(driver.count(target.selector()).await?),
            Probe::Events { filter } => Value::from(ctx.observations.count(filter)),
            Probe::Evaluate { script } => driver.evaluate(script).await?,
        })
    };
    tokio::time::timeout(budget, read)
        .await
        .map_err(|_| HarnessError::Timeout { ms })?
}

/// Capture the page and write it through the emitter
pub(crate) async fn capture(
    session: &Session,
    index: usize,
    label: &str,
    ctx: &RunContext<'_>,
) -> HarnessResult<PathBuf> {
    let driver = session.driver()?;
    let ms = ctx.config.default_timeout_ms;
    let png = tokio::time::timeout(Duration::from_millis(ms), driver.screenshot())
        .await
        .map_err(|_| HarnessError::Screenshot {
            message: format!("capture timed out after {ms}ms"),
        })??;
    ctx.emitter.save_screenshot(index, label, &png)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::assertion::{Expectation, Matcher};
    use crate::config::RecorderLimits;
    use crate::driver::{MockBrowser, MockElement};
    use crate::recorder::{EventCategory, EventFilter, EventKind, Recorder};
    use crate::report::StepStatus;
    use crate::result::ErrorKind;
    use crate::retry::RetryPolicy;
    use crate::websocket::WebSocketPhase;
    use serde_json::json;

    struct Fixture {
        browser: MockBrowser,
        session: Session,
        observations: ObservationHandle,
        config: HarnessConfig,
        emitter: Emitter,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        async fn new(browser: MockBrowser) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = HarnessConfig::default()
                .with_base_url("http://app.test")
                .with_default_timeout(200)
                .with_poll_interval(5)
                .with_retry(RetryPolicy::fixed(1))
                .with_output_dir(dir.path());
            let mut session = Session::new(config.session.clone(), Box::new(browser.driver()));
            let observations = Recorder::new(RecorderLimits::default())
                .attach(&mut session)
                .await
                .unwrap();
            let emitter = Emitter::from_config(&config);
            Self {
                browser,
                session,
                observations,
                config,
                emitter,
                _dir: dir,
            }
        }

        async fn run(&mut self, index: usize, step: &Step) -> StepResult {
            let ctx = RunContext {
                config: &self.config,
                observations: &self.observations,
                emitter: &self.emitter,
            };
            ActionDriver::new()
                .execute(&mut self.session, index, step, &ctx)
                .await
        }
    }

    mod interactions {
        use super::*;

        #[tokio::test]
        async fn test_click_single_visible_element_passes() {
            let mut fx = Fixture::new(MockBrowser::new().with_element(MockElement::new("#go"))).await;
            let result = fx.run(1, &Step::click("Press go", Locator::new("#go"))).await;
            assert_eq!(result.status, StepStatus::Passed);
            assert!(fx.browser.was_called("click:css=#go"));
        }

        #[tokio::test]
        async fn test_missing_element_names_selector() {
            let mut fx = Fixture::new(MockBrowser::new()).await;
            let step = Step::click("Press missing", Locator::new("#missing")).with_timeout(30);
            let result = fx.run(1, &step).await;
            assert_eq!(result.status, StepStatus::Failed);
            assert_eq!(result.error_kind, Some(ErrorKind::Interaction));
            assert!(result.message.contains("#missing"), "{}", result.message);
        }

        #[tokio::test]
        async fn test_ambiguous_locator_fails_without_retry() {
            let browser = MockBrowser::new()
                .with_element(MockElement::new(".item"))
                .with_element(MockElement::new(".item"));
            let mut fx = Fixture::new(browser).await;
            let step = Step::click("Press item", Locator::new(".item")).with_retries(3);
            let result = fx.run(1, &step).await;
            assert_eq!(result.error_kind, Some(ErrorKind::LocatorAmbiguity));
            assert!(!fx.browser.was_called("click:"));
        }

        #[tokio::test]
        async fn test_first_disambiguates() {
            let browser = MockBrowser::new()
                .with_element(MockElement::new(".item"))
                .with_element(MockElement::new(".item"));
            let mut fx = Fixture::new(browser).await;
            let result = fx.run(1, &Step::click("First", Locator::new(".item").first())).await;
            assert_eq!(result.status, StepStatus::Passed);
        }

        #[tokio::test]
        async fn test_disabled_element_reports_reason() {
            let browser = MockBrowser::new().with_element(MockElement::new("#go").disabled());
            let mut fx = Fixture::new(browser).await;
            let result = fx
                .run(1, &Step::click("Press go", Locator::new("#go")).with_timeout(30))
                .await;
            assert_eq!(result.status, StepStatus::Failed);
            assert!(result.message.contains("disabled"), "{}", result.message);
        }

        #[tokio::test]
        async fn test_late_element_found_by_polling() {
            let browser = MockBrowser::new().with_element(MockElement::new("#late").appears_after(3));
            let mut fx = Fixture::new(browser).await;
            let result = fx.run(1, &Step::click("Press late", Locator::new("#late"))).await;
            assert_eq!(result.status, StepStatus::Passed);
        }

        #[tokio::test]
        async fn test_fill_sets_value() {
            let mut fx = Fixture::new(MockBrowser::new().with_element(MockElement::new("#name"))).await;
            let result = fx
                .run(1, &Step::fill("Type name", Locator::new("#name"), "Ada"))
                .await;
            assert_eq!(result.status, StepStatus::Passed);
            assert_eq!(fx.browser.value_of("#name").as_deref(), Some("Ada"));
        }
    }

    mod navigation {
        use super::*;

        #[tokio::test]
        async fn test_relative_url_resolves_against_base() {
            let mut fx = Fixture::new(MockBrowser::new()).await;
            let result = fx.run(0, &Step::navigate("Open", "/dashboard")).await;
            assert_eq!(result.status, StepStatus::Passed);
            assert!(fx.browser.was_called("navigate:http://app.test/dashboard"));
        }

        #[tokio::test]
        async fn test_unreachable_url_is_navigation_failure() {
            let mut fx = Fixture::new(MockBrowser::new().unreachable("http://localhost:1")).await;
            let result = fx.run(0, &Step::navigate("Open", "http://localhost:1/")).await;
            assert_eq!(result.status, StepStatus::Failed);
            assert_eq!(result.error_kind, Some(ErrorKind::Navigation));
            assert!(!result.message.is_empty());
        }

        #[tokio::test]
        async fn test_slow_navigation_times_out() {
            let browser = MockBrowser::new().with_navigate_delay(Duration::from_millis(500));
            let mut fx = Fixture::new(browser).await;
            let result = fx.run(0, &Step::navigate("Open", "/").with_timeout(20)).await;
            assert_eq!(result.error_kind, Some(ErrorKind::Navigation));
            assert!(result.message.contains("20ms"));
        }
    }

    mod waits_and_checks {
        use super::*;

        #[tokio::test]
        async fn test_soft_threshold_miss_warns() {
            let browser = MockBrowser::new().with_eval("window.audioEvents", json!(5));
            let mut fx = Fixture::new(browser).await;
            let step = Step::check(
                "Enough audio events",
                Probe::Evaluate {
                    script: "window.audioEvents".into(),
                },
                Expectation::soft(Matcher::Threshold {
                    min: Some(10.0),
                    max: None,
                }),
            );
            let result = fx.run(2, &step).await;
            assert_eq!(result.status, StepStatus::Warned);
            assert_eq!(result.error_kind, Some(ErrorKind::AssertionMismatch));
        }

        #[tokio::test]
        async fn test_evaluation_error_becomes_failed_result() {
            let browser = MockBrowser::new().with_eval_error("boom()", "ReferenceError: boom");
            let mut fx = Fixture::new(browser).await;
            let step = Step::new(
                "Throw",
                StepAction::Evaluate {
                    script: "boom()".into(),
                },
            );
            let result = fx.run(1, &step).await;
            assert_eq!(result.error_kind, Some(ErrorKind::Evaluation));
        }

        #[tokio::test]
        async fn test_async_evaluation_is_awaited_before_checking() {
            let script = "fetch('/api/health').then(r => r.status)";
            let browser = MockBrowser::new()
                .with_eval(script, json!(200))
                .with_eval_delay(script, Duration::from_millis(30));
            let mut fx = Fixture::new(browser).await;
            let step = Step::check(
                "Health endpoint answers",
                Probe::Evaluate {
                    script: script.into(),
                },
                Expectation::hard(Matcher::Equals(json!(200))),
            );
            let result = fx.run(1, &step).await;
            assert_eq!(result.status, StepStatus::Passed, "{}", result.message);
        }

        #[tokio::test]
        async fn test_unsettled_evaluation_times_out() {
            let script = "new Promise(() => {})";
            let browser = MockBrowser::new().with_eval_delay(script, Duration::from_secs(5));
            let mut fx = Fixture::new(browser).await;
            let step = Step::new(
                "Never settles",
                StepAction::Evaluate {
                    script: script.into(),
                },
            );
            let result = fx.run(1, &step).await;
            assert_eq!(result.status, StepStatus::Failed);
            assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        }

        #[tokio::test]
        async fn test_wait_for_websocket_frame() {
            let mut fx = Fixture::new(MockBrowser::new()).await;
            let browser = fx.browser.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                browser.emit(EventKind::WebSocket {
                    connection: "1".into(),
                    phase: WebSocketPhase::FrameReceived,
                    payload: Some("hello".into()),
                    truncated: false,
                });
            });
            let step = Step::wait(
                "First frame",
                WaitCondition::Event {
                    filter: EventFilter::kind(EventCategory::Websocket)
                        .with_phase(WebSocketPhase::FrameReceived),
                    count: 1,
                },
            );
            let result = fx.run(1, &step).await;
            assert_eq!(result.status, StepStatus::Passed, "{}", result.message);
        }

        #[tokio::test]
        async fn test_wait_timeout_mentions_condition() {
            let mut fx = Fixture::new(MockBrowser::new()).await;
            let step = Step::wait(
                "Spinner",
                WaitCondition::Visible {
                    target: Locator::new("#spinner"),
                },
            )
            .with_timeout(20);
            let result = fx.run(1, &step).await;
            assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
            assert!(result.message.contains("#spinner"), "{}", result.message);
        }

        #[tokio::test]
        async fn test_hidden_passes_when_absent() {
            let mut fx = Fixture::new(MockBrowser::new()).await;
            let step = Step::wait(
                "Gone",
                WaitCondition::Hidden {
                    target: Locator::new("#modal"),
                },
            );
            assert_eq!(fx.run(1, &step).await.status, StepStatus::Passed);
        }

        #[tokio::test]
        async fn test_title_probe() {
            let mut fx = Fixture::new(MockBrowser::new().with_title("Voice Dashboard")).await;
            let step = Step::check(
                "Title",
                Probe::Title,
                Expectation::hard(Matcher::Contains(json!("Dashboard"))),
            );
            assert_eq!(fx.run(1, &step).await.status, StepStatus::Passed);
        }

        #[tokio::test]
        async fn test_text_probe_reads_element() {
            let browser = MockBrowser::new().with_element(MockElement::new("#status").with_text("Connected"));
            let mut fx = Fixture::new(browser).await;
            let step = Step::check(
                "Status",
                Probe::Text {
                    target: Locator::new("#status"),
                },
                Expectation::hard(Matcher::Equals(json!("Connected"))),
            );
            assert_eq!(fx.run(1, &step).await.status, StepStatus::Passed);
        }
    }

    mod screenshots {
        use super::*;

        #[tokio::test]
        async fn test_screenshot_step_writes_png() {
            let mut fx = Fixture::new(MockBrowser::new()).await;
            let step = Step::new(
                "Landing page",
                StepAction::Screenshot { name: None },
            );
            let result = fx.run(3, &step).await;
            let path = result.screenshot.unwrap();
            assert!(path.exists());
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("step-03-landing-page-"), "{name}");
        }

        #[tokio::test]
        async fn test_screenshot_failure_is_failed_step() {
            let mut fx = Fixture::new(MockBrowser::new().failing_screenshots("no surface")).await;
            let result = fx
                .run(1, &Step::new("Shot", StepAction::Screenshot { name: None }))
                .await;
            assert_eq!(result.status, StepStatus::Failed);
            assert!(result.message.contains("no surface"));
        }

        #[tokio::test]
        async fn test_step_flag_captures_after_action() {
            let mut fx = Fixture::new(MockBrowser::new()).await;
            let result = fx.run(0, &Step::navigate("Open", "/").with_screenshot()).await;
            assert_eq!(result.status, StepStatus::Passed);
            assert!(result.screenshot.is_some());
        }
    }
}
