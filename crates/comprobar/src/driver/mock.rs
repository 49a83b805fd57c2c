//! In-memory driver for tests and dry runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{ElementState, Launcher, PageDriver};
use crate::config::{Permission, SessionConfig};
use crate::locator::Selector;
use crate::recorder::{EventKind, EventSink};
use crate::result::{HarnessError, HarnessResult};
use crate::wait::LoadState;

/// Minimal PNG returned by mock screenshots
const MOCK_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Page name used for mock events
const PAGE: &str = "main";

/// Element on the mock page
#[derive(Debug, Clone, Default)]
pub struct MockElement {
    /// CSS selector this element answers to
    pub css: String,
    /// Text content
    pub text: String,
    /// `data-testid` attribute
    pub test_id: Option<String>,
    /// Visible
    pub visible: bool,
    /// Enabled
    pub enabled: bool,
    /// Input value
    pub value: String,
    /// Element only matches after this many `count` calls
    pub appears_after_polls: u32,
    /// Events emitted when the element is clicked
    pub on_click: Vec<EventKind>,
}

impl MockElement {
    /// Visible, enabled element matching `css`
    #[must_use]
    pub fn new(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            visible: true,
            enabled: true,
            ..Self::default()
        }
    }

    /// Set text content
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set test id
    #[must_use]
    pub fn with_test_id(mut self, id: impl Into<String>) -> Self {
        self.test_id = Some(id.into());
        self
    }

    /// Mark hidden
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Mark disabled
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Delay the element's appearance
    #[must_use]
    pub const fn appears_after(mut self, polls: u32) -> Self {
        self.appears_after_polls = polls;
        self
    }

    /// Emit `event` on click
    #[must_use]
    pub fn emits_on_click(mut self, event: EventKind) -> Self {
        self.on_click.push(event);
        self
    }

    fn matches(&self, selector: &Selector) -> bool {
        match selector {
            Selector::Css(css) | Selector::XPath(css) => self.css == *css,
            Selector::Text(text) => self.text.contains(text.as_str()),
            Selector::TestId(id) => self.test_id.as_deref() == Some(id.as_str()),
            Selector::CssWithText { css, text } => {
                self.css == *css && self.text.contains(text.as_str())
            }
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    url: String,
    title: String,
    elements: Vec<MockElement>,
    unreachable: Vec<String>,
    eval: HashMap<String, Result<serde_json::Value, String>>,
    eval_delay: HashMap<String, Duration>,
    on_navigate: Vec<EventKind>,
    navigate_delay: Duration,
    screenshot_error: Option<String>,
    launch_error: Option<String>,
    subscribe_error: Option<String>,
    close_error: Option<String>,
    polls: u32,
    sink: Option<EventSink>,
    granted: Vec<(Option<String>, Permission)>,
    history: Vec<String>,
    launches: u32,
    closes: u32,
}

impl MockState {
    fn visible_matches(&self, selector: &Selector) -> Vec<usize> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.appears_after_polls <= self.polls && e.matches(selector))
            .map(|(i, _)| i)
            .collect()
    }

    fn element_mut(&mut self, selector: &Selector, index: usize) -> HarnessResult<&mut MockElement> {
        let position = self
            .visible_matches(selector)
            .get(index)
            .copied()
            .ok_or_else(|| HarnessError::interaction(selector.to_string(), "element not found"))?;
        Ok(&mut self.elements[position])
    }
}

/// Shared mock page state with a builder API.
///
/// Clones share state, so a test can keep one handle for assertions while the
/// harness owns the driver.
#[derive(Debug, Clone, Default)]
pub struct MockBrowser {
    state: Arc<Mutex<MockState>>,
}

impl MockBrowser {
    /// Empty page at `about:blank`
    #[must_use]
    pub fn new() -> Self {
        let browser = Self::default();
        browser.lock().url = "about:blank".to_string();
        browser
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an element
    #[must_use]
    pub fn with_element(self, element: MockElement) -> Self {
        self.lock().elements.push(element);
        self
    }

    /// Set the document title
    #[must_use]
    pub fn with_title(self, title: impl Into<String>) -> Self {
        self.lock().title = title.into();
        self
    }

    /// Navigations to URLs starting with `prefix` fail
    #[must_use]
    pub fn unreachable(self, prefix: impl Into<String>) -> Self {
        self.lock().unreachable.push(prefix.into());
        self
    }

    /// Result for evaluating `script`
    #[must_use]
    pub fn with_eval(self, script: impl Into<String>, value: serde_json::Value) -> Self {
        self.lock().eval.insert(script.into(), Ok(value));
        self
    }

    /// Evaluating `script` throws `message`
    #[must_use]
    pub fn with_eval_error(self, script: impl Into<String>, message: impl Into<String>) -> Self {
        self.lock().eval.insert(script.into(), Err(message.into()));
        self
    }

    /// `script` returns a promise that settles after `delay`
    #[must_use]
    pub fn with_eval_delay(self, script: impl Into<String>, delay: Duration) -> Self {
        self.lock().eval_delay.insert(script.into(), delay);
        self
    }

    /// Emit `event` after every navigation
    #[must_use]
    pub fn on_navigate(self, event: EventKind) -> Self {
        self.lock().on_navigate.push(event);
        self
    }

    /// Delay every navigation
    #[must_use]
    pub fn with_navigate_delay(self, delay: Duration) -> Self {
        self.lock().navigate_delay = delay;
        self
    }

    /// Screenshots fail with `message`
    #[must_use]
    pub fn failing_screenshots(self, message: impl Into<String>) -> Self {
        self.lock().screenshot_error = Some(message.into());
        self
    }

    /// Launching fails with `message`
    #[must_use]
    pub fn failing_launch(self, message: impl Into<String>) -> Self {
        self.lock().launch_error = Some(message.into());
        self
    }

    /// Event subscriptions fail with `message`
    #[must_use]
    pub fn failing_subscribe(self, message: impl Into<String>) -> Self {
        self.lock().subscribe_error = Some(message.into());
        self
    }

    /// Closing the page fails with `message`
    #[must_use]
    pub fn failing_close(self, message: impl Into<String>) -> Self {
        self.lock().close_error = Some(message.into());
        self
    }

    /// Launcher producing drivers over this state
    #[must_use]
    pub fn launcher(&self) -> MockLauncher {
        MockLauncher {
            browser: self.clone(),
        }
    }

    /// Driver over this state
    #[must_use]
    pub fn driver(&self) -> MockDriver {
        MockDriver {
            browser: self.clone(),
            closed: false,
        }
    }

    /// Emit an event as if the page produced it
    pub fn emit(&self, event: EventKind) {
        let sink = self.lock().sink.clone();
        if let Some(sink) = sink {
            sink.record(PAGE, event);
        }
    }

    /// Current input value of the first element matching `css`
    #[must_use]
    pub fn value_of(&self, css: &str) -> Option<String> {
        self.lock()
            .elements
            .iter()
            .find(|e| e.css == css)
            .map(|e| e.value.clone())
    }

    /// Recorded driver calls, e.g. `navigate:http://x`
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Whether any recorded call starts with `prefix`
    #[must_use]
    pub fn was_called(&self, prefix: &str) -> bool {
        self.lock().history.iter().any(|c| c.starts_with(prefix))
    }

    /// Granted permissions
    #[must_use]
    pub fn granted(&self) -> Vec<(Option<String>, Permission)> {
        self.lock().granted.clone()
    }

    /// Number of successful launches
    #[must_use]
    pub fn launches(&self) -> u32 {
        self.lock().launches
    }

    /// Number of times a driver was closed
    #[must_use]
    pub fn closes(&self) -> u32 {
        self.lock().closes
    }
}

/// [`Launcher`] over a [`MockBrowser`]
#[derive(Debug, Clone)]
pub struct MockLauncher {
    browser: MockBrowser,
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(&self, config: &SessionConfig) -> HarnessResult<Box<dyn PageDriver>> {
        let mut state = self.browser.lock();
        if let Some(message) = state.launch_error.clone() {
            return Err(HarnessError::launch(message));
        }
        state.launches += 1;
        state
            .history
            .push(format!("launch:headless={}", config.headless));
        drop(state);
        Ok(Box::new(self.browser.driver()))
    }
}

/// [`PageDriver`] over a [`MockBrowser`]
#[derive(Debug)]
pub struct MockDriver {
    browser: MockBrowser,
    closed: bool,
}

impl MockDriver {
    fn record(&self, call: String) {
        self.browser.lock().history.push(call);
    }

    fn emit_all(&self, events: Vec<EventKind>) {
        for event in events {
            self.browser.emit(event);
        }
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    async fn navigate(&mut self, url: &str, wait_until: LoadState) -> HarnessResult<()> {
        let delay = {
            let mut state = self.browser.lock();
            state.history.push(format!("navigate:{url}"));
            state.navigate_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let refused = self
            .browser
            .lock()
            .unreachable
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()));
        if refused {
            self.browser.emit(EventKind::RequestFailed {
                method: "GET".into(),
                url: url.to_string(),
                error: "net::ERR_CONNECTION_REFUSED".into(),
            });
            return Err(HarnessError::navigation(url, "net::ERR_CONNECTION_REFUSED"));
        }
        let events = {
            let mut state = self.browser.lock();
            state.url = url.to_string();
            state.on_navigate.clone()
        };
        tracing::trace!(url, %wait_until, "mock navigation");
        self.browser.emit(EventKind::Request {
            method: "GET".into(),
            url: url.to_string(),
        });
        self.browser.emit(EventKind::Response {
            url: url.to_string(),
            status: 200,
        });
        self.emit_all(events);
        Ok(())
    }

    async fn current_url(&self) -> HarnessResult<String> {
        Ok(self.browser.lock().url.clone())
    }

    async fn title(&self) -> HarnessResult<String> {
        Ok(self.browser.lock().title.clone())
    }

    async fn count(&self, selector: &Selector) -> HarnessResult<usize> {
        let mut state = self.browser.lock();
        state.polls += 1;
        Ok(state.visible_matches(selector).len())
    }

    async fn element_state(&self, selector: &Selector, index: usize) -> HarnessResult<ElementState> {
        let mut state = self.browser.lock();
        let element = state.element_mut(selector, index)?;
        Ok(ElementState {
            visible: element.visible,
            enabled: element.enabled,
        })
    }

    async fn click(&self, selector: &Selector, index: usize) -> HarnessResult<()> {
        let events = {
            let mut state = self.browser.lock();
            let events = state.element_mut(selector, index)?.on_click.clone();
            state.history.push(format!("click:{selector}"));
            events
        };
        self.emit_all(events);
        Ok(())
    }

    async fn fill(&self, selector: &Selector, index: usize, value: &str) -> HarnessResult<()> {
        let mut state = self.browser.lock();
        state.element_mut(selector, index)?.value = value.to_string();
        state.history.push(format!("fill:{selector}={value}"));
        Ok(())
    }

    async fn select_option(
        &self,
        selector: &Selector,
        index: usize,
        value: &str,
    ) -> HarnessResult<()> {
        let mut state = self.browser.lock();
        state.element_mut(selector, index)?.value = value.to_string();
        state.history.push(format!("select:{selector}={value}"));
        Ok(())
    }

    async fn text_content(&self, selector: &Selector, index: usize) -> HarnessResult<String> {
        let mut state = self.browser.lock();
        Ok(state.element_mut(selector, index)?.text.clone())
    }

    async fn evaluate(&self, script: &str) -> HarnessResult<serde_json::Value> {
        self.record(format!("evaluate:{script}"));
        let delay = self.browser.lock().eval_delay.get(script).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.browser.lock().eval.get(script) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(message)) => Err(HarnessError::evaluation(message.clone())),
            None => Ok(serde_json::Value::Null),
        }
    }

    async fn screenshot(&self) -> HarnessResult<Vec<u8>> {
        match self.browser.lock().screenshot_error.clone() {
            Some(message) => Err(HarnessError::Screenshot { message }),
            None => Ok(MOCK_PNG.to_vec()),
        }
    }

    async fn grant_permissions(
        &mut self,
        origin: Option<&str>,
        permissions: &[Permission],
    ) -> HarnessResult<()> {
        let mut state = self.browser.lock();
        for permission in permissions {
            state
                .granted
                .push((origin.map(ToString::to_string), *permission));
        }
        Ok(())
    }

    async fn subscribe(&mut self, sink: EventSink) -> HarnessResult<()> {
        let mut state = self.browser.lock();
        if let Some(message) = state.subscribe_error.clone() {
            return Err(HarnessError::invalid_state(message));
        }
        state.sink = Some(sink);
        Ok(())
    }

    async fn close(&mut self) -> HarnessResult<()> {
        if !self.closed {
            let mut state = self.browser.lock();
            if let Some(message) = state.close_error.clone() {
                return Err(HarnessError::invalid_state(message));
            }
            self.closed = true;
            state.closes += 1;
            state.sink = None;
            state.history.push("close".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::RecorderLimits;
    use crate::recorder::Recorder;
    use std::time::Instant;

    mod elements {
        use super::*;

        #[tokio::test]
        async fn test_count_and_fill() {
            let browser = MockBrowser::new()
                .with_element(MockElement::new("#name"))
                .with_element(MockElement::new("button").with_text("Save"))
                .with_element(MockElement::new("button").with_text("Cancel"));
            let mut driver = browser.driver();
            assert_eq!(driver.count(&Selector::css("button")).await.unwrap(), 2);
            assert_eq!(driver.count(&Selector::text("Save")).await.unwrap(), 1);
            driver
                .fill(&Selector::css("#name"), 0, "Ada")
                .await
                .unwrap();
            assert_eq!(browser.value_of("#name").as_deref(), Some("Ada"));
        }

        #[tokio::test]
        async fn test_delayed_element() {
            let browser =
                MockBrowser::new().with_element(MockElement::new("#late").appears_after(2));
            let driver = browser.driver();
            let selector = Selector::css("#late");
            assert_eq!(driver.count(&selector).await.unwrap(), 0);
            assert_eq!(driver.count(&selector).await.unwrap(), 1);
        }

        #[tokio::test]
        async fn test_missing_element_is_interaction_error() {
            let mut driver = MockBrowser::new().driver();
            let err = driver.click(&Selector::css("#nope"), 0).await.unwrap_err();
            assert!(matches!(err, HarnessError::Interaction { .. }));
        }
    }

    mod evaluation {
        use super::*;

        #[tokio::test]
        async fn test_async_result_is_awaited() {
            let script = "fetch('/health').then(r => r.status)";
            let driver = MockBrowser::new()
                .with_eval(script, serde_json::json!(200))
                .with_eval_delay(script, Duration::from_millis(20))
                .driver();
            let started = Instant::now();
            assert_eq!(driver.evaluate(script).await.unwrap(), serde_json::json!(200));
            assert!(started.elapsed() >= Duration::from_millis(20));
        }

        #[tokio::test]
        async fn test_rejected_promise_is_evaluation_error() {
            let script = "Promise.reject(new Error('offline'))";
            let driver = MockBrowser::new()
                .with_eval_error(script, "Error: offline")
                .with_eval_delay(script, Duration::from_millis(5))
                .driver();
            let err = driver.evaluate(script).await.unwrap_err();
            assert!(matches!(err, HarnessError::Evaluation { .. }));
        }
    }

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn test_unreachable_navigation() {
            let mut driver = MockBrowser::new().unreachable("http://localhost:1").driver();
            let err = driver
                .navigate("http://localhost:1/", LoadState::Load)
                .await
                .unwrap_err();
            assert!(matches!(err, HarnessError::Navigation { .. }));
        }

        #[tokio::test]
        async fn test_events_reach_subscribed_sink() {
            let browser = MockBrowser::new().with_element(
                MockElement::new("#go").emits_on_click(EventKind::PageError {
                    message: "boom".into(),
                }),
            );
            let mut driver = browser.driver();
            let (sink, handle) = Recorder::new(RecorderLimits::default()).channel(Instant::now());
            driver.subscribe(sink).await.unwrap();
            driver
                .navigate("http://app/", LoadState::Load)
                .await
                .unwrap();
            driver.click(&Selector::css("#go"), 0).await.unwrap();
            assert_eq!(handle.len(), 3);
        }

        #[tokio::test]
        async fn test_close_is_counted_once() {
            let browser = MockBrowser::new();
            let mut driver = browser.driver();
            driver.close().await.unwrap();
            driver.close().await.unwrap();
            assert_eq!(browser.closes(), 1);
        }

        #[tokio::test]
        async fn test_failing_launch() {
            let browser = MockBrowser::new().failing_launch("no chromium");
            let err = browser
                .launcher()
                .launch(&SessionConfig::default())
                .await
                .unwrap_err();
            assert!(matches!(err, HarnessError::Launch { .. }));
            assert_eq!(browser.launches(), 0);
        }
    }
}
