//! Page driver abstraction.
//!
//! The harness talks to the browser only through [`PageDriver`], so the
//! Chromium backend can be swapped for the in-memory [`MockDriver`] in tests.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  SessionController ── Launcher::launch ──► PageDriver    │
//! │                                              │           │
//! │             ┌────────────────────────────────┴───────┐   │
//! │             │  ChromiumDriver      │  MockDriver     │   │
//! │             │  (CDP, `browser`)    │  (in-memory)    │   │
//! │             └──────────────────────┴─────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```

#[cfg(feature = "browser")]
mod chromium;
mod mock;
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
mod pending;

#[cfg(feature = "browser")]
pub use chromium::{ChromiumDriver, ChromiumLauncher};
pub use mock::{MockBrowser, MockDriver, MockElement, MockLauncher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Permission, SessionConfig};
use crate::locator::Selector;
use crate::recorder::EventSink;
use crate::result::HarnessResult;
use crate::wait::LoadState;

/// Actionability of a located element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementState {
    /// Rendered with a non-empty box and not hidden by style
    pub visible: bool,
    /// Not disabled
    pub enabled: bool,
}

impl ElementState {
    /// Whether clicks and input would reach the element
    #[must_use]
    pub const fn is_actionable(&self) -> bool {
        self.visible && self.enabled
    }
}

/// Operations the harness needs from a browser page.
///
/// Element-level methods take the selector and the index chosen by the
/// caller's match mode; drivers never disambiguate on their own.
#[async_trait]
pub trait PageDriver: Send + Sync + std::fmt::Debug {
    /// Navigate and wait for `wait_until`
    async fn navigate(&mut self, url: &str, wait_until: LoadState) -> HarnessResult<()>;

    /// Current page URL
    async fn current_url(&self) -> HarnessResult<String>;

    /// Document title
    async fn title(&self) -> HarnessResult<String>;

    /// Number of elements matching `selector`
    async fn count(&self, selector: &Selector) -> HarnessResult<usize>;

    /// Visibility and enabled state of match `index`
    async fn element_state(&self, selector: &Selector, index: usize) -> HarnessResult<ElementState>;

    /// Click match `index`
    async fn click(&self, selector: &Selector, index: usize) -> HarnessResult<()>;

    /// Replace the value of match `index`
    async fn fill(&self, selector: &Selector, index: usize, value: &str) -> HarnessResult<()>;

    /// Choose an option of the select element at `index`
    async fn select_option(
        &self,
        selector: &Selector,
        index: usize,
        value: &str,
    ) -> HarnessResult<()>;

    /// Text content of match `index`
    async fn text_content(&self, selector: &Selector, index: usize) -> HarnessResult<String>;

    /// Evaluate a script in the page and return its JSON value
    async fn evaluate(&self, script: &str) -> HarnessResult<serde_json::Value>;

    /// Capture the viewport as PNG
    async fn screenshot(&self) -> HarnessResult<Vec<u8>>;

    /// Grant capabilities for `origin` (or every origin when `None`)
    async fn grant_permissions(
        &mut self,
        origin: Option<&str>,
        permissions: &[Permission],
    ) -> HarnessResult<()>;

    /// Forward console, network, WebSocket and page-error events to `sink`
    async fn subscribe(&mut self, sink: EventSink) -> HarnessResult<()>;

    /// Release the page and its browser
    async fn close(&mut self) -> HarnessResult<()>;
}

/// Produces drivers for new sessions
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Acquire a browser configured per `config`
    async fn launch(&self, config: &SessionConfig) -> HarnessResult<Box<dyn PageDriver>>;
}
