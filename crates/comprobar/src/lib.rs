//! Comprobar: browser-driven functional verification harness
//!
//! Comprobar (Spanish: "to verify") drives a Chromium page through a
//! declarative script, records what the page does along the way (console,
//! network, WebSockets, page errors) and turns every step into a classified
//! result: passed, failed or warned.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   COMPROBAR Architecture                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Script     │    │ Harness    │    │ PageDriver │            │
//! │   │ (YAML/JSON)│───►│ + Actions  │───►│ (chromium) │            │
//! │   └────────────┘    └─────┬──────┘    └─────┬──────┘            │
//! │                           │                 │ events             │
//! │                     ┌─────▼──────┐    ┌─────▼──────┐            │
//! │                     │ Assertions │    │ Recorder   │            │
//! │                     └─────┬──────┘    └─────┬──────┘            │
//! │                           └──────┬──────────┘                    │
//! │                            ┌─────▼──────┐                        │
//! │                            │ Report +   │                        │
//! │                            │ Emitter    │                        │
//! │                            └────────────┘                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use comprobar::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() {
//! let browser = MockBrowser::new().with_element(MockElement::new("#start"));
//! let script = Script::new("smoke")
//!     .step(Step::navigate("Open", "/"))
//!     .step(Step::click("Start", Locator::new("#start")));
//! let config = HarnessConfig::default().with_base_url("http://localhost:3000");
//! let mut harness = Harness::new(config, browser.launcher());
//! let outcome = harness.run(&script, CancellationToken::new()).await;
//! assert!(outcome.report.is_success());
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

mod action;
mod assertion;
mod config;
#[allow(clippy::missing_errors_doc)]
mod driver;
#[allow(clippy::missing_errors_doc, clippy::cast_precision_loss)]
mod emitter;
mod harness;
mod locator;
mod recorder;
#[allow(clippy::missing_errors_doc, clippy::cast_precision_loss)]
mod report;
mod result;
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap
)]
mod retry;
#[allow(clippy::missing_errors_doc)]
mod script;
mod session;
mod step;
mod wait;
mod websocket;

pub use action::{locate, ActionDriver, RunContext};
pub use assertion::{check, AssertionEngine, Expectation, Matcher, Severity, Verdict};
pub use config::{
    HarnessConfig, ObservationPolicy, Permission, RecorderLimits, SessionConfig, Viewport,
    DEFAULT_LAUNCH_TIMEOUT_MS, DEFAULT_MAX_EVENTS, DEFAULT_MAX_PAYLOAD_BYTES,
    DEFAULT_STEP_TIMEOUT_MS,
};
#[cfg(feature = "browser")]
pub use driver::{ChromiumDriver, ChromiumLauncher};
pub use driver::{
    ElementState, Launcher, MockBrowser, MockDriver, MockElement, MockLauncher, PageDriver,
};
pub use emitter::{render_html, render_junit, render_text, slugify, Emitter};
pub use harness::{Harness, HarnessState, RunOutcome, LAUNCH_STEP};
pub use locator::{Locator, MatchMode, Selector};
pub use recorder::{
    ConsoleLevel, EventCategory, EventFilter, EventKind, EventSink, ObservationHandle,
    ObservedEvent, Recorder,
};
pub use report::{
    Report, ReportComparison, RunStatus, SkippedStep, StatusDrift, StepResult, StepStatus, Summary,
};
pub use result::{ErrorKind, HarnessError, HarnessResult};
pub use retry::RetryPolicy;
pub use script::{HarnessOverrides, Script};
pub use session::{Session, SessionController};
pub use step::{Probe, Step, StepAction};
pub use wait::{poll_until, LoadState, WaitCondition, NETWORK_IDLE_THRESHOLD_MS};
pub use websocket::{
    truncate_payload, ConnectionStats, WebSocketPhase, WebSocketState, WebSocketSummary,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::action::{ActionDriver, RunContext};
    pub use super::assertion::*;
    pub use super::config::*;
    pub use super::driver::*;
    pub use super::emitter::Emitter;
    pub use super::harness::*;
    pub use super::locator::*;
    pub use super::recorder::*;
    pub use super::report::*;
    pub use super::result::*;
    pub use super::retry::*;
    pub use super::script::*;
    pub use super::session::*;
    pub use super::step::*;
    pub use super::wait::{LoadState, WaitCondition};
    pub use super::websocket::*;
}
