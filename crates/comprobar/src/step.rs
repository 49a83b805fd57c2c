//! Scripted steps.
//!
//! A step is data: one action, an optional expectation on its output, and the
//! timing/retry knobs that govern how hard the harness tries.
//!
//! ```yaml
//! - description: Open the dashboard
//!   action: navigate
//!   url: /dashboard
//!   wait_until: network_idle
//!   critical: true
//! - description: Start button is unique and clickable
//!   action: click
//!   target: { css: "button", has_text: "Start" }
//!   retries: 2
//! - description: Audio frames flowing
//!   action: check
//!   probe: { events: { filter: { kind: websocket, phase: frame_sent } } }
//!   expect: { threshold: { min: 1 }, severity: soft }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::assertion::Expectation;
use crate::locator::Locator;
use crate::recorder::EventFilter;
use crate::wait::{LoadState, WaitCondition};

/// Value a `check` step reads from the page or recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    /// Current URL
    Url,
    /// Document title
    Title,
    /// Text content of an element
    Text {
        /// Target element
        target: Locator,
    },
    /// Number of elements matching a selector (match mode ignored)
    Count {
        /// Target elements
        target: Locator,
    },
    /// Number of recorded events matching a filter
    Events {
        /// Event filter
        #[serde(default)]
        filter: EventFilter,
    },
    /// Result of an in-page script
    Evaluate {
        /// Script expression
        script: String,
    },
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url => f.write_str("url"),
            Self::Title => f.write_str("title"),
            Self::Text { target } => write!(f, "text of {target}"),
            Self::Count { target } => write!(f, "count of {target}"),
            Self::Events { filter } => write!(f, "events [{filter}]"),
            Self::Evaluate { script } => write!(f, "evaluate `{script}`"),
        }
    }
}

/// What a step does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// Load a URL (relative URLs resolve against the base URL)
    Navigate {
        /// Target URL
        url: String,
        /// Load condition
        #[serde(default)]
        wait_until: LoadState,
    },
    /// Click an element
    Click {
        /// Target element
        target: Locator,
    },
    /// Replace an input's value
    Fill {
        /// Target element
        target: Locator,
        /// Text to enter
        value: String,
    },
    /// Choose a select option by value or label
    Select {
        /// Target element
        target: Locator,
        /// Option value or label
        value: String,
    },
    /// Block until a condition holds
    Wait {
        /// Condition
        #[serde(with = "serde_yaml_ng::with::singleton_map")]
        until: WaitCondition,
    },
    /// Run a script in the page
    Evaluate {
        /// Script expression
        script: String,
    },
    /// Capture the viewport
    Screenshot {
        /// Name used in the file name (defaults to the description)
        #[serde(default)]
        name: Option<String>,
    },
    /// Read a probe and compare it against `expect`
    Check {
        /// Value to read
        #[serde(with = "serde_yaml_ng::with::singleton_map")]
        probe: Probe,
    },
}

impl StepAction {
    /// Action name as written in scripts
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::Fill { .. } => "fill",
            Self::Select { .. } => "select",
            Self::Wait { .. } => "wait",
            Self::Evaluate { .. } => "evaluate",
            Self::Screenshot { .. } => "screenshot",
            Self::Check { .. } => "check",
        }
    }

    /// Element target, if the action has one
    #[must_use]
    pub const fn target(&self) -> Option<&Locator> {
        match self {
            Self::Click { target } | Self::Fill { target, .. } | Self::Select { target, .. } => {
                Some(target)
            }
            _ => None,
        }
    }

    /// Whether the action yields a value an expectation can inspect
    #[must_use]
    pub const fn produces_value(&self) -> bool {
        matches!(self, Self::Evaluate { .. } | Self::Check { .. })
    }

    /// Whether failed attempts may be retried
    #[must_use]
    pub const fn is_interaction(&self) -> bool {
        matches!(
            self,
            Self::Click { .. } | Self::Fill { .. } | Self::Select { .. }
        )
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Navigate { url, wait_until } => write!(f, "navigate {url} ({wait_until})"),
            Self::Click { target } => write!(f, "click {target}"),
            Self::Fill { target, .. } => write!(f, "fill {target}"),
            Self::Select { target, value } => write!(f, "select {value:?} in {target}"),
            Self::Wait { until } => write!(f, "wait {until}"),
            Self::Evaluate { script } => write!(f, "evaluate `{script}`"),
            Self::Screenshot { name } => {
                write!(f, "screenshot {}", name.as_deref().unwrap_or("(unnamed)"))
            }
            Self::Check { probe } => write!(f, "check {probe}"),
        }
    }
}

/// A single scripted action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Human-readable description, used in reports and screenshot names
    pub description: String,
    /// Action
    #[serde(flatten)]
    pub action: StepAction,
    /// Step budget (defaults to the harness timeout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Extra attempts for click/fill/select
    #[serde(default)]
    pub retries: u32,
    /// Abort the run if this step fails
    #[serde(default)]
    pub critical: bool,
    /// Expectation on the action's output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<Expectation>,
    /// Capture a screenshot after the step
    #[serde(default)]
    pub screenshot: bool,
}

impl Step {
    /// Create a step with default knobs
    #[must_use]
    pub fn new(description: impl Into<String>, action: StepAction) -> Self {
        Self {
            description: description.into(),
            action,
            timeout_ms: None,
            retries: 0,
            critical: false,
            expect: None,
            screenshot: false,
        }
    }

    /// Navigate step
    #[must_use]
    pub fn navigate(description: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            description,
            StepAction::Navigate {
                url: url.into(),
                wait_until: LoadState::default(),
            },
        )
    }

    /// Click step
    #[must_use]
    pub fn click(description: impl Into<String>, target: Locator) -> Self {
        Self::new(description, StepAction::Click { target })
    }

    /// Fill step
    #[must_use]
    pub fn fill(description: impl Into<String>, target: Locator, value: impl Into<String>) -> Self {
        Self::new(
            description,
            StepAction::Fill {
                target,
                value: value.into(),
            },
        )
    }

    /// Wait step
    #[must_use]
    pub fn wait(description: impl Into<String>, until: WaitCondition) -> Self {
        Self::new(description, StepAction::Wait { until })
    }

    /// Check step
    #[must_use]
    pub fn check(description: impl Into<String>, probe: Probe, expect: Expectation) -> Self {
        Self::new(description, StepAction::Check { probe }).with_expect(expect)
    }

    /// Set the timeout
    #[must_use]
    pub const fn with_timeout(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Set the retry budget
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Mark critical
    #[must_use]
    pub const fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Attach an expectation
    #[must_use]
    pub fn with_expect(mut self, expect: Expectation) -> Self {
        self.expect = Some(expect);
        self
    }

    /// Capture a screenshot after the step
    #[must_use]
    pub const fn with_screenshot(mut self) -> Self {
        self.screenshot = true;
        self
    }
}
