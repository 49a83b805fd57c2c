//! Locator abstraction for element selection.
//!
//! Locators are strict: a selector that matches more than one element is a
//! [`LocatorAmbiguity`](crate::HarnessError::LocatorAmbiguity) error unless
//! the caller explicitly asks for the first or nth match.
//!
//! In scripts a locator is written as a map with exactly one strategy key:
//!
//! ```yaml
//! target: { css: "#send" }
//! target: { text: "Connect", match: first }
//! target: { css: "button", has_text: "Start", match: { nth: 1 } }
//! target: { test_id: "mic-toggle" }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::result::{HarnessError, HarnessResult};

/// Selector strategy for locating elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// CSS selector (e.g., "button.primary")
    Css(String),
    /// XPath selector
    XPath(String),
    /// Innermost elements whose text contains the string
    Text(String),
    /// Test ID selector (data-testid attribute)
    TestId(String),
    /// CSS selector filtered by text content
    CssWithText {
        /// Base CSS selector
        css: String,
        /// Text content to match
        text: String,
    },
}

impl Selector {
    /// Create a CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create an XPath selector
    #[must_use]
    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }

    /// Create a text selector
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a test ID selector
    #[must_use]
    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    /// JavaScript expression evaluating to an array of matching elements
    #[must_use]
    pub fn to_query_all(&self) -> String {
        match self {
            Self::Css(s) => format!("Array.from(document.querySelectorAll({}))", js_str(s)),
            Self::XPath(s) => format!(
                "(() => {{ const r = document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
                 const out = []; for (let i = 0; i < r.snapshotLength; i++) out.push(r.snapshotItem(i)); return out; }})()",
                js_str(s)
            ),
            Self::Text(t) => format!(
                "Array.from(document.querySelectorAll('body *')).filter(el => el.textContent.includes({t}) \
                 && !Array.from(el.children).some(c => c.textContent.includes({t})))",
                t = js_str(t)
            ),
            Self::TestId(id) => format!(
                "Array.from(document.querySelectorAll({}))",
                js_str(&format!("[data-testid=\"{id}\"]"))
            ),
            Self::CssWithText { css, text } => format!(
                "Array.from(document.querySelectorAll({})).filter(el => el.textContent.includes({}))",
                js_str(css),
                js_str(text)
            ),
        }
    }

    /// JavaScript expression counting the matches
    #[must_use]
    pub fn to_count_query(&self) -> String {
        format!("{}.length", self.to_query_all())
    }

    /// JavaScript expression selecting the `index`-th match (or `undefined`)
    #[must_use]
    pub fn to_nth_query(&self, index: usize) -> String {
        format!("{}[{index}]", self.to_query_all())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css={s}"),
            Self::XPath(s) => write!(f, "xpath={s}"),
            Self::Text(t) => write!(f, "text={t}"),
            Self::TestId(id) => write!(f, "test_id={id}"),
            Self::CssWithText { css, text } => write!(f, "css={css} has_text={text}"),
        }
    }
}

/// Quote a string as a JavaScript string literal
pub(crate) fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| String::from("\"\""))
}

/// How to pick among several matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Exactly one element must match
    #[default]
    Strict,
    /// Take the first match
    First,
    /// Take the nth match (0-based)
    Nth(usize),
}

impl MatchMode {
    /// Pick an element index out of `count` matches.
    ///
    /// `Ok(None)` means "not there yet" (keep waiting); ambiguity is an error
    /// immediately because waiting cannot fix it.
    pub fn pick(self, selector: &Selector, count: usize) -> HarnessResult<Option<usize>> {
        match self {
            _ if count == 0 => Ok(None),
            Self::Strict if count > 1 => Err(HarnessError::LocatorAmbiguity {
                selector: selector.to_string(),
                count,
            }),
            Self::Strict | Self::First => Ok(Some(0)),
            Self::Nth(n) if n < count => Ok(Some(n)),
            Self::Nth(_) => Ok(None),
        }
    }
}

/// A selector plus its disambiguation rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LocatorSpec", into = "LocatorSpec")]
pub struct Locator {
    selector: Selector,
    match_mode: MatchMode,
}

impl Locator {
    /// Create a strict locator from a CSS selector
    #[must_use]
    pub fn new(css: impl Into<String>) -> Self {
        Self::from_selector(Selector::Css(css.into()))
    }

    /// Create a strict locator from any selector
    #[must_use]
    pub const fn from_selector(selector: Selector) -> Self {
        Self {
            selector,
            match_mode: MatchMode::Strict,
        }
    }

    /// Filter by text content (CSS selectors only)
    #[must_use]
    pub fn with_text(self, text: impl Into<String>) -> Self {
        let selector = match self.selector {
            Selector::Css(css) => Selector::CssWithText {
                css,
                text: text.into(),
            },
            other => other,
        };
        Self { selector, ..self }
    }

    /// Take the first match
    #[must_use]
    pub const fn first(mut self) -> Self {
        self.match_mode = MatchMode::First;
        self
    }

    /// Take the nth match (0-based)
    #[must_use]
    pub const fn nth(mut self, index: usize) -> Self {
        self.match_mode = MatchMode::Nth(index);
        self
    }

    /// Get the selector
    #[must_use]
    pub const fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Get the match mode
    #[must_use]
    pub const fn match_mode(&self) -> MatchMode {
        self.match_mode
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.match_mode {
            MatchMode::Strict => write!(f, "{}", self.selector),
            MatchMode::First => write!(f, "{} (first)", self.selector),
            MatchMode::Nth(n) => write!(f, "{} (nth {n})", self.selector),
        }
    }
}

/// Serialized form of a [`Locator`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocatorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    has_text: Option<String>,
    #[serde(
        default,
        rename = "match",
        with = "serde_yaml_ng::with::singleton_map"
    )]
    match_mode: MatchMode,
}

impl TryFrom<LocatorSpec> for Locator {
    type Error = String;

    fn try_from(spec: LocatorSpec) -> Result<Self, Self::Error> {
        let strategies = [
            spec.css.is_some(),
            spec.xpath.is_some(),
            spec.text.is_some(),
            spec.test_id.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if strategies != 1 {
            return Err(format!(
                "locator needs exactly one of css/xpath/text/test_id, got {strategies}"
            ));
        }
        let selector = match (spec.css, spec.xpath, spec.text, spec.test_id, spec.has_text) {
            (Some(css), _, _, _, Some(text)) => Selector::CssWithText { css, text },
            (Some(css), _, _, _, None) => Selector::Css(css),
            (_, _, _, _, Some(_)) => {
                return Err("has_text can only refine a css locator".to_string());
            }
            (_, Some(xpath), _, _, None) => Selector::XPath(xpath),
            (_, _, Some(text), _, None) => Selector::Text(text),
            (_, _, _, Some(id), None) => Selector::TestId(id),
            (None, None, None, None, None) => return Err("locator is empty".to_string()),
        };
        Ok(Self {
            selector,
            match_mode: spec.match_mode,
        })
    }
}

impl From<Locator> for LocatorSpec {
    fn from(locator: Locator) -> Self {
        let mut spec = Self {
            match_mode: locator.match_mode,
            ..Self::default()
        };
        match locator.selector {
            Selector::Css(css) => spec.css = Some(css),
            Selector::XPath(xpath) => spec.xpath = Some(xpath),
            Selector::Text(text) => spec.text = Some(text),
            Selector::TestId(id) => spec.test_id = Some(id),
            Selector::CssWithText { css, text } => {
                spec.css = Some(css);
                spec.has_text = Some(text);
            }
        }
        spec
    }
}
