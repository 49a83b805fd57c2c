//! Assertion and diagnostic engine.
//!
//! Compares an observed JSON value against an [`Expectation`]. A mismatch is
//! never an error: it is recorded in the step result as `failed` (hard) or
//! `warned` (soft) with `error_kind: assertion_mismatch`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::report::{StepResult, StepStatus};
use crate::result::ErrorKind;
use crate::step::Step;

/// How much a missed expectation matters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Missed => failed
    #[default]
    Hard,
    /// Missed => warned (advisory checks, budgets, heuristics)
    Soft,
}

/// Comparison applied to the actual value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    /// Exact JSON equality (numbers compare by value)
    Equals(Value),
    /// Substring, array element, or object key
    Contains(Value),
    /// Regular expression over the string form
    Matches(String),
    /// Numeric bounds, both inclusive
    Threshold {
        /// Lower bound
        #[serde(default)]
        min: Option<f64>,
        /// Upper bound
        #[serde(default)]
        max: Option<f64>,
    },
    /// `true`: non-null and non-empty; `false`: the opposite
    Exists(bool),
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(v) => write!(f, "equals {v}"),
            Self::Contains(v) => write!(f, "contains {v}"),
            Self::Matches(p) => write!(f, "matches /{p}/"),
            Self::Threshold { min, max } => match (min, max) {
                (Some(lo), Some(hi)) => write!(f, "within [{lo}, {hi}]"),
                (Some(lo), None) => write!(f, ">= {lo}"),
                (None, Some(hi)) => write!(f, "<= {hi}"),
                (None, None) => f.write_str("any number"),
            },
            Self::Exists(true) => f.write_str("exists"),
            Self::Exists(false) => f.write_str("absent"),
        }
    }
}

/// A matcher plus its severity.
///
/// ```yaml
/// expect: { threshold: { min: 10 }, severity: soft }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    /// Comparison
    #[serde(flatten)]
    pub matcher: Matcher,
    /// Severity of a miss
    #[serde(default)]
    pub severity: Severity,
}

impl Expectation {
    /// Hard expectation
    #[must_use]
    pub const fn hard(matcher: Matcher) -> Self {
        Self {
            matcher,
            severity: Severity::Hard,
        }
    }

    /// Soft expectation
    #[must_use]
    pub const fn soft(matcher: Matcher) -> Self {
        Self {
            matcher,
            severity: Severity::Soft,
        }
    }

    /// Validate the matcher ahead of a run (regex syntax, bound order)
    pub fn validate(&self) -> Result<(), String> {
        match &self.matcher {
            Matcher::Matches(pattern) => Regex::new(pattern)
                .map(|_| ())
                .map_err(|e| format!("invalid pattern /{pattern}/: {e}")),
            Matcher::Threshold {
                min: Some(lo),
                max: Some(hi),
            } if lo > hi => Err(format!("threshold min {lo} exceeds max {hi}")),
            _ => Ok(()),
        }
    }
}

/// Outcome of a single comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Expectation met
    Met,
    /// Expectation missed
    Missed {
        /// Why
        reason: String,
    },
}

impl Verdict {
    /// Whether the expectation held
    #[must_use]
    pub const fn is_met(&self) -> bool {
        matches!(self, Self::Met)
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn json_eq(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => expected == actual,
    }
}

/// Compare `actual` against `expectation`
#[must_use]
pub fn check(expectation: &Expectation, actual: &Value) -> Verdict {
    let met = match &expectation.matcher {
        Matcher::Equals(expected) => json_eq(expected, actual),
        Matcher::Contains(needle) => match (actual, needle) {
            (Value::String(hay), Value::String(n)) => hay.contains(n.as_str()),
            (Value::Array(items), n) => items.iter().any(|item| json_eq(n, item)),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            (hay, n) => as_text(hay).contains(&as_text(n)),
        },
        Matcher::Matches(pattern) => match Regex::new(pattern) {
            Ok(re) => re.is_match(&as_text(actual)),
            Err(e) => {
                return Verdict::Missed {
                    reason: format!("invalid pattern /{pattern}/: {e}"),
                }
            }
        },
        Matcher::Threshold { min, max } => match as_number(actual) {
            Some(n) => min.map_or(true, |lo| n >= lo) && max.map_or(true, |hi| n <= hi),
            None => {
                return Verdict::Missed {
                    reason: format!("expected a number, got {actual}"),
                }
            }
        },
        Matcher::Exists(wanted) => is_present(actual) == *wanted,
    };
    if met {
        Verdict::Met
    } else {
        Verdict::Missed {
            reason: format!("expected {}, got {actual}", expectation.matcher),
        }
    }
}

/// Turns comparisons into step results
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertionEngine;

impl AssertionEngine {
    /// Create an engine
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classify `actual` against the step's expectation.
    ///
    /// A step without an expectation passes. Timing fields are left at zero
    /// for the caller to fill in.
    #[must_use]
    pub fn evaluate(&self, index: usize, step: &Step, actual: &Value) -> StepResult {
        let Some(expectation) = step.expect.as_ref() else {
            return StepResult::passed(index, &step.description, format!("got {actual}"));
        };
        match check(expectation, actual) {
            Verdict::Met => StepResult::passed(
                index,
                &step.description,
                format!("{} (got {actual})", expectation.matcher),
            ),
            Verdict::Missed { reason } => {
                let status = match expectation.severity {
                    Severity::Hard => StepStatus::Failed,
                    Severity::Soft => StepStatus::Warned,
                };
                tracing::debug!(index, %reason, ?status, "expectation missed");
                StepResult::new(index, &step.description, status, reason)
                    .with_error_kind(ErrorKind::AssertionMismatch)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    mod matchers {
        use super::*;

        #[test]
        fn test_equals_compares_numbers_by_value() {
            let exp = Expectation::hard(Matcher::Equals(json!(5)));
            assert!(check(&exp, &json!(5.0)).is_met());
            assert!(!check(&exp, &json!(6)).is_met());
        }

        #[test]
        fn test_contains_variants() {
            let exp = Expectation::hard(Matcher::Contains(json!("Dash")));
            assert!(check(&exp, &json!("My Dashboard")).is_met());
            let exp = Expectation::hard(Matcher::Contains(json!(2)));
            assert!(check(&exp, &json!([1, 2, 3])).is_met());
            let exp = Expectation::hard(Matcher::Contains(json!("ready")));
            assert!(check(&exp, &json!({"ready": true})).is_met());
        }

        #[test]
        fn test_regex() {
            let exp = Expectation::hard(Matcher::Matches(r"^/agents/\d+$".into()));
            assert!(check(&exp, &json!("/agents/42")).is_met());
            assert!(!check(&exp, &json!("/agents/x")).is_met());
        }

        #[test]
        fn test_threshold_bounds_inclusive() {
            let exp = Expectation::hard(Matcher::Threshold {
                min: Some(10.0),
                max: Some(20.0),
            });
            assert!(check(&exp, &json!(10)).is_met());
            assert!(check(&exp, &json!("20")).is_met());
            assert!(!check(&exp, &json!(21)).is_met());
            assert!(!check(&exp, &json!(null)).is_met());
        }

        #[test]
        fn test_exists() {
            let exp = Expectation::hard(Matcher::Exists(true));
            assert!(check(&exp, &json!(0)).is_met());
            assert!(!check(&exp, &json!("")).is_met());
            assert!(!check(&exp, &json!(null)).is_met());
            let exp = Expectation::hard(Matcher::Exists(false));
            assert!(check(&exp, &json!([])).is_met());
        }

        #[test]
        fn test_validate_rejects_bad_regex_and_bounds() {
            assert!(Expectation::hard(Matcher::Matches("(".into()))
                .validate()
                .is_err());
            assert!(Expectation::hard(Matcher::Threshold {
                min: Some(5.0),
                max: Some(1.0)
            })
            .validate()
            .is_err());
        }
    }

    mod parsing {
        use super::*;

        #[test]
        fn test_flattened_yaml_form() {
            let exp: Expectation =
                serde_yaml_ng::from_str("threshold: { min: 10 }\nseverity: soft\n").unwrap();
            assert_eq!(exp.severity, Severity::Soft);
            assert_eq!(
                exp.matcher,
                Matcher::Threshold {
                    min: Some(10.0),
                    max: None
                }
            );
        }

        #[test]
        fn test_severity_defaults_hard() {
            let exp: Expectation = serde_yaml_ng::from_str("contains: ok\n").unwrap();
            assert_eq!(exp.severity, Severity::Hard);
        }
    }

    mod engine {
        use super::*;
        use crate::step::{Step, StepAction};

        fn step(expect: Expectation) -> Step {
            Step::new(
                "audio events outnumber chat logs",
                StepAction::Evaluate {
                    script: "window.audioEvents".into(),
                },
            )
            .with_expect(expect)
        }

        #[test]
        fn test_soft_miss_is_warned() {
            let step = step(Expectation::soft(Matcher::Threshold {
                min: Some(10.0),
                max: None,
            }));
            let result = AssertionEngine::new().evaluate(3, &step, &json!(5));
            assert_eq!(result.status, StepStatus::Warned);
            assert_eq!(result.error_kind, Some(ErrorKind::AssertionMismatch));
            assert!(result.message.contains("got 5"));
        }

        #[test]
        fn test_hard_miss_is_failed() {
            let step = step(Expectation::hard(Matcher::Equals(json!(true))));
            let result = AssertionEngine::new().evaluate(1, &step, &json!(false));
            assert_eq!(result.status, StepStatus::Failed);
        }

        #[test]
        fn test_met_is_passed() {
            let step = step(Expectation::hard(Matcher::Exists(true)));
            let result = AssertionEngine::new().evaluate(1, &step, &json!("x"));
            assert_eq!(result.status, StepStatus::Passed);
            assert!(result.error_kind.is_none());
        }
    }
}
