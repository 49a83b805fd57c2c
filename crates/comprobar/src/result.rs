//! Result and error types for Comprobar.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that can occur while driving a verification run
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The environment cannot produce a working browser session
    #[error("Failed to launch session: {message}")]
    Launch {
        /// Error message
        message: String,
    },

    /// Target unreachable or wait condition unmet
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Selector matched several elements and no disambiguation was given
    #[error("Locator '{selector}' is ambiguous: matched {count} elements (use `match: first` or `match: {{nth: n}}`)")]
    LocatorAmbiguity {
        /// Selector description
        selector: String,
        /// Number of matches
        count: usize,
    },

    /// Element not actionable within the timeout
    #[error("Interaction with '{selector}' failed: {message}")]
    Interaction {
        /// Selector description
        selector: String,
        /// Error message
        message: String,
    },

    /// In-page script threw
    #[error("Script evaluation failed: {message}")]
    Evaluation {
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Screenshot capture error
    #[error("Screenshot failed: {message}")]
    Screenshot {
        /// Error message
        message: String,
    },

    /// Script file is malformed or inconsistent
    #[error("Invalid script: {message}")]
    Script {
        /// Error message
        message: String,
    },

    /// Operation called in wrong state
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl HarnessError {
    /// Create a launch error
    #[must_use]
    pub fn launch(message: impl Into<String>) -> Self {
        Self::Launch {
            message: message.into(),
        }
    }

    /// Create a navigation error
    #[must_use]
    pub fn navigation(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an interaction error
    #[must_use]
    pub fn interaction(selector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Interaction {
            selector: selector.into(),
            message: message.into(),
        }
    }

    /// Create an evaluation error
    #[must_use]
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Create a script error
    #[must_use]
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Classification used when the error is recorded in a step result
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Launch { .. } => ErrorKind::Launch,
            Self::Navigation { .. } => ErrorKind::Navigation,
            Self::LocatorAmbiguity { .. } => ErrorKind::LocatorAmbiguity,
            Self::Evaluation { .. } => ErrorKind::Evaluation,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Interaction { .. }
            | Self::Screenshot { .. }
            | Self::Script { .. }
            | Self::InvalidState { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Yaml(_) => ErrorKind::Interaction,
        }
    }

    /// Whether retrying the same action could change the outcome
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Interaction { .. } | Self::Timeout { .. } | Self::Screenshot { .. }
        )
    }
}

/// Error taxonomy as recorded in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Browser/session could not be produced
    Launch,
    /// Navigation failed
    Navigation,
    /// Selector underspecified
    LocatorAmbiguity,
    /// Element not actionable
    Interaction,
    /// Expected and actual diverged
    AssertionMismatch,
    /// In-page script threw
    Evaluation,
    /// Step budget exhausted
    Timeout,
    /// Run was cancelled while the step was in flight
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Launch => "launch",
            Self::Navigation => "navigation",
            Self::LocatorAmbiguity => "locator_ambiguity",
            Self::Interaction => "interaction",
            Self::AssertionMismatch => "assertion_mismatch",
            Self::Evaluation => "evaluation",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguity_message_names_selector_and_count() {
        let err = HarnessError::LocatorAmbiguity {
            selector: "css=button".to_string(),
            count: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("css=button"));
        assert!(msg.contains("3 elements"));
        assert_eq!(err.kind(), ErrorKind::LocatorAmbiguity);
    }

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(HarnessError::interaction("#go", "hidden").is_retryable());
        assert!(HarnessError::Timeout { ms: 10 }.is_retryable());
        assert!(!HarnessError::LocatorAmbiguity {
            selector: "a".into(),
            count: 2
        }
        .is_retryable());
        assert!(!HarnessError::evaluation("boom").is_retryable());
        assert!(!HarnessError::navigation("http://x", "refused").is_retryable());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::AssertionMismatch).unwrap();
        assert_eq!(json, "\"assertion_mismatch\"");
        assert_eq!(ErrorKind::LocatorAmbiguity.to_string(), "locator_ambiguity");
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: HarnessError = io_err.into();
        assert!(err.to_string().contains("I/O"));
    }
}
