//! Wait mechanisms.
//!
//! Every wait in the harness is bounded: [`poll_until`] gives up at its
//! deadline and callers turn that into a timeout-flavoured step failure.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::locator::Locator;
use crate::recorder::EventFilter;
use crate::result::HarnessResult;

/// Network idle threshold (500ms without new resource entries)
pub const NETWORK_IDLE_THRESHOLD_MS: u64 = 500;

/// Page load states a navigation can wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// Wait for the `load` event to fire
    #[default]
    Load,
    /// Wait for `DOMContentLoaded` event
    DomContentLoaded,
    /// Wait for network to be idle (no new requests for 500ms)
    NetworkIdle,
}

impl LoadState {
    /// Get the JavaScript event name for this load state
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "DOMContentLoaded",
            Self::NetworkIdle => "networkidle",
        }
    }

    /// `document.readyState` values that satisfy this state
    #[must_use]
    pub const fn ready_states(&self) -> &'static [&'static str] {
        match self {
            Self::DomContentLoaded => &["interactive", "complete"],
            Self::Load | Self::NetworkIdle => &["complete"],
        }
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.event_name())
    }
}

/// Condition a `wait` step blocks on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    /// Sleep for a fixed duration
    Duration {
        /// Milliseconds to wait
        ms: u64,
    },
    /// Element becomes visible
    Visible {
        /// Target element
        target: Locator,
    },
    /// Element disappears or becomes hidden
    Hidden {
        /// Target element
        target: Locator,
    },
    /// The recorder has seen at least `count` matching events
    Event {
        /// Event filter
        filter: EventFilter,
        /// Minimum number of matches
        #[serde(default = "one")]
        count: usize,
    },
}

const fn one() -> usize {
    1
}

impl std::fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duration { ms } => write!(f, "{ms}ms"),
            Self::Visible { target } => write!(f, "visible {target}"),
            Self::Hidden { target } => write!(f, "hidden {target}"),
            Self::Event { filter, count } => write!(f, "{count}x event {filter}"),
        }
    }
}

/// Poll `probe` until it yields `Some`, an error, or `timeout` elapses.
///
/// The probe runs at least once even with a zero timeout. Returns `Ok(None)`
/// when the deadline passes without a value.
pub async fn poll_until<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> HarnessResult<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await? {
            return Ok(Some(value));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::result::HarnessError;
    use std::sync::atomic::{AtomicU32, Ordering};

    mod load_state_tests {
        use super::*;

        #[test]
        fn test_ready_states() {
            assert_eq!(LoadState::Load.ready_states(), &["complete"]);
            assert!(LoadState::DomContentLoaded
                .ready_states()
                .contains(&"interactive"));
        }

        #[test]
        fn test_serde_names() {
            let state: LoadState = serde_json::from_str("\"network_idle\"").unwrap();
            assert_eq!(state, LoadState::NetworkIdle);
            assert_eq!(LoadState::default(), LoadState::Load);
        }
    }

    mod wait_condition_tests {
        use super::*;

        fn parse(yaml: &str) -> WaitCondition {
            serde_yaml_ng::with::singleton_map_recursive::deserialize(
                serde_yaml_ng::Deserializer::from_str(yaml),
            )
            .unwrap()
        }

        #[test]
        fn test_parse_event_condition_defaults_count() {
            let cond = parse("event:\n  filter: { kind: websocket }\n");
            match cond {
                WaitCondition::Event { count, .. } => assert_eq!(count, 1),
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn test_parse_visible() {
            let cond = parse("visible:\n  target: { css: '#chat', match: { nth: 0 } }\n");
            assert_eq!(cond.to_string(), "visible css=#chat (nth 0)");
        }
    }

    mod poll_tests {
        use super::*;

        #[tokio::test]
        async fn test_returns_value_once_ready() {
            let calls = AtomicU32::new(0);
            let found = poll_until(Duration::from_secs(1), Duration::from_millis(1), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok((n >= 3).then_some(n)) }
            })
            .await
            .unwrap();
            assert_eq!(found, Some(3));
        }

        #[tokio::test]
        async fn test_deadline_yields_none() {
            let found: Option<()> =
                poll_until(Duration::from_millis(20), Duration::from_millis(5), || async {
                    Ok(None)
                })
                .await
                .unwrap();
            assert!(found.is_none());
        }

        #[tokio::test]
        async fn test_zero_timeout_probes_once() {
            let calls = AtomicU32::new(0);
            let _: Option<()> = poll_until(Duration::ZERO, Duration::from_millis(5), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            })
            .await
            .unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_probe_error_propagates() {
            let result: HarnessResult<Option<()>> =
                poll_until(Duration::from_secs(1), Duration::from_millis(1), || async {
                    Err(HarnessError::evaluation("boom"))
                })
                .await;
            assert!(result.is_err());
        }
    }
}
