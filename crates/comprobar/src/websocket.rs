//! WebSocket observation.
//!
//! The harness never originates WebSocket traffic; it only sees the frames
//! the application under test exchanges. This module holds the lifecycle
//! vocabulary for those frames, payload truncation, and a per-connection
//! summary computed from a recorder snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::recorder::{EventKind, ObservedEvent};

/// WebSocket lifecycle phase of an observed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebSocketPhase {
    /// Connection created (payload carries the URL)
    Open,
    /// Frame sent by the page
    FrameSent,
    /// Frame received by the page
    FrameReceived,
    /// Connection closed
    Close,
    /// Frame or connection error
    Error,
}

impl WebSocketPhase {
    /// Whether this phase carries a frame
    #[must_use]
    pub const fn is_frame(self) -> bool {
        matches!(self, Self::FrameSent | Self::FrameReceived)
    }
}

impl std::fmt::Display for WebSocketPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::FrameSent => "frame_sent",
            Self::FrameReceived => "frame_received",
            Self::Close => "close",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Truncate `payload` to at most `max_bytes` on a UTF-8 boundary.
///
/// Returns the kept prefix and whether anything was cut.
#[must_use]
pub fn truncate_payload(payload: &str, max_bytes: usize) -> (String, bool) {
    if payload.len() <= max_bytes {
        return (payload.to_string(), false);
    }
    let mut end = max_bytes;
    while end > 0 && !payload.is_char_boundary(end) {
        end -= 1;
    }
    (payload[..end].to_string(), true)
}

/// WebSocket connection state as reconstructed from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebSocketState {
    /// Connection is open
    Open,
    /// Connection is closed
    Closed,
    /// Connection reported an error
    Errored,
}

/// Traffic seen on one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Connection identifier
    pub connection: String,
    /// URL, if the open event was observed
    pub url: Option<String>,
    /// Final state
    pub state: WebSocketState,
    /// Frames sent by the page
    pub frames_sent: usize,
    /// Frames received by the page
    pub frames_received: usize,
    /// Captured payload bytes sent (after truncation)
    pub bytes_sent: usize,
    /// Captured payload bytes received (after truncation)
    pub bytes_received: usize,
    /// Error events
    pub errors: usize,
}

impl ConnectionStats {
    fn new(connection: &str) -> Self {
        Self {
            connection: connection.to_string(),
            url: None,
            state: WebSocketState::Open,
            frames_sent: 0,
            frames_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            errors: 0,
        }
    }
}

/// Per-connection WebSocket traffic summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketSummary {
    /// Connections ordered by identifier
    pub connections: Vec<ConnectionStats>,
}

impl WebSocketSummary {
    /// Build a summary from recorded events
    #[must_use]
    pub fn from_events(events: &[ObservedEvent]) -> Self {
        let mut by_id: BTreeMap<String, ConnectionStats> = BTreeMap::new();
        for event in events {
            let EventKind::WebSocket {
                connection,
                phase,
                payload,
                ..
            } = event.kind()
            else {
                continue;
            };
            let stats = by_id
                .entry(connection.clone())
                .or_insert_with(|| ConnectionStats::new(connection));
            let len = payload.as_ref().map_or(0, String::len);
            match phase {
                WebSocketPhase::Open => {
                    stats.url.clone_from(payload);
                    stats.state = WebSocketState::Open;
                }
                WebSocketPhase::FrameSent => {
                    stats.frames_sent += 1;
                    stats.bytes_sent += len;
                }
                WebSocketPhase::FrameReceived => {
                    stats.frames_received += 1;
                    stats.bytes_received += len;
                }
                WebSocketPhase::Close => stats.state = WebSocketState::Closed,
                WebSocketPhase::Error => {
                    stats.errors += 1;
                    stats.state = WebSocketState::Errored;
                }
            }
        }
        Self {
            connections: by_id.into_values().collect(),
        }
    }

    /// Total frames sent across connections
    #[must_use]
    pub fn total_sent(&self) -> usize {
        self.connections.iter().map(|c| c.frames_sent).sum()
    }

    /// Total frames received across connections
    #[must_use]
    pub fn total_received(&self) -> usize {
        self.connections.iter().map(|c| c.frames_received).sum()
    }

    /// Connections still open at snapshot time
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.connections
            .iter()
            .filter(|c| c.state == WebSocketState::Open)
            .count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::RecorderLimits;
    use crate::recorder::Recorder;
    use std::time::Instant;

    mod truncation {
        use super::*;

        #[test]
        fn test_short_payload_untouched() {
            assert_eq!(truncate_payload("hello", 10), ("hello".to_string(), false));
        }

        #[test]
        fn test_long_payload_cut() {
            let (kept, cut) = truncate_payload("abcdefgh", 3);
            assert_eq!(kept, "abc");
            assert!(cut);
        }

        #[test]
        fn test_cut_respects_char_boundary() {
            // "é" is two bytes; cutting at 2 would split it
            let (kept, cut) = truncate_payload("aé", 2);
            assert_eq!(kept, "a");
            assert!(cut);
        }
    }

    mod summary {
        use super::*;

        fn ws(connection: &str, phase: WebSocketPhase, payload: Option<&str>) -> EventKind {
            EventKind::WebSocket {
                connection: connection.to_string(),
                phase,
                payload: payload.map(ToString::to_string),
                truncated: false,
            }
        }

        #[test]
        fn test_counts_frames_per_connection() {
            let (sink, handle) = Recorder::new(RecorderLimits::default()).channel(Instant::now());
            sink.record("main", ws("c1", WebSocketPhase::Open, Some("ws://x/voice")));
            sink.record("main", ws("c1", WebSocketPhase::FrameSent, Some("{\"a\":1}")));
            sink.record("main", ws("c1", WebSocketPhase::FrameReceived, Some("ok")));
            sink.record("main", ws("c1", WebSocketPhase::FrameReceived, Some("ok2")));
            sink.record("main", ws("c2", WebSocketPhase::Error, Some("reset")));
            sink.record("main", ws("c1", WebSocketPhase::Close, None));

            let summary = WebSocketSummary::from_events(&handle.snapshot());
            assert_eq!(summary.connections.len(), 2);
            let c1 = &summary.connections[0];
            assert_eq!(c1.url.as_deref(), Some("ws://x/voice"));
            assert_eq!(c1.frames_sent, 1);
            assert_eq!(c1.frames_received, 2);
            assert_eq!(c1.bytes_received, 5);
            assert_eq!(c1.state, WebSocketState::Closed);
            assert_eq!(summary.connections[1].state, WebSocketState::Errored);
            assert_eq!(summary.total_sent(), 1);
            assert_eq!(summary.total_received(), 2);
            assert_eq!(summary.open_connections(), 0);
        }

        #[test]
        fn test_ignores_non_websocket_events() {
            let (sink, handle) = Recorder::new(RecorderLimits::default()).channel(Instant::now());
            sink.record(
                "main",
                EventKind::PageError {
                    message: "x".into(),
                },
            );
            assert!(WebSocketSummary::from_events(&handle.snapshot())
                .connections
                .is_empty());
        }
    }
}
