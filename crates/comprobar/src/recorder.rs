//! Observation recorder.
//!
//! Passively captures console output, network activity, WebSocket frames and
//! uncaught page errors for the life of a session. Events arrive from driver
//! callbacks on arbitrary tasks; the [`EventSink`] appends them under a short
//! synchronous lock so producers never block on consumers.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::RecorderLimits;
use crate::result::HarnessResult;
use crate::session::Session;
use crate::websocket::{truncate_payload, WebSocketPhase};

/// Console message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleLevel {
    /// log / info / debug
    Info,
    /// warning
    Warning,
    /// error / assert
    Error,
}

impl ConsoleLevel {
    /// Map a browser console type name onto a level
    #[must_use]
    pub fn classify(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "error" | "assert" => Self::Error,
            "warn" | "warning" => Self::Warning,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// What was observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// Console message
    Console {
        /// Severity
        level: ConsoleLevel,
        /// Message text
        text: String,
    },
    /// Outgoing HTTP request
    Request {
        /// HTTP method
        method: String,
        /// Request URL
        url: String,
    },
    /// HTTP response
    Response {
        /// Response URL
        url: String,
        /// Status code
        status: u16,
    },
    /// Request that never produced a response
    RequestFailed {
        /// HTTP method
        method: String,
        /// Request URL
        url: String,
        /// Failure reason
        error: String,
    },
    /// WebSocket lifecycle event or frame
    #[serde(rename = "websocket")]
    WebSocket {
        /// Connection identifier
        connection: String,
        /// Phase
        phase: WebSocketPhase,
        /// Frame payload (URL for `open`, reason for `error`)
        payload: Option<String>,
        /// Whether the payload was cut to the configured limit
        #[serde(default)]
        truncated: bool,
    },
    /// Uncaught exception in the page
    PageError {
        /// Exception message
        message: String,
    },
}

impl EventKind {
    /// Category used for filtering
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        match self {
            Self::Console { .. } => EventCategory::Console,
            Self::Request { .. } => EventCategory::Request,
            Self::Response { .. } => EventCategory::Response,
            Self::RequestFailed { .. } => EventCategory::RequestFailed,
            Self::WebSocket { .. } => EventCategory::Websocket,
            Self::PageError { .. } => EventCategory::PageError,
        }
    }

    /// One-line description
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Console { level, text } => format!("console.{level}: {text}"),
            Self::Request { method, url } => format!("{method} {url}"),
            Self::Response { url, status } => format!("{status} {url}"),
            Self::RequestFailed { method, url, error } => {
                format!("{method} {url} failed: {error}")
            }
            Self::WebSocket {
                connection,
                phase,
                payload,
                truncated,
            } => {
                let mut line = format!("ws[{connection}] {phase}");
                if let Some(payload) = payload {
                    line.push(' ');
                    line.push_str(payload);
                    if *truncated {
                        line.push_str("...");
                    }
                }
                line
            }
            Self::PageError { message } => format!("pageerror: {message}"),
        }
    }
}

/// Coarse event category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Console messages
    Console,
    /// HTTP requests
    Request,
    /// HTTP responses
    Response,
    /// Failed requests
    RequestFailed,
    /// WebSocket events
    Websocket,
    /// Uncaught page errors
    PageError,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Console => "console",
            Self::Request => "request",
            Self::Response => "response",
            Self::RequestFailed => "request_failed",
            Self::Websocket => "websocket",
            Self::PageError => "page_error",
        })
    }
}

/// A recorded event. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedEvent {
    seq: u64,
    timestamp_ms: u64,
    page: String,
    #[serde(flatten)]
    kind: EventKind,
}

impl ObservedEvent {
    /// Arrival order within the session
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Milliseconds since session start
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Page the event came from
    #[must_use]
    pub fn page(&self) -> &str {
        &self.page
    }

    /// Payload
    #[must_use]
    pub const fn kind(&self) -> &EventKind {
        &self.kind
    }
}

impl std::fmt::Display for ObservedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:>6}ms] {}", self.timestamp_ms, self.kind.describe())
    }
}

/// Predicate over recorded events. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventFilter {
    /// Category
    pub kind: Option<EventCategory>,
    /// Console level (console events only)
    pub level: Option<ConsoleLevel>,
    /// WebSocket phase (websocket events only)
    pub phase: Option<WebSocketPhase>,
    /// Substring of the event description
    pub contains: Option<String>,
}

impl EventFilter {
    /// Filter on a category
    #[must_use]
    pub fn kind(kind: EventCategory) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Require a console level
    #[must_use]
    pub const fn with_level(mut self, level: ConsoleLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Require a WebSocket phase
    #[must_use]
    pub const fn with_phase(mut self, phase: WebSocketPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Require a substring
    #[must_use]
    pub fn containing(mut self, text: impl Into<String>) -> Self {
        self.contains = Some(text.into());
        self
    }

    /// Whether `event` satisfies every set field
    #[must_use]
    pub fn matches(&self, event: &ObservedEvent) -> bool {
        if self.kind.is_some_and(|k| k != event.kind.category()) {
            return false;
        }
        if let Some(level) = self.level {
            match &event.kind {
                EventKind::Console { level: l, .. } if *l == level => {}
                _ => return false,
            }
        }
        if let Some(phase) = self.phase {
            match &event.kind {
                EventKind::WebSocket { phase: p, .. } if *p == phase => {}
                _ => return false,
            }
        }
        self.contains
            .as_deref()
            .map_or(true, |needle| event.kind.describe().contains(needle))
    }
}

impl std::fmt::Display for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(kind) = self.kind {
            parts.push(format!("kind={kind}"));
        }
        if let Some(level) = self.level {
            parts.push(format!("level={level}"));
        }
        if let Some(phase) = self.phase {
            parts.push(format!("phase={phase}"));
        }
        if let Some(text) = &self.contains {
            parts.push(format!("contains={text:?}"));
        }
        if parts.is_empty() {
            f.write_str("*")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

#[derive(Debug, Default)]
struct Log {
    events: VecDeque<ObservedEvent>,
    next_seq: u64,
    last_ms: u64,
    dropped: u64,
    detached: bool,
}

#[derive(Debug)]
struct Shared {
    origin: Instant,
    limits: RecorderLimits,
    log: Mutex<Log>,
}

/// Producer side of the recorder, handed to the page driver.
///
/// Cloning is cheap; every clone appends to the same log.
#[derive(Debug, Clone)]
pub struct EventSink {
    shared: Arc<Shared>,
}

impl EventSink {
    /// Append an event.
    ///
    /// Returns `false` once the recorder is detached; later events are
    /// discarded.
    pub fn record(&self, page: &str, kind: EventKind) -> bool {
        let kind = self.bound_payload(kind);
        let elapsed = u64::try_from(self.shared.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        let Ok(mut log) = self.shared.log.lock() else {
            return false;
        };
        if log.detached {
            return false;
        }
        // Timestamps are taken under the lock so they never go backwards
        let timestamp_ms = elapsed.max(log.last_ms);
        log.last_ms = timestamp_ms;
        let seq = log.next_seq;
        log.next_seq += 1;
        if self.shared.limits.max_events > 0 && log.events.len() >= self.shared.limits.max_events
        {
            log.events.pop_front();
            log.dropped += 1;
        }
        log.events.push_back(ObservedEvent {
            seq,
            timestamp_ms,
            page: page.to_string(),
            kind,
        });
        true
    }

    fn bound_payload(&self, kind: EventKind) -> EventKind {
        match kind {
            EventKind::WebSocket {
                connection,
                phase,
                payload: Some(payload),
                truncated,
            } => {
                let (payload, cut) =
                    truncate_payload(&payload, self.shared.limits.max_payload_bytes);
                EventKind::WebSocket {
                    connection,
                    phase,
                    payload: Some(payload),
                    truncated: truncated || cut,
                }
            }
            other => other,
        }
    }

    /// Milliseconds since the session origin
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.shared.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Bounds this sink records under
    #[must_use]
    pub fn limits(&self) -> RecorderLimits {
        self.shared.limits
    }
}

/// Consumer side of the recorder
#[derive(Debug, Clone)]
pub struct ObservationHandle {
    shared: Arc<Shared>,
}

impl ObservationHandle {
    fn read<T>(&self, f: impl FnOnce(&Log) -> T) -> Option<T> {
        self.shared.log.lock().ok().map(|log| f(&log))
    }

    /// Copy of every retained event in arrival order
    #[must_use]
    pub fn snapshot(&self) -> Vec<ObservedEvent> {
        self.read(|log| log.events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Events with `timestamp_ms >= since_ms`
    #[must_use]
    pub fn since(&self, since_ms: u64) -> Vec<ObservedEvent> {
        self.read(|log| {
            log.events
                .iter()
                .filter(|e| e.timestamp_ms >= since_ms)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }

    /// Events with `start_ms <= timestamp_ms <= end_ms`
    #[must_use]
    pub fn window(&self, start_ms: u64, end_ms: u64) -> Vec<ObservedEvent> {
        self.read(|log| {
            log.events
                .iter()
                .filter(|e| (start_ms..=end_ms).contains(&e.timestamp_ms))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }

    /// Events matching `filter`
    #[must_use]
    pub fn matching(&self, filter: &EventFilter) -> Vec<ObservedEvent> {
        self.read(|log| {
            log.events
                .iter()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }

    /// Number of events matching `filter`
    #[must_use]
    pub fn count(&self, filter: &EventFilter) -> usize {
        self.read(|log| log.events.iter().filter(|e| filter.matches(e)).count())
            .unwrap_or(0)
    }

    /// Console messages at `level`
    #[must_use]
    pub fn console(&self, level: ConsoleLevel) -> Vec<ObservedEvent> {
        self.matching(&EventFilter::kind(EventCategory::Console).with_level(level))
    }

    /// Number of retained events
    #[must_use]
    pub fn len(&self) -> usize {
        self.read(|log| log.events.len()).unwrap_or(0)
    }

    /// Whether nothing is retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events evicted because the buffer was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.read(|log| log.dropped).unwrap_or(0)
    }

    /// Stop recording. Already-recorded events stay readable.
    pub fn detach(&self) {
        if let Ok(mut log) = self.shared.log.lock() {
            if !log.detached {
                log.detached = true;
                tracing::debug!(events = log.events.len(), "recorder detached");
            }
        }
    }

    /// Whether events are still being accepted
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.read(|log| !log.detached).unwrap_or(false)
    }
}

/// Creates sink/handle pairs and wires them to sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct Recorder {
    limits: RecorderLimits,
}

impl Recorder {
    /// Create a recorder with the given bounds
    #[must_use]
    pub const fn new(limits: RecorderLimits) -> Self {
        Self { limits }
    }

    /// Create an unattached sink/handle pair timed from `origin`
    #[must_use]
    pub fn channel(&self, origin: Instant) -> (EventSink, ObservationHandle) {
        let shared = Arc::new(Shared {
            origin,
            limits: self.limits,
            log: Mutex::new(Log::default()),
        });
        (
            EventSink {
                shared: Arc::clone(&shared),
            },
            ObservationHandle { shared },
        )
    }

    /// Subscribe to every event source of `session`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is stopped or the driver refuses the
    /// subscription.
    pub async fn attach(&self, session: &mut Session) -> HarnessResult<ObservationHandle> {
        let (sink, handle) = self.channel(session.origin());
        session.driver_mut()?.subscribe(sink).await?;
        tracing::debug!(session = %session.id(), "recorder attached");
        Ok(handle)
    }

    /// Immutable copy of everything `handle` has recorded so far
    #[must_use]
    pub fn snapshot(handle: &ObservationHandle) -> Vec<ObservedEvent> {
        handle.snapshot()
    }
}
