//! Step results and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::recorder::ObservedEvent;
use crate::result::{ErrorKind, HarnessError, HarnessResult};

/// Outcome of an executed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step passed
    Passed,
    /// Step failed
    Failed,
    /// Soft expectation missed
    Warned,
}

impl StepStatus {
    /// Check if status is passing
    #[must_use]
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Check if status is failing
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Warned => "warned",
        })
    }
}

/// Result of one executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-based step index (0 is reserved for session launch)
    pub index: usize,
    /// Step description
    pub description: String,
    /// Outcome
    pub status: StepStatus,
    /// Human-readable detail
    pub message: String,
    /// Error classification for failed/warned steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Screenshot written for this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
    /// Events recorded while the step ran
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observations: Vec<ObservedEvent>,
    /// Start, in ms since session start
    #[serde(default)]
    pub started_ms: u64,
    /// Duration in ms
    #[serde(default)]
    pub duration_ms: u64,
}

impl StepResult {
    /// Create a result
    #[must_use]
    pub fn new(
        index: usize,
        description: impl Into<String>,
        status: StepStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            index,
            description: description.into(),
            status,
            message: message.into(),
            error_kind: None,
            screenshot: None,
            observations: Vec::new(),
            started_ms: 0,
            duration_ms: 0,
        }
    }

    /// Create a passing result
    #[must_use]
    pub fn passed(index: usize, description: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(index, description, StepStatus::Passed, message)
    }

    /// Create a failed result from an error
    #[must_use]
    pub fn failed(index: usize, description: impl Into<String>, error: &HarnessError) -> Self {
        Self::new(index, description, StepStatus::Failed, error.to_string())
            .with_error_kind(error.kind())
    }

    /// Set the error kind
    #[must_use]
    pub const fn with_error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    /// Set timing
    #[must_use]
    pub const fn with_timing(mut self, started_ms: u64, duration_ms: u64) -> Self {
        self.started_ms = started_ms;
        self.duration_ms = duration_ms;
        self
    }

    /// Attach a screenshot path
    #[must_use]
    pub fn with_screenshot(mut self, path: PathBuf) -> Self {
        self.screenshot = Some(path);
        self
    }

    /// Attach observations
    #[must_use]
    pub fn with_observations(mut self, events: Vec<ObservedEvent>) -> Self {
        self.observations = events;
        self
    }

    /// Append to the message
    pub fn annotate(&mut self, note: &str) {
        if self.message.is_empty() {
            self.message = note.to_string();
        } else {
            self.message = format!("{} ({note})", self.message);
        }
    }

    /// End of the step's time window
    #[must_use]
    pub const fn finished_ms(&self) -> u64 {
        self.started_ms.saturating_add(self.duration_ms)
    }
}

/// A step that never ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedStep {
    /// 1-based step index
    pub index: usize,
    /// Step description
    pub description: String,
}

/// How the run ended
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step was attempted
    #[default]
    Completed,
    /// The run was cancelled
    Cancelled,
    /// Launch failure or a critical step failed
    Aborted {
        /// Why
        reason: String,
    },
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}

/// Counts per status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Summary {
    /// Executed steps (`passed + failed + warnings`)
    pub total: usize,
    /// Passed steps
    pub passed: usize,
    /// Failed steps
    pub failed: usize,
    /// Warned steps
    pub warnings: usize,
    /// Steps that never ran
    #[serde(default)]
    pub skipped: usize,
}

impl Summary {
    /// Percentage of executed steps that passed
    #[must_use]
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total as f64
    }
}

/// Report of one harness run.
///
/// Serializes to the persisted JSON layout
/// `{name, summary, details, skipped, outcome, session_id, timestamp, finished_at}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ReportFile", from = "ReportFile")]
pub struct Report {
    /// Script name
    pub name: String,
    /// Session that produced the results
    pub session_id: Option<Uuid>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end (set when finalized)
    pub finished_at: Option<DateTime<Utc>>,
    /// Results in step order
    pub results: Vec<StepResult>,
    /// Steps that never ran
    pub skipped: Vec<SkippedStep>,
    /// How the run ended
    pub outcome: RunStatus,
}

#[derive(Serialize, Deserialize)]
struct ReportFile {
    #[serde(default)]
    name: String,
    summary: Summary,
    details: Vec<StepResult>,
    #[serde(default)]
    skipped: Vec<SkippedStep>,
    #[serde(default)]
    outcome: RunStatus,
    #[serde(default)]
    session_id: Option<Uuid>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
}

impl From<Report> for ReportFile {
    fn from(report: Report) -> Self {
        Self {
            summary: report.summary(),
            name: report.name,
            details: report.results,
            skipped: report.skipped,
            outcome: report.outcome,
            session_id: report.session_id,
            timestamp: report.started_at,
            finished_at: report.finished_at,
        }
    }
}

impl From<ReportFile> for Report {
    fn from(file: ReportFile) -> Self {
        Self {
            name: file.name,
            session_id: file.session_id,
            started_at: file.timestamp,
            finished_at: file.finished_at,
            results: file.details,
            skipped: file.skipped,
            outcome: file.outcome,
        }
    }
}

impl Report {
    /// Empty report starting now
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            session_id: None,
            started_at: Utc::now(),
            finished_at: None,
            results: Vec::new(),
            skipped: Vec::new(),
            outcome: RunStatus::Completed,
        }
    }

    /// Record an executed step
    pub fn push(&mut self, result: StepResult) {
        self.results.push(result);
    }

    /// Record a step that never ran
    pub fn skip(&mut self, index: usize, description: impl Into<String>) {
        self.skipped.push(SkippedStep {
            index,
            description: description.into(),
        });
    }

    /// Stamp the end time and outcome
    pub fn finish(&mut self, outcome: RunStatus) {
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
    }

    /// Counts per status
    #[must_use]
    pub fn summary(&self) -> Summary {
        let count = |status: StepStatus| self.results.iter().filter(|r| r.status == status).count();
        Summary {
            total: self.results.len(),
            passed: count(StepStatus::Passed),
            failed: count(StepStatus::Failed),
            warnings: count(StepStatus::Warned),
            skipped: self.skipped.len(),
        }
    }

    /// No failed step and a non-aborted outcome
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, RunStatus::Aborted { .. })
            && !self.results.iter().any(|r| r.status.is_failed())
    }

    /// Failed and warned results
    #[must_use]
    pub fn problems(&self) -> Vec<&StepResult> {
        self.results
            .iter()
            .filter(|r| !r.status.is_passed())
            .collect()
    }

    /// Wall-clock duration, if finalized
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    /// Load a persisted JSON report
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&source)?)
    }
}

/// A step whose status differs between two runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDrift {
    /// 1-based step index
    pub index: usize,
    /// Step description (from whichever run has it)
    pub description: String,
    /// Status in the first run (`None` = not executed)
    pub left: Option<StepStatus>,
    /// Status in the second run (`None` = not executed)
    pub right: Option<StepStatus>,
}

/// Status-sequence comparison between two reports
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportComparison {
    /// Steps whose status changed
    pub drifts: Vec<StatusDrift>,
    /// Whether the outcomes differ
    pub outcome_changed: bool,
}

impl ReportComparison {
    /// Compare status sequences step by step
    #[must_use]
    pub fn compare(left: &Report, right: &Report) -> Self {
        fn find(report: &Report, index: usize) -> Option<&StepResult> {
            report.results.iter().find(|r| r.index == index)
        }

        let last = left
            .results
            .iter()
            .chain(&right.results)
            .map(|r| r.index)
            .max()
            .unwrap_or(0);
        let drifts = (0..=last)
            .filter_map(|index| {
                let (l, r) = (find(left, index), find(right, index));
                let (ls, rs) = (l.map(|x| x.status), r.map(|x| x.status));
                (ls != rs).then(|| StatusDrift {
                    index,
                    description: l.or(r).map(|x| x.description.clone()).unwrap_or_default(),
                    left: ls,
                    right: rs,
                })
            })
            .collect();
        Self {
            drifts,
            outcome_changed: std::mem::discriminant(&left.outcome)
                != std::mem::discriminant(&right.outcome),
        }
    }

    /// Same status sequence and same outcome kind
    #[must_use]
    pub fn is_identical(&self) -> bool {
        self.drifts.is_empty() && !self.outcome_changed
    }
}
