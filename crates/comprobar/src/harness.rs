//! Run state machine.
//!
//! ```text
//! Idle ─► Starting ─► Running(1) ─► … ─► Running(n) ─► Finalizing ─► Done
//!            │                                            │
//!            └──────────── launch failure ────────────────┴────────► Aborted
//! ```
//!
//! A critical step failure also ends in `Aborted`. Cancellation jumps to
//! `Finalizing` and ends in `Done` with a `cancelled` outcome.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::action::{capture, ActionDriver, RunContext};
use crate::config::{HarnessConfig, ObservationPolicy, SessionConfig};
use crate::driver::Launcher;
use crate::emitter::Emitter;
use crate::recorder::{ObservationHandle, Recorder};
use crate::report::{Report, RunStatus, StepResult, StepStatus};
use crate::result::{HarnessError, HarnessResult};
use crate::script::Script;
use crate::session::{Session, SessionController};

/// Description of the synthetic result recorded when no session starts
pub const LAUNCH_STEP: &str = "session launch";

/// Where a run is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarnessState {
    /// Nothing started
    #[default]
    Idle,
    /// Acquiring the browser
    Starting,
    /// Executing the step with this index (1-based)
    Running(usize),
    /// Tearing down and summarizing
    Finalizing,
    /// Finished normally or by cancellation
    Done,
    /// Launch or critical failure
    Aborted,
}

impl HarnessState {
    /// Whether no further transition happens
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl std::fmt::Display for HarnessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Starting => f.write_str("starting"),
            Self::Running(i) => write!(f, "running({i})"),
            Self::Finalizing => f.write_str("finalizing"),
            Self::Done => f.write_str("done"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Result of [`Harness::run`]
#[derive(Debug)]
pub struct RunOutcome {
    /// The finished report
    pub report: Report,
    /// Terminal state
    pub final_state: HarnessState,
    /// Every state the run passed through, in order
    pub trace: Vec<HarnessState>,
    launch_error: Option<HarnessError>,
}

impl RunOutcome {
    /// Whether the run reached `Finalizing`
    #[must_use]
    pub fn finalized(&self) -> bool {
        self.trace.contains(&HarnessState::Finalizing)
    }

    /// The error that prevented the session from starting
    #[must_use]
    pub const fn launch_error(&self) -> Option<&HarnessError> {
        self.launch_error.as_ref()
    }

    /// The report, or the launch error if no session started
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Launch`] when the browser never started.
    pub fn into_result(self) -> HarnessResult<Report> {
        match self.launch_error {
            Some(err) => Err(err),
            None => Ok(self.report),
        }
    }
}

/// Drives a script through one session
#[derive(Debug)]
pub struct Harness<L> {
    config: HarnessConfig,
    controller: SessionController<L>,
    actions: ActionDriver,
    state: HarnessState,
    trace: Vec<HarnessState>,
    held: Option<Session>,
}

impl<L: Launcher> Harness<L> {
    /// Create a harness
    pub fn new(config: HarnessConfig, launcher: L) -> Self {
        Self {
            config,
            controller: SessionController::new(launcher),
            actions: ActionDriver::new(),
            state: HarnessState::Idle,
            trace: vec![HarnessState::Idle],
            held: None,
        }
    }

    /// Base configuration (before script overrides)
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> HarnessState {
        self.state
    }

    /// Whether a session is being held open for inspection
    #[must_use]
    pub const fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    fn transition(&mut self, next: HarnessState) {
        tracing::info!(from = %self.state, to = %next, "harness state");
        self.state = next;
        self.trace.push(next);
    }

    /// Execute `script` and return the finished report.
    ///
    /// Step failures never surface as errors; they are recorded in the report.
    /// When the effective configuration is not in CI mode the session is kept
    /// open afterwards; see [`Harness::hold_for_inspection`].
    pub async fn run(&mut self, script: &Script, cancel: CancellationToken) -> RunOutcome {
        // A previous inspection hold ends when a new run begins.
        if let Err(err) = self.release().await {
            tracing::warn!(error = %err, "failed to release held session");
        }
        self.state = HarnessState::Idle;
        self.trace = vec![HarnessState::Idle];

        let config = script.configure(self.config.clone());
        let session_config = session_config(&config);
        let emitter = Emitter::from_config(&config);
        let mut report = Report::new(&script.name);

        self.transition(HarnessState::Starting);
        let origin = config.base_origin();
        let started = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            started = self.start(&config, &session_config, origin.as_deref()) => Some(started),
        };

        let (mut session, observations) = match started {
            None => {
                tracing::warn!("cancelled before the session started");
                for (i, step) in script.steps.iter().enumerate() {
                    report.skip(i + 1, &step.description);
                }
                return self.conclude(report, RunStatus::Cancelled, &emitter, None);
            }
            Some(Err(err)) => {
                tracing::error!(error = %err, "session launch failed");
                report.push(StepResult::failed(0, LAUNCH_STEP, &err));
                for (i, step) in script.steps.iter().enumerate() {
                    report.skip(i + 1, &step.description);
                }
                let outcome = RunStatus::Aborted {
                    reason: err.to_string(),
                };
                return self.conclude(report, outcome, &emitter, Some(err));
            }
            Some(Ok(started)) => started,
        };
        report.session_id = Some(session.id());

        let outcome = self
            .execute_steps(script, &config, &emitter, &mut session, &observations, &mut report, &cancel)
            .await;

        self.transition(HarnessState::Finalizing);
        if let Err(err) = self.teardown(&config, session, &observations).await {
            tracing::warn!(error = %err, "session teardown failed");
        }
        self.conclude(report, outcome, &emitter, None)
    }

    async fn start(
        &self,
        config: &HarnessConfig,
        session_config: &SessionConfig,
        origin: Option<&str>,
    ) -> HarnessResult<(Session, ObservationHandle)> {
        let mut session = self.controller.start(session_config, origin).await?;
        match Recorder::new(config.recorder).attach(&mut session).await {
            Ok(observations) => Ok((session, observations)),
            Err(err) => {
                if let Err(stop_err) = self.controller.stop(&mut session).await {
                    tracing::warn!(error = %stop_err, "stopping session after failed attach");
                }
                Err(HarnessError::launch(format!("event recording unavailable: {err}")))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_steps(
        &mut self,
        script: &Script,
        config: &HarnessConfig,
        emitter: &Emitter,
        session: &mut Session,
        observations: &ObservationHandle,
        report: &mut Report,
        cancel: &CancellationToken,
    ) -> RunStatus {
        let actions = self.actions;
        let ctx = RunContext {
            config,
            observations,
            emitter,
        };
        let mut outcome = RunStatus::Completed;

        for (i, step) in script.steps.iter().enumerate() {
            let index = i + 1;
            if outcome != RunStatus::Completed {
                report.skip(index, &step.description);
                continue;
            }

            self.transition(HarnessState::Running(index));
            let executed = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = actions.execute(session, index, step, &ctx) => Some(result),
            };
            let Some(mut result) = executed else {
                tracing::warn!(index, "run cancelled");
                report.skip(index, &step.description);
                outcome = RunStatus::Cancelled;
                continue;
            };

            if result.status.is_failed() && config.screenshot_on_failure && result.screenshot.is_none() {
                match capture(session, index, &step.description, &ctx).await {
                    Ok(path) => result = result.with_screenshot(path),
                    Err(err) => result.annotate(&err.to_string()),
                }
            }
            let attach = match config.observations {
                ObservationPolicy::Never => false,
                ObservationPolicy::OnFailure => result.status != StepStatus::Passed,
                ObservationPolicy::Always => true,
            };
            if attach {
                let events = observations.window(result.started_ms, result.finished_ms());
                result = result.with_observations(events);
            }

            match result.status {
                StepStatus::Failed if step.critical => {
                    tracing::warn!(index, message = %result.message, "critical step failed");
                    result.annotate("critical step, remaining steps skipped");
                    outcome = RunStatus::Aborted {
                        reason: format!("critical step {index} '{}' failed", step.description),
                    };
                }
                StepStatus::Failed => {
                    tracing::warn!(index, message = %result.message, "step failed");
                }
                StepStatus::Warned => {
                    tracing::warn!(index, message = %result.message, "step warned");
                }
                StepStatus::Passed => {}
            }
            report.push(result);
        }
        outcome
    }

    async fn teardown(
        &mut self,
        config: &HarnessConfig,
        mut session: Session,
        observations: &ObservationHandle,
    ) -> HarnessResult<()> {
        if observations.dropped() > 0 {
            tracing::warn!(dropped = observations.dropped(), "recorder buffer overflowed");
        }
        if config.ci_mode {
            observations.detach();
            self.controller.stop(&mut session).await
        } else {
            self.held = Some(session);
            Ok(())
        }
    }

    fn conclude(
        &mut self,
        mut report: Report,
        outcome: RunStatus,
        emitter: &Emitter,
        launch_error: Option<HarnessError>,
    ) -> RunOutcome {
        if self.state != HarnessState::Finalizing {
            self.transition(HarnessState::Finalizing);
        }
        let aborted = matches!(outcome, RunStatus::Aborted { .. });
        report.finish(outcome);
        emitter.finalize(&report);
        self.transition(if aborted {
            HarnessState::Aborted
        } else {
            HarnessState::Done
        });
        RunOutcome {
            report,
            final_state: self.state,
            trace: self.trace.clone(),
            launch_error,
        }
    }

    /// Keep the held session open until `cancel` fires, then stop it.
    ///
    /// Returns immediately when nothing is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser fails to close.
    pub async fn hold_for_inspection(&mut self, cancel: &CancellationToken) -> HarnessResult<()> {
        if let Some(session) = &self.held {
            tracing::info!(session = %session.id(), "holding browser open for inspection; interrupt to exit");
            cancel.cancelled().await;
        }
        self.release().await
    }

    /// Stop the held session, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the browser fails to close.
    pub async fn release(&mut self) -> HarnessResult<()> {
        match self.held.take() {
            Some(mut session) => self.controller.stop(&mut session).await,
            None => Ok(()),
        }
    }
}

fn session_config(config: &HarnessConfig) -> SessionConfig {
    let mut session = config.session.clone();
    if session.record_video && session.video_dir == SessionConfig::default().video_dir {
        session.video_dir = config.output_dir.join("video");
    }
    session
}
