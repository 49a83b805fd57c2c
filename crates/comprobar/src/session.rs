//! Session controller.
//!
//! Owns the browser lifecycle: preflight, launch, permission grants, and an
//! idempotent stop. A [`Session`] is either active (it owns a driver) or
//! stopped; every page operation on a stopped session fails with
//! [`HarnessError::InvalidState`].

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::driver::{Launcher, PageDriver};
use crate::result::{HarnessError, HarnessResult};

const PREFLIGHT_RETRY: Duration = Duration::from_millis(250);
const PREFLIGHT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// One browser instance, its configuration, and its lifecycle state
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    origin: Instant,
    config: SessionConfig,
    driver: Option<Box<dyn PageDriver>>,
}

impl Session {
    /// Wrap an already-launched driver
    #[must_use]
    pub fn new(config: SessionConfig, driver: Box<dyn PageDriver>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            origin: Instant::now(),
            config,
            driver: Some(driver),
        }
    }

    /// Session identifier
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Wall-clock start time
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Monotonic origin every event timestamp is measured from
    #[must_use]
    pub const fn origin(&self) -> Instant {
        self.origin
    }

    /// Configuration the session was started with
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Milliseconds since the session started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Whether the browser is still owned
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.driver.is_some()
    }

    /// Shared page driver of an active session
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidState`] once the session is stopped.
    pub fn driver(&self) -> HarnessResult<&dyn PageDriver> {
        self.driver.as_deref().ok_or_else(|| {
            HarnessError::invalid_state(format!("session {} is stopped", self.id))
        })
    }

    /// Page driver of an active session
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidState`] once the session is stopped.
    pub fn driver_mut(&mut self) -> HarnessResult<&mut dyn PageDriver> {
        match self.driver.as_deref_mut() {
            Some(driver) => Ok(driver),
            None => Err(HarnessError::invalid_state(format!(
                "session {} is stopped",
                self.id
            ))),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.driver.is_some() {
            tracing::warn!(session = %self.id, "session dropped without stop");
        }
    }
}

/// Starts and stops sessions through a [`Launcher`]
#[derive(Debug, Clone)]
pub struct SessionController<L> {
    launcher: L,
}

impl<L: Launcher> SessionController<L> {
    /// Create a controller
    pub const fn new(launcher: L) -> Self {
        Self { launcher }
    }

    /// Launch a browser and apply the session configuration.
    ///
    /// `default_origin` is used for permission grants when the configuration
    /// names none.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Launch`] if the preflight target stays
    /// unreachable, the browser cannot be acquired within the launch budget,
    /// or permissions cannot be granted.
    pub async fn start(
        &self,
        config: &SessionConfig,
        default_origin: Option<&str>,
    ) -> HarnessResult<Session> {
        let budget = Duration::from_millis(config.launch_timeout_ms);
        if let Some(url) = &config.preflight_url {
            preflight(url, budget).await?;
        }

        let driver = tokio::time::timeout(budget, self.launcher.launch(config))
            .await
            .map_err(|_| {
                HarnessError::launch(format!(
                    "browser not ready within {}ms",
                    config.launch_timeout_ms
                ))
            })??;
        let mut session = Session::new(config.clone(), driver);

        if !config.permissions.is_empty() {
            let origin = config.permission_origin.as_deref().or(default_origin);
            let granted = session
                .driver_mut()?
                .grant_permissions(origin, &config.permissions)
                .await;
            if let Err(e) = granted {
                self.stop(&mut session).await?;
                return Err(HarnessError::launch(format!(
                    "permissions could not be granted: {e}"
                )));
            }
            tracing::debug!(?origin, permissions = ?config.permissions, "permissions granted");
        }

        tracing::info!(
            session = %session.id,
            headless = config.headless,
            "session started"
        );
        Ok(session)
    }

    /// Release the browser. Stopping a stopped session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to close; the session is marked
    /// stopped regardless.
    pub async fn stop(&self, session: &mut Session) -> HarnessResult<()> {
        let Some(mut driver) = session.driver.take() else {
            tracing::trace!(session = %session.id, "stop on stopped session");
            return Ok(());
        };
        driver.close().await?;
        tracing::info!(
            session = %session.id,
            elapsed_ms = session.elapsed_ms(),
            "session stopped"
        );
        Ok(())
    }
}

/// Wait until `url` answers at all (any status), bounded by `budget`
async fn preflight(url: &str, budget: Duration) -> HarnessResult<()> {
    let client = reqwest::Client::builder()
        .timeout(PREFLIGHT_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| HarnessError::launch(e.to_string()))?;
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        match client.get(url).send().await {
            Ok(response) => {
                tracing::debug!(url, status = %response.status(), "preflight ok");
                return Ok(());
            }
            Err(e) if tokio::time::Instant::now() + PREFLIGHT_RETRY >= deadline => {
                return Err(HarnessError::launch(format!("{url} is unreachable: {e}")));
            }
            Err(e) => {
                tracing::trace!(url, error = %e, "preflight retry");
                tokio::time::sleep(PREFLIGHT_RETRY).await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Permission;
    use crate::driver::MockBrowser;
    use crate::wait::LoadState;

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn test_start_and_stop() {
            let browser = MockBrowser::new();
            let controller = SessionController::new(browser.launcher());
            let mut session = controller
                .start(&SessionConfig::default(), None)
                .await
                .unwrap();
            assert!(session.is_active());
            controller.stop(&mut session).await.unwrap();
            assert!(!session.is_active());
            assert_eq!(browser.closes(), 1);
        }

        #[tokio::test]
        async fn test_double_stop_is_noop() {
            let browser = MockBrowser::new();
            let controller = SessionController::new(browser.launcher());
            let mut session = controller
                .start(&SessionConfig::default(), None)
                .await
                .unwrap();
            controller.stop(&mut session).await.unwrap();
            controller.stop(&mut session).await.unwrap();
            assert_eq!(browser.closes(), 1);
        }

        #[tokio::test]
        async fn test_operations_after_stop_fail() {
            let controller = SessionController::new(MockBrowser::new().launcher());
            let mut session = controller
                .start(&SessionConfig::default(), None)
                .await
                .unwrap();
            controller.stop(&mut session).await.unwrap();
            let err = session.driver_mut().unwrap_err();
            assert!(matches!(err, HarnessError::InvalidState { .. }));
        }

        #[tokio::test]
        async fn test_launch_failure() {
            let controller =
                SessionController::new(MockBrowser::new().failing_launch("no browser").launcher());
            let err = controller
                .start(&SessionConfig::default(), None)
                .await
                .unwrap_err();
            assert!(matches!(err, HarnessError::Launch { .. }));
        }
    }

    mod configuration {
        use super::*;

        #[tokio::test]
        async fn test_permissions_granted_for_default_origin() {
            let browser = MockBrowser::new();
            let controller = SessionController::new(browser.launcher());
            let config = SessionConfig::new().with_permission(Permission::Microphone);
            let mut session = controller
                .start(&config, Some("http://localhost:3000"))
                .await
                .unwrap();
            assert_eq!(
                browser.granted(),
                vec![(
                    Some("http://localhost:3000".to_string()),
                    Permission::Microphone
                )]
            );
            controller.stop(&mut session).await.unwrap();
        }

        #[tokio::test]
        async fn test_driver_usable_while_active() {
            let browser = MockBrowser::new();
            let controller = SessionController::new(browser.launcher());
            let mut session = controller
                .start(&SessionConfig::default(), None)
                .await
                .unwrap();
            session
                .driver_mut()
                .unwrap()
                .navigate("http://app/", LoadState::Load)
                .await
                .unwrap();
            assert!(browser.was_called("navigate:http://app/"));
            controller.stop(&mut session).await.unwrap();
        }

        #[tokio::test]
        async fn test_unreachable_preflight_is_launch_error() {
            let browser = MockBrowser::new();
            let controller = SessionController::new(browser.launcher());
            let config = SessionConfig::new()
                .with_preflight("http://127.0.0.1:9/")
                .with_launch_timeout(300);
            let err = controller.start(&config, None).await.unwrap_err();
            assert!(matches!(err, HarnessError::Launch { .. }));
            assert_eq!(browser.launches(), 0);
        }
    }
}
