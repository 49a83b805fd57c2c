//! Session and harness configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::retry::RetryPolicy;

/// Default step timeout (10 seconds)
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 10_000;

/// Default budget for acquiring a browser (30 seconds)
pub const DEFAULT_LAUNCH_TIMEOUT_MS: u64 = 30_000;

/// Default cap on captured WebSocket payloads (4 KiB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

/// Default cap on buffered events
pub const DEFAULT_MAX_EVENTS: usize = 10_000;

/// Browser viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in CSS pixels
    pub width: u32,
    /// Height in CSS pixels
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

/// Browser capability that can be granted up front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Audio capture
    Microphone,
    /// Video capture
    Camera,
    /// Web notifications
    Notifications,
    /// Clipboard read/write
    Clipboard,
    /// Geolocation
    Geolocation,
}

/// Session (browser lifecycle) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Run without a visible window
    pub headless: bool,
    /// Viewport size
    pub viewport: Viewport,
    /// Capabilities granted before the first step
    pub permissions: Vec<Permission>,
    /// Origin the permissions are granted for (defaults to the base URL)
    pub permission_origin: Option<String>,
    /// Capture periodic frames while the session runs
    pub record_video: bool,
    /// Where video frames are written
    pub video_dir: PathBuf,
    /// Provide fake microphone/camera streams
    pub fake_media: bool,
    /// Path to the chromium binary (None = auto-detect)
    pub executable_path: Option<PathBuf>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
    /// Budget for acquiring the browser and reaching the target
    pub launch_timeout_ms: u64,
    /// URL probed before launch; unreachable means the run aborts
    pub preflight_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            permissions: Vec::new(),
            permission_origin: None,
            record_video: false,
            video_dir: PathBuf::from("target/comprobar/video"),
            fake_media: false,
            executable_path: None,
            sandbox: true,
            launch_timeout_ms: DEFAULT_LAUNCH_TIMEOUT_MS,
            preflight_url: None,
        }
    }
}

impl SessionConfig {
    /// Create new config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Viewport { width, height };
        self
    }

    /// Grant a capability
    #[must_use]
    pub fn with_permission(mut self, permission: Permission) -> Self {
        if !self.permissions.contains(&permission) {
            self.permissions.push(permission);
        }
        self
    }

    /// Enable fake media devices
    #[must_use]
    pub const fn with_fake_media(mut self, enabled: bool) -> Self {
        self.fake_media = enabled;
        self
    }

    /// Enable frame capture
    #[must_use]
    pub const fn with_record_video(mut self, enabled: bool) -> Self {
        self.record_video = enabled;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_executable_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_path = Some(path.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }

    /// Set launch timeout
    #[must_use]
    pub const fn with_launch_timeout(mut self, ms: u64) -> Self {
        self.launch_timeout_ms = ms;
        self
    }

    /// Probe this URL before launching
    #[must_use]
    pub fn with_preflight(mut self, url: impl Into<String>) -> Self {
        self.preflight_url = Some(url.into());
        self
    }
}

/// Which step results carry the events observed while they ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationPolicy {
    /// Never attach events
    Never,
    /// Attach events to failed and warned results
    #[default]
    OnFailure,
    /// Attach events to every result
    Always,
}

/// Bounds on what the recorder keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderLimits {
    /// Maximum number of buffered events (oldest are evicted)
    pub max_events: usize,
    /// Maximum captured WebSocket payload size in bytes
    pub max_payload_bytes: usize,
}

impl Default for RecorderLimits {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Harness run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Base URL relative navigations resolve against
    pub base_url: Option<String>,
    /// Exit with a status code instead of holding the browser open
    pub ci_mode: bool,
    /// Output directory for screenshots and reports
    pub output_dir: PathBuf,
    /// Screenshot file prefix
    pub screenshot_prefix: String,
    /// Default per-step timeout
    pub default_timeout_ms: u64,
    /// Polling interval while waiting for elements/events
    pub poll_interval_ms: u64,
    /// Backoff between retried interactions
    pub retry: RetryPolicy,
    /// Recorder bounds
    pub recorder: RecorderLimits,
    /// Attach observed events to step results
    pub observations: ObservationPolicy,
    /// Capture a screenshot whenever a step fails
    pub screenshot_on_failure: bool,
    /// Session configuration
    pub session: SessionConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            ci_mode: true,
            output_dir: PathBuf::from("target/comprobar"),
            screenshot_prefix: "step".to_string(),
            default_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            poll_interval_ms: 50,
            retry: RetryPolicy::default(),
            recorder: RecorderLimits::default(),
            observations: ObservationPolicy::default(),
            screenshot_on_failure: true,
            session: SessionConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Create new config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set CI mode (false = manual inspection)
    #[must_use]
    pub const fn with_ci_mode(mut self, ci: bool) -> Self {
        self.ci_mode = ci;
        self
    }

    /// Set output directory
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set screenshot prefix
    #[must_use]
    pub fn with_screenshot_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.screenshot_prefix = prefix.into();
        self
    }

    /// Set default step timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, ms: u64) -> Self {
        self.default_timeout_ms = ms;
        self
    }

    /// Set polling interval
    #[must_use]
    pub const fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set retry policy
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set recorder limits
    #[must_use]
    pub const fn with_recorder_limits(mut self, limits: RecorderLimits) -> Self {
        self.recorder = limits;
        self
    }

    /// Set observation policy
    #[must_use]
    pub const fn with_observations(mut self, policy: ObservationPolicy) -> Self {
        self.observations = policy;
        self
    }

    /// Toggle failure screenshots
    #[must_use]
    pub const fn with_screenshot_on_failure(mut self, enabled: bool) -> Self {
        self.screenshot_on_failure = enabled;
        self
    }

    /// Set session configuration
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Resolve `url` against the base URL.
    ///
    /// Absolute URLs (anything with a scheme) and `about:` pages pass through.
    #[must_use]
    pub fn resolve_url(&self, url: &str) -> String {
        if url.contains("://") || url.starts_with("about:") || url.starts_with("data:") {
            return url.to_string();
        }
        match &self.base_url {
            Some(base) => {
                let base = base.trim_end_matches('/');
                let path = url.trim_start_matches('/');
                if path.is_empty() {
                    format!("{base}/")
                } else {
                    format!("{base}/{path}")
                }
            }
            None => url.to_string(),
        }
    }

    /// Origin of the base URL (`scheme://host[:port]`)
    #[must_use]
    pub fn base_origin(&self) -> Option<String> {
        let base = self.base_url.as_deref()?;
        let (scheme, rest) = base.split_once("://")?;
        let host = rest.split('/').next().unwrap_or(rest);
        Some(format!("{scheme}://{host}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod session_config {
        use super::*;

        #[test]
        fn test_defaults() {
            let config = SessionConfig::default();
            assert!(config.headless);
            assert!(config.sandbox);
            assert_eq!(config.viewport, Viewport::default());
            assert!(config.permissions.is_empty());
            assert_eq!(config.launch_timeout_ms, DEFAULT_LAUNCH_TIMEOUT_MS);
        }

        #[test]
        fn test_permissions_are_deduplicated() {
            let config = SessionConfig::new()
                .with_permission(Permission::Microphone)
                .with_permission(Permission::Microphone)
                .with_permission(Permission::Camera);
            assert_eq!(
                config.permissions,
                vec![Permission::Microphone, Permission::Camera]
            );
        }

        #[test]
        fn test_partial_yaml_fills_defaults() {
            let config: SessionConfig =
                serde_yaml_ng::from_str("headless: false\npermissions: [microphone]\n").unwrap();
            assert!(!config.headless);
            assert_eq!(config.permissions, vec![Permission::Microphone]);
            assert_eq!(config.viewport, Viewport::default());
        }
    }

    mod harness_config {
        use super::*;

        #[test]
        fn test_resolve_relative_against_base() {
            let config = HarnessConfig::new().with_base_url("http://localhost:3000/");
            assert_eq!(
                config.resolve_url("/dashboard"),
                "http://localhost:3000/dashboard"
            );
            assert_eq!(config.resolve_url(""), "http://localhost:3000/");
        }

        #[test]
        fn test_absolute_urls_pass_through() {
            let config = HarnessConfig::new().with_base_url("http://localhost:3000");
            assert_eq!(
                config.resolve_url("http://localhost:1/"),
                "http://localhost:1/"
            );
            assert_eq!(config.resolve_url("about:blank"), "about:blank");
        }

        #[test]
        fn test_base_origin() {
            let config = HarnessConfig::new().with_base_url("http://localhost:3000/app/x");
            assert_eq!(
                config.base_origin().as_deref(),
                Some("http://localhost:3000")
            );
            assert!(HarnessConfig::new().base_origin().is_none());
        }

        #[test]
        fn test_ci_mode_default_on() {
            assert!(HarnessConfig::default().ci_mode);
            assert!(!HarnessConfig::default().with_ci_mode(false).ci_mode);
        }
    }
}
