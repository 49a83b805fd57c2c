//! Chromium backend over the DevTools protocol.

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{GrantPermissionsParams, PermissionType};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    EventWebSocketClosed, EventWebSocketCreated, EventWebSocketFrameError,
    EventWebSocketFrameReceived, EventWebSocketFrameSent,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    EvaluateParams, EventConsoleApiCalled, EventExceptionThrown,
};
use chromiumoxide::layout::Point;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::pending::PendingRequests;
use super::{ElementState, Launcher, PageDriver};
use crate::config::{Permission, SessionConfig};
use crate::locator::{js_str, Selector};
use crate::recorder::{ConsoleLevel, EventKind, EventSink};
use crate::result::{HarnessError, HarnessResult};
use crate::wait::{LoadState, NETWORK_IDLE_THRESHOLD_MS};
use crate::websocket::WebSocketPhase;

const PAGE: &str = "main";
const READY_POLL: Duration = Duration::from_millis(50);
const VIDEO_FRAME_INTERVAL: Duration = Duration::from_millis(200);

/// Wrap `expr` so the page settles it and returns JSON text.
///
/// A function value is called first, so `async () => ...` scripts work too.
fn settled_json(expr: &str) -> String {
    format!(
        "(async () => {{ let v = ({expr}); if (typeof v === 'function') v = v(); \
         return JSON.stringify((await v) ?? null); }})()"
    )
}

/// Launches a local Chromium
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumLauncher;

#[async_trait]
impl Launcher for ChromiumLauncher {
    async fn launch(&self, config: &SessionConfig) -> HarnessResult<Box<dyn PageDriver>> {
        let mut builder =
            BrowserConfig::builder().window_size(config.viewport.width, config.viewport.height);
        if !config.headless {
            builder = builder.with_head();
        }
        if !config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = config.executable_path {
            builder = builder.chrome_executable(path);
        }
        if config.fake_media {
            builder = builder
                .arg("--use-fake-ui-for-media-stream")
                .arg("--use-fake-device-for-media-stream");
        }
        let cdp_config = builder.build().map_err(HarnessError::launch)?;

        let (browser, mut handler) = Browser::launch(cdp_config)
            .await
            .map_err(|e| HarnessError::launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| HarnessError::launch(e.to_string()))?;

        let video = if config.record_video {
            Some(spawn_video(page.clone(), config.video_dir.clone()).await?)
        } else {
            None
        };

        tracing::info!(
            headless = config.headless,
            width = config.viewport.width,
            height = config.viewport.height,
            "chromium launched"
        );

        Ok(Box::new(ChromiumDriver {
            browser,
            page,
            handler,
            listeners: Vec::new(),
            video,
            closed: false,
        }))
    }
}

async fn spawn_video(page: Page, dir: PathBuf) -> HarnessResult<JoinHandle<()>> {
    tokio::fs::create_dir_all(&dir).await?;
    Ok(tokio::spawn(async move {
        let mut frame = 0_u64;
        loop {
            let params = CaptureScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Jpeg)
                .quality(60)
                .build();
            let Ok(shot) = page.execute(params).await else {
                break;
            };
            let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(&shot.data) else {
                break;
            };
            frame += 1;
            let path = dir.join(format!("frame-{frame:06}.jpg"));
            if let Err(e) = tokio::fs::write(&path, bytes).await {
                tracing::warn!(path = %path.display(), error = %e, "video frame not written");
                break;
            }
            tokio::time::sleep(VIDEO_FRAME_INTERVAL).await;
        }
    }))
}

/// Page driver backed by a live Chromium page
#[derive(Debug)]
pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    listeners: Vec<JoinHandle<()>>,
    video: Option<JoinHandle<()>>,
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct ClickPoint {
    x: f64,
    y: f64,
}

impl ChromiumDriver {
    /// Evaluate `expr` and decode its JSON value; `undefined` becomes `null`.
    ///
    /// Promises are awaited, so a rejection surfaces as an evaluation error.
    async fn eval_json(&self, expr: &str) -> HarnessResult<serde_json::Value> {
        let json: String = self
            .page
            .evaluate_expression(EvaluateParams::new(settled_json(expr)))
            .await
            .map_err(|e| HarnessError::evaluation(e.to_string()))?
            .into_value()
            .map_err(|e| HarnessError::evaluation(e.to_string()))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Evaluate a script against match `index`, bound as `el`
    async fn on_element(
        &self,
        selector: &Selector,
        index: usize,
        body: &str,
    ) -> HarnessResult<serde_json::Value> {
        let expr = format!(
            "(() => {{ const el = {}; if (!el) return {{ missing: true }}; {body} }})()",
            selector.to_nth_query(index)
        );
        let value = self
            .eval_json(&expr)
            .await
            .map_err(|e| HarnessError::interaction(selector.to_string(), e.to_string()))?;
        if value.get("missing").and_then(serde_json::Value::as_bool) == Some(true) {
            return Err(HarnessError::interaction(
                selector.to_string(),
                "element detached",
            ));
        }
        Ok(value)
    }

    async fn wait_ready(&self, wait_until: LoadState) -> HarnessResult<()> {
        let wanted = wait_until.ready_states();
        loop {
            let state = self.eval_json("document.readyState").await?;
            if state.as_str().is_some_and(|s| wanted.contains(&s)) {
                break;
            }
            tokio::time::sleep(READY_POLL).await;
        }
        if wait_until == LoadState::NetworkIdle {
            self.wait_network_idle().await?;
        }
        Ok(())
    }

    /// No new resource entries for the idle threshold
    async fn wait_network_idle(&self) -> HarnessResult<()> {
        let threshold = Duration::from_millis(NETWORK_IDLE_THRESHOLD_MS);
        let mut last = self.resource_count().await?;
        let mut quiet_since = tokio::time::Instant::now();
        loop {
            tokio::time::sleep(READY_POLL).await;
            let current = self.resource_count().await?;
            if current != last {
                last = current;
                quiet_since = tokio::time::Instant::now();
            } else if quiet_since.elapsed() >= threshold {
                return Ok(());
            }
        }
    }

    async fn resource_count(&self) -> HarnessResult<u64> {
        Ok(self
            .eval_json("performance.getEntriesByType('resource').length")
            .await?
            .as_u64()
            .unwrap_or(0))
    }

    async fn listen(&mut self, sink: &EventSink) -> HarnessResult<()> {
        macro_rules! forward {
            ($driver:ident, $sink:ident, $event:ty, |$ev:ident| $body:expr) => {{
                let mut stream = $driver
                    .page
                    .event_listener::<$event>()
                    .await
                    .map_err(|e| HarnessError::invalid_state(e.to_string()))?;
                let sink = $sink.clone();
                $driver.listeners.push(tokio::spawn(async move {
                    while let Some($ev) = stream.next().await {
                        if let Some(kind) = $body {
                            if !sink.record(PAGE, kind) {
                                break;
                            }
                        }
                    }
                }));
            }};
        }

        let capacity = match sink.limits().max_events {
            0 => usize::MAX,
            n => n,
        };
        let requests = Arc::new(Mutex::new(PendingRequests::new(capacity)));

        forward!(self, sink, EventConsoleApiCalled, |ev| {
            let text = ev
                .args
                .iter()
                .map(|arg| match (&arg.value, &arg.description) {
                    (Some(serde_json::Value::String(s)), _) => s.clone(),
                    (Some(value), _) => value.to_string(),
                    (None, Some(description)) => description.clone(),
                    (None, None) => String::new(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            let level = ConsoleLevel::classify(&format!("{:?}", ev.r#type));
            Some(EventKind::Console { level, text })
        });

        forward!(self, sink, EventExceptionThrown, |ev| {
            let details = &ev.exception_details;
            let message = details
                .exception
                .as_ref()
                .and_then(|e| e.description.clone())
                .unwrap_or_else(|| details.text.clone());
            Some(EventKind::PageError { message })
        });

        let seen = Arc::clone(&requests);
        forward!(self, sink, EventRequestWillBeSent, |ev| {
            let method = ev.request.method.clone();
            let url = ev.request.url.clone();
            if url.starts_with("data:") {
                None
            } else {
                if let Ok(mut pending) = seen.lock() {
                    pending.begin(ev.request_id.inner(), &method, &url);
                }
                Some(EventKind::Request { method, url })
            }
        });

        forward!(self, sink, EventResponseReceived, |ev| {
            let status = u16::try_from(ev.response.status).unwrap_or(0);
            Some(EventKind::Response {
                url: ev.response.url.clone(),
                status,
            })
        });

        let finished = Arc::clone(&requests);
        forward!(self, sink, EventLoadingFinished, |ev| {
            if let Ok(mut pending) = finished.lock() {
                pending.finish(ev.request_id.inner());
            }
            None::<EventKind>
        });

        let failed = Arc::clone(&requests);
        forward!(self, sink, EventLoadingFailed, |ev| {
            let known = failed
                .lock()
                .ok()
                .and_then(|mut pending| pending.fail(ev.request_id.inner()));
            known.map(|(method, url)| EventKind::RequestFailed {
                method,
                url,
                error: ev.error_text.clone(),
            })
        });

        forward!(self, sink, EventWebSocketCreated, |ev| Some(EventKind::WebSocket {
            connection: ev.request_id.inner().clone(),
            phase: WebSocketPhase::Open,
            payload: Some(ev.url.clone()),
            truncated: false,
        }));

        forward!(self, sink, EventWebSocketFrameSent, |ev| Some(EventKind::WebSocket {
            connection: ev.request_id.inner().clone(),
            phase: WebSocketPhase::FrameSent,
            payload: Some(ev.response.payload_data.clone()),
            truncated: false,
        }));

        forward!(self, sink, EventWebSocketFrameReceived, |ev| Some(EventKind::WebSocket {
            connection: ev.request_id.inner().clone(),
            phase: WebSocketPhase::FrameReceived,
            payload: Some(ev.response.payload_data.clone()),
            truncated: false,
        }));

        forward!(self, sink, EventWebSocketClosed, |ev| Some(EventKind::WebSocket {
            connection: ev.request_id.inner().clone(),
            phase: WebSocketPhase::Close,
            payload: None,
            truncated: false,
        }));

        forward!(self, sink, EventWebSocketFrameError, |ev| Some(EventKind::WebSocket {
            connection: ev.request_id.inner().clone(),
            phase: WebSocketPhase::Error,
            payload: Some(ev.error_message.clone()),
            truncated: false,
        }));

        Ok(())
    }
}

const fn permission_type(permission: Permission) -> PermissionType {
    match permission {
        Permission::Microphone => PermissionType::AudioCapture,
        Permission::Camera => PermissionType::VideoCapture,
        Permission::Notifications => PermissionType::Notifications,
        Permission::Clipboard => PermissionType::ClipboardReadWrite,
        Permission::Geolocation => PermissionType::Geolocation,
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str, wait_until: LoadState) -> HarnessResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| HarnessError::navigation(url, e.to_string()))?;
        self.wait_ready(wait_until)
            .await
            .map_err(|e| HarnessError::navigation(url, e.to_string()))
    }

    async fn current_url(&self) -> HarnessResult<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| HarnessError::evaluation(e.to_string()))?
            .unwrap_or_default())
    }

    async fn title(&self) -> HarnessResult<String> {
        Ok(self
            .page
            .get_title()
            .await
            .map_err(|e| HarnessError::evaluation(e.to_string()))?
            .unwrap_or_default())
    }

    async fn count(&self, selector: &Selector) -> HarnessResult<usize> {
        let value = self.eval_json(&selector.to_count_query()).await?;
        Ok(usize::try_from(value.as_u64().unwrap_or(0)).unwrap_or(usize::MAX))
    }

    async fn element_state(&self, selector: &Selector, index: usize) -> HarnessResult<ElementState> {
        let value = self
            .on_element(
                selector,
                index,
                "const r = el.getBoundingClientRect(); const s = getComputedStyle(el); \
                 return { visible: r.width > 0 && r.height > 0 && s.visibility !== 'hidden' \
                 && s.display !== 'none', enabled: !el.disabled };",
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn click(&self, selector: &Selector, index: usize) -> HarnessResult<()> {
        let value = self
            .on_element(
                selector,
                index,
                "el.scrollIntoView({ block: 'center', inline: 'center' }); \
                 const r = el.getBoundingClientRect(); \
                 return { x: r.left + r.width / 2, y: r.top + r.height / 2 };",
            )
            .await?;
        let point: ClickPoint = serde_json::from_value(value)?;
        self.page
            .click(Point {
                x: point.x,
                y: point.y,
            })
            .await
            .map_err(|e| HarnessError::interaction(selector.to_string(), e.to_string()))?;
        Ok(())
    }

    async fn fill(&self, selector: &Selector, index: usize, value: &str) -> HarnessResult<()> {
        let body = format!(
            "el.focus(); el.value = {}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;",
            js_str(value)
        );
        self.on_element(selector, index, &body).await?;
        Ok(())
    }

    async fn select_option(
        &self,
        selector: &Selector,
        index: usize,
        value: &str,
    ) -> HarnessResult<()> {
        let body = format!(
            "const v = {}; const opt = Array.from(el.options || []) \
             .find(o => o.value === v || o.textContent.trim() === v); \
             if (!opt) return {{ found: false }}; el.value = opt.value; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return {{ found: true }};",
            js_str(value)
        );
        let result = self.on_element(selector, index, &body).await?;
        if result.get("found").and_then(serde_json::Value::as_bool) == Some(true) {
            Ok(())
        } else {
            Err(HarnessError::interaction(
                selector.to_string(),
                format!("no option '{value}'"),
            ))
        }
    }

    async fn text_content(&self, selector: &Selector, index: usize) -> HarnessResult<String> {
        let value = self
            .on_element(selector, index, "return { text: el.textContent || '' };")
            .await?;
        Ok(value
            .get("text")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn evaluate(&self, script: &str) -> HarnessResult<serde_json::Value> {
        self.eval_json(script).await
    }

    async fn screenshot(&self) -> HarnessResult<Vec<u8>> {
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let screenshot = self
            .page
            .execute(params)
            .await
            .map_err(|e| HarnessError::Screenshot {
                message: e.to_string(),
            })?;
        base64::engine::general_purpose::STANDARD
            .decode(&screenshot.data)
            .map_err(|e| HarnessError::Screenshot {
                message: e.to_string(),
            })
    }

    async fn grant_permissions(
        &mut self,
        origin: Option<&str>,
        permissions: &[Permission],
    ) -> HarnessResult<()> {
        if permissions.is_empty() {
            return Ok(());
        }
        let mut builder = GrantPermissionsParams::builder()
            .permissions(permissions.iter().copied().map(permission_type));
        if let Some(origin) = origin {
            builder = builder.origin(origin);
        }
        let params = builder.build().map_err(HarnessError::launch)?;
        self.browser
            .execute(params)
            .await
            .map_err(|e| HarnessError::launch(format!("granting permissions: {e}")))?;
        Ok(())
    }

    async fn subscribe(&mut self, sink: EventSink) -> HarnessResult<()> {
        self.listen(&sink).await
    }

    async fn close(&mut self) -> HarnessResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        if let Some(video) = self.video.take() {
            video.abort();
        }
        let result = self.browser.close().await;
        self.handler.abort();
        result.map_err(|e| HarnessError::invalid_state(format!("closing browser: {e}")))?;
        tracing::info!("chromium closed");
        Ok(())
    }
}
