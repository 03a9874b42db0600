//! Chrome DevTools Protocol surface implementation
//!
//! Each surface launches its own headless Chrome, opens one tab on the host
//! page from [`crate::page`] and drives the map through `window.__mapshot`.

use crate::page::{data_url, map_page_html};
use crate::surface::{IdleOutcome, Surface, SurfaceFactory, ViewOutcome};
use crate::{Error, ImageFormat, MapView, Result, StyleDefinition, SurfaceConfig, Viewport};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::debug;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

// The browser is only ever idle between requests; never let the connection
// be reaped for it.
const BROWSER_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Launches one Chrome-backed surface per style
#[derive(Debug, Clone)]
pub struct CdpSurfaceFactory {
    config: SurfaceConfig,
}

impl CdpSurfaceFactory {
    pub fn new(config: SurfaceConfig) -> Self {
        Self { config }
    }
}

impl SurfaceFactory for CdpSurfaceFactory {
    type Surface = CdpSurface;

    fn create(&self, style: &StyleDefinition) -> Result<CdpSurface> {
        CdpSurface::launch(style, self.config.clone())
    }
}

/// A headless Chrome tab showing one map
pub struct CdpSurface {
    browser: Browser,
    tab: Arc<Tab>,
    config: SurfaceConfig,
    style: String,
    viewport: Viewport,
    // Last idle generation reported to the protocol
    seen_idle: u64,
}

impl CdpSurface {
    /// Launch Chrome, load the host page and wait for the style to load
    pub fn launch(style: &StyleDefinition, config: SurfaceConfig) -> Result<Self> {
        let init_error = |message: String| Error::SurfaceInitError {
            style: style.name.clone(),
            message,
        };

        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(config.sandbox)
            .window_size(Some((config.max_viewport.width, config.max_viewport.height)))
            .idle_browser_timeout(BROWSER_IDLE_TIMEOUT)
            .build()
            .map_err(|e| init_error(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| init_error(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| init_error(format!("Failed to create tab: {}", e)))?;

        tab.set_user_agent(&config.user_agent, None, None)
            .map_err(|e| init_error(format!("Failed to set user agent: {}", e)))?;

        let url = data_url(&map_page_html(style, &config));
        tab.navigate_to(&url)
            .map_err(|e| init_error(format!("Navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| init_error(format!("Wait for navigation failed: {}", e)))?;

        let surface = Self {
            browser,
            tab,
            config,
            style: style.name.clone(),
            viewport: Viewport::default(),
            seen_idle: 0,
        };
        surface.wait_until_loaded().map_err(|e| match e {
            Error::SurfaceInitError { .. } => e,
            other => init_error(other.to_string()),
        })?;
        Ok(surface)
    }

    fn wait_until_loaded(&self) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(self.config.init_timeout_ms);
        loop {
            // The control object may not exist for a moment after navigation.
            let status = parse_json_string(self.eval(
                "JSON.stringify(window.__mapshot \
                 ? { ready: window.__mapshot.ready, error: window.__mapshot.error } \
                 : { ready: false, error: null })",
            )?);
            if status.get("ready").and_then(Value::as_bool) == Some(true) {
                debug!("[{}] style loaded", self.style);
                return Ok(());
            }
            if let Some(message) = status.get("error").and_then(Value::as_str) {
                return Err(Error::SurfaceInitError {
                    style: self.style.clone(),
                    message: message.to_string(),
                });
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(self.config.init_timeout_ms));
            }
            std::thread::sleep(self.poll_interval());
        }
    }

    fn eval(&self, script: &str) -> Result<Value> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(|e| Error::CdpError(format!("Evaluation failed: {}", e)))?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms.max(1))
    }
}

/// Page helpers return JSON text; decode it when possible
fn parse_json_string(value: Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

impl Surface for CdpSurface {
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        if viewport == self.viewport {
            return Ok(());
        }
        self.eval(&format!(
            "window.__mapshot.resize({}, {})",
            viewport.width, viewport.height
        ))?;
        self.viewport = viewport;
        Ok(())
    }

    fn set_view(&mut self, view: &MapView, generation: u64) -> Result<ViewOutcome> {
        // Rust prints non-finite floats as NaN/inf, which are not JS literals.
        let number = |v: f64| {
            if v.is_finite() {
                v.to_string()
            } else {
                "NaN".to_string()
            }
        };
        let reply = self.eval(&format!(
            "window.__mapshot.jump({}, {}, {}, {})",
            number(view.center.lon),
            number(view.center.lat),
            number(view.zoom),
            generation
        ))?;
        let reply = parse_json_string(reply);
        if let Some(message) = reply.get("error").and_then(Value::as_str) {
            return Ok(ViewOutcome::Rejected(message.to_string()));
        }
        if reply.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(ViewOutcome::Applied);
        }
        Err(Error::SurfaceError(format!("unexpected jump reply: {}", reply)))
    }

    fn await_idle(&mut self, timeout: Duration) -> Result<IdleOutcome> {
        let started = Instant::now();
        loop {
            let idle = self
                .eval("window.__mapshot.idleGeneration")?
                .as_u64()
                .unwrap_or(0);
            if idle != self.seen_idle {
                self.seen_idle = idle;
                return Ok(IdleOutcome::Idle { generation: idle });
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Ok(IdleOutcome::TimedOut);
            }
            std::thread::sleep(self.poll_interval().min(remaining));
        }
    }

    fn capture(&mut self, format: ImageFormat) -> Result<Vec<u8>> {
        let (format_option, quality) = match format {
            ImageFormat::Png => (Page::CaptureScreenshotFormatOption::Png, None),
            ImageFormat::Jpeg => (
                Page::CaptureScreenshotFormatOption::Jpeg,
                Some(self.config.jpeg_quality.min(100)),
            ),
        };
        let clip = Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.viewport.width as f64,
            height: self.viewport.height as f64,
            scale: 1.0,
        };

        self.tab
            .capture_screenshot(format_option, quality, Some(clip), true)
            .map_err(|e| Error::SurfaceError(format!("Screenshot failed: {}", e)))
    }

    fn close(self) -> Result<()> {
        // Dropping the browser terminates the Chrome child process.
        drop(self.tab);
        drop(self.browser);
        Ok(())
    }
}
