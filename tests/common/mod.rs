//! Scripted rendering surface shared by the integration tests.
//!
//! The fake records every adapter call, schedules idle signals per
//! generation (so a timed-out render can deliver its signal late), rejects
//! out-of-range coordinates like a map library would, and embeds the view it
//! captured in the image bytes.

#![allow(dead_code)]

use mapshot::{
    Error, IdleOutcome, ImageFormat, MapView, Result, StyleDefinition, StyleRegistry, StyleSource,
    Surface, SurfaceConfig, SurfaceFactory, ViewOutcome, Viewport, WorkerPool,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
pub const JPEG_SIGNATURE: &[u8] = &[0xff, 0xd8, 0xff];

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Viewport { style: String, width: u32, height: u32 },
    View { style: String, generation: u64, zoom: f64 },
    Capture { style: String, format: ImageFormat },
}

impl Call {
    pub fn style(&self) -> &str {
        match self {
            Call::Viewport { style, .. } | Call::View { style, .. } | Call::Capture { style, .. } => style,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Time `create` takes
    pub init_delay: Duration,
    /// Styles whose surface fails to load
    pub failing_styles: Vec<String>,
    /// Delay between a jump and its idle signal
    pub idle_delay: Duration,
    /// Per-generation override; `None` means that jump never settles
    pub idle_overrides: HashMap<u64, Option<Duration>>,
    /// Time `capture` takes
    pub capture_delay: Duration,
    /// Generations whose wait fails with a surface error
    pub idle_errors: Vec<u64>,
}

pub struct FakeFactory {
    behavior: Behavior,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl FakeFactory {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, style: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.style() == style)
            .collect()
    }
}

impl SurfaceFactory for FakeFactory {
    type Surface = FakeSurface;

    fn create(&self, style: &StyleDefinition) -> Result<FakeSurface> {
        std::thread::sleep(self.behavior.init_delay);
        if self.behavior.failing_styles.contains(&style.name) {
            return Err(Error::SurfaceInitError {
                style: style.name.clone(),
                message: "style document returned 404".into(),
            });
        }
        Ok(FakeSurface {
            style: style.name.clone(),
            behavior: self.behavior.clone(),
            calls: Arc::clone(&self.calls),
            pending: VecDeque::new(),
            view: None,
            viewport: Viewport::default(),
            generation: 0,
        })
    }
}

pub struct FakeSurface {
    style: String,
    behavior: Behavior,
    calls: Arc<Mutex<Vec<Call>>>,
    // Scheduled idle signals, oldest first
    pending: VecDeque<(Instant, u64)>,
    view: Option<MapView>,
    viewport: Viewport,
    generation: u64,
}

impl Surface for FakeSurface {
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Viewport {
            style: self.style.clone(),
            width: viewport.width,
            height: viewport.height,
        });
        self.viewport = viewport;
        Ok(())
    }

    fn set_view(&mut self, view: &MapView, generation: u64) -> Result<ViewOutcome> {
        if view.center.lat.abs() > 90.0 || view.center.lon.abs() > 180.0 {
            return Ok(ViewOutcome::Rejected(format!(
                "Invalid LngLat object: ({}, {})",
                view.center.lon, view.center.lat
            )));
        }
        if !(0.0..=24.0).contains(&view.zoom) {
            return Ok(ViewOutcome::Rejected(format!("Invalid zoom {}", view.zoom)));
        }

        self.calls.lock().unwrap().push(Call::View {
            style: self.style.clone(),
            generation,
            zoom: view.zoom,
        });
        self.view = Some(*view);
        self.generation = generation;
        if self.behavior.idle_errors.contains(&generation) {
            return Ok(ViewOutcome::Applied);
        }

        let delay = match self.behavior.idle_overrides.get(&generation) {
            Some(d) => *d,
            None => Some(self.behavior.idle_delay),
        };
        if let Some(delay) = delay {
            self.pending.push_back((Instant::now() + delay, generation));
        }
        Ok(ViewOutcome::Applied)
    }

    fn await_idle(&mut self, timeout: Duration) -> Result<IdleOutcome> {
        if self.behavior.idle_errors.contains(&self.generation) {
            return Err(Error::SurfaceError("page crashed".into()));
        }
        let deadline = Instant::now() + timeout;
        if let Some(&(at, generation)) = self.pending.front() {
            if at <= deadline {
                std::thread::sleep(at.saturating_duration_since(Instant::now()));
                self.pending.pop_front();
                return Ok(IdleOutcome::Idle { generation });
            }
        }
        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
        Ok(IdleOutcome::TimedOut)
    }

    fn capture(&mut self, format: ImageFormat) -> Result<Vec<u8>> {
        std::thread::sleep(self.behavior.capture_delay);
        self.calls.lock().unwrap().push(Call::Capture {
            style: self.style.clone(),
            format,
        });
        let view = self
            .view
            .ok_or_else(|| Error::SurfaceError("capture before any view".into()))?;
        let mut image = match format {
            ImageFormat::Png => PNG_SIGNATURE.to_vec(),
            ImageFormat::Jpeg => JPEG_SIGNATURE.to_vec(),
        };
        image.extend_from_slice(
            format!(
                "{}|{},{}|{}|{}x{}",
                self.style,
                view.center.lon,
                view.center.lat,
                view.zoom,
                self.viewport.width,
                self.viewport.height
            )
            .as_bytes(),
        );
        Ok(image)
    }
}

/// The view a fake capture was taken at: `style|lon,lat|zoom|WxH`
pub fn marker(image: &[u8]) -> String {
    let body = image
        .strip_prefix(PNG_SIGNATURE)
        .or_else(|| image.strip_prefix(JPEG_SIGNATURE))
        .unwrap_or(image);
    String::from_utf8_lossy(body).into_owned()
}

pub fn url_style(name: &str) -> StyleDefinition {
    StyleDefinition {
        name: name.to_string(),
        source: StyleSource::Url(format!("http://styles.test/{}/style.json", name)),
        attribution: format!("{} contributors", name),
    }
}

pub fn registry(names: &[&str]) -> StyleRegistry {
    StyleRegistry::new(names.iter().map(|n| url_style(n)).collect(), ImageFormat::Png)
        .expect("valid registry")
}

pub fn test_config() -> SurfaceConfig {
    SurfaceConfig {
        max_viewport: Viewport {
            width: 1024,
            height: 1024,
        },
        init_timeout_ms: 2_000,
        ..Default::default()
    }
}

pub async fn pool_with(names: &[&str], behavior: Behavior) -> (WorkerPool, Arc<FakeFactory>) {
    let factory = Arc::new(FakeFactory::new(behavior));
    let pool = WorkerPool::initialize(&registry(names), Arc::clone(&factory), &test_config())
        .await
        .expect("pool starts");
    (pool, factory)
}
