//! mapshot
//!
//! Renders static raster images of a map view on demand. Each named style is
//! bound to one long-lived rendering surface (a headless browser tab running a
//! map library); a render worker owns that surface and serializes every
//! request against it, and a worker pool routes requests to workers by style.
//!
//! # Features
//!
//! - **CDP Backend** (default): surfaces backed by headless Chrome via the
//!   Chrome DevTools Protocol
//! - **Adapter-based surfaces**: the capture protocol only talks to the
//!   [`surface::Surface`] trait, so backends are swappable and testable
//! - **Generation-scoped waits**: a late render from a timed-out request can
//!   never satisfy the next request's wait
//!
//! # Example
//!
//! ```no_run
//! use mapshot::{params, StyleRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = StyleRegistry::load("styles.json")?;
//! let names = registry.names();
//! let request = params::parse("width=512&height=256&center=2.35,48.85&zoom=11", &names);
//! assert_eq!(request.width, 512);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;

pub mod error;
pub use error::{Error, Result};

pub mod gateway;
pub mod page;
pub mod params;
pub mod pool;
pub mod protocol;
pub mod styles;
pub mod surface;
pub mod worker;

// Chrome-backed rendering surfaces
#[cfg(feature = "cdp")]
pub mod cdp;

pub use pool::WorkerPool;
pub use protocol::CaptureProtocol;
pub use styles::{StyleDefinition, StyleRegistry, StyleSource};
pub use surface::{IdleOutcome, Surface, SurfaceFactory, ViewOutcome};
pub use worker::RenderWorker;

#[cfg(feature = "cdp")]
pub use cdp::{CdpSurface, CdpSurfaceFactory};

/// Default image width and height in pixels
pub const DEFAULT_SIZE: i64 = 400;
/// Default zoom level
pub const DEFAULT_ZOOM: f64 = 3.0;
/// Default bound on the await-render step
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Longest await-render bound a client may ask for
pub const MAX_TIMEOUT_MS: u64 = 120_000;

/// Configuration shared by every rendering surface
///
/// The defaults suit a single host serving a handful of styles:
/// - surfaces accept images up to 2048x2048
/// - a surface gets a minute to load its style before startup is aborted
#[derive(Debug, Clone)]
pub struct SurfaceConfig {
    /// Largest viewport a request may ask for; also the browser window size
    pub max_viewport: Viewport,
    /// Time allowed for a surface to load its style at startup
    pub init_timeout_ms: u64,
    /// How often the surface is polled while waiting for a render to settle
    pub poll_interval_ms: u64,
    /// JPEG encoder quality (0-100)
    pub jpeg_quality: u32,
    /// Script URL of the map library loaded by the host page
    pub map_library_url: String,
    /// Stylesheet URL of the map library
    pub map_library_css_url: String,
    /// User agent presented by the browser when fetching tiles and styles
    pub user_agent: String,
    /// Whether the browser runs with its process sandbox
    pub sandbox: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            max_viewport: Viewport {
                width: 2048,
                height: 2048,
            },
            init_timeout_ms: 60_000,
            poll_interval_ms: 10,
            jpeg_quality: 90,
            map_library_url: "https://unpkg.com/maplibre-gl@4.7.1/dist/maplibre-gl.js".to_string(),
            map_library_css_url: "https://unpkg.com/maplibre-gl@4.7.1/dist/maplibre-gl.css"
                .to_string(),
            user_agent: format!("mapshot/{}", env!("CARGO_PKG_VERSION")),
            sandbox: true,
        }
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: DEFAULT_SIZE as u32,
            height: DEFAULT_SIZE as u32,
        }
    }
}

/// A geographic position, longitude first
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LngLat {
    pub lon: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl fmt::Display for LngLat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lon, self.lat)
    }
}

/// The camera state applied to a surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapView {
    pub center: LngLat,
    pub zoom: f64,
}

/// Output encodings a surface can capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
}

impl ImageFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            other => Err(Error::Other(format!("unknown image format '{}'", other))),
        }
    }
}

/// One inbound render call, fully defaulted
///
/// Width and height are signed so that a negative query value survives
/// parsing and is rejected by the capture protocol instead of wrapping.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub width: i64,
    pub height: i64,
    pub center: LngLat,
    pub zoom: f64,
    pub format: ImageFormat,
    pub style: String,
    pub timeout_ms: u64,
}

impl RenderRequest {
    /// A request with every documented default for the given style
    pub fn new(style: impl Into<String>) -> Self {
        Self {
            width: DEFAULT_SIZE,
            height: DEFAULT_SIZE,
            center: LngLat::default(),
            zoom: DEFAULT_ZOOM,
            format: ImageFormat::default(),
            style: style.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn view(&self) -> MapView {
        MapView {
            center: self.center,
            zoom: self.zoom,
        }
    }
}

/// Outcome of a single render
///
/// Produced once per request by the capture protocol and never retained.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureResult {
    /// The surface settled and produced an image
    Success { image: Vec<u8>, format: ImageFormat },
    /// Dimensions, center or zoom were rejected
    ValidationError { message: String },
    /// The surface did not settle within the request's bound
    TimeoutError { elapsed_ms: u64 },
    /// The surface or its worker failed for another reason
    SurfaceError { message: String },
}

impl CaptureResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CaptureResult::Success { .. })
    }

    /// Short label used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureResult::Success { .. } => "success",
            CaptureResult::ValidationError { .. } => "validation_error",
            CaptureResult::TimeoutError { .. } => "timeout",
            CaptureResult::SurfaceError { .. } => "surface_error",
        }
    }
}

impl fmt::Display for CaptureResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureResult::Success { image, format } => {
                write!(f, "{} image, {} bytes", format, image.len())
            }
            CaptureResult::ValidationError { message } => write!(f, "Invalid request: {}", message),
            CaptureResult::TimeoutError { elapsed_ms } => {
                write!(f, "Render did not complete within {}ms", elapsed_ms)
            }
            CaptureResult::SurfaceError { message } => write!(f, "Rendering failed: {}", message),
        }
    }
}
