//! Rendering surface adapter interface.
//!
//! A surface is an opaque, stateful rendering capability bound to one style:
//! it accepts viewport and camera mutations, signals when rendering has
//! settled and emits a raster image of its current content. The capture
//! protocol drives surfaces exclusively through [`Surface`]; backends such as
//! [`crate::cdp::CdpSurface`] implement it.

use crate::{ImageFormat, MapView, Result, StyleDefinition, Viewport};
use std::time::Duration;

/// Result of asking a surface to move its camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewOutcome {
    /// The view was applied and a render is under way
    Applied,
    /// The surface refused the view (invalid center or zoom)
    Rejected(String),
}

/// Result of waiting for a surface to settle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The surface went idle while `generation` was its current view.
    ///
    /// Surfaces may report signals belonging to an earlier generation (for
    /// example a render that completed after its request timed out); callers
    /// compare the generation before trusting the signal.
    Idle { generation: u64 },
    /// No idle signal arrived within the wait
    TimedOut,
}

/// A single rendering surface.
///
/// Surfaces are owned by exactly one worker thread and are never shared, so
/// implementations need not be `Send` or `Sync`.
pub trait Surface {
    /// Resize the drawable area
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()>;

    /// Jump the camera to `view`, tagging the resulting render with
    /// `generation`. Invalid coordinates come back as
    /// [`ViewOutcome::Rejected`], not as an error.
    fn set_view(&mut self, view: &MapView, generation: u64) -> Result<ViewOutcome>;

    /// Block until the surface reports an idle signal or `timeout` elapses
    fn await_idle(&mut self, timeout: Duration) -> Result<IdleOutcome>;

    /// Encode the current content of the viewport
    fn capture(&mut self, format: ImageFormat) -> Result<Vec<u8>>;

    /// Release the surface and any process behind it
    fn close(self) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Creates surfaces on the worker threads that will own them.
///
/// `create` returns only once the style has finished loading; it may take
/// seconds.
pub trait SurfaceFactory: Send + Sync + 'static {
    type Surface: Surface;

    fn create(&self, style: &StyleDefinition) -> Result<Self::Surface>;
}
