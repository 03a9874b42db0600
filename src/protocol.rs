//! Capture protocol: configure, mutate, await, capture.
//!
//! Run once per request against a single surface by the worker that owns it.
//! Every exit is a [`CaptureResult`]; surface errors are folded into
//! [`CaptureResult::SurfaceError`] so the caller always gets a value back.

use crate::surface::{IdleOutcome, Surface, ViewOutcome};
use crate::{CaptureResult, RenderRequest, Viewport};
use log::{debug, error, warn};
use std::time::{Duration, Instant};

/// Protocol state for one surface.
///
/// `generation` increases on every camera mutation and tags the idle signal
/// that mutation is waiting for.
#[derive(Debug, Clone)]
pub struct CaptureProtocol {
    generation: u64,
    max_viewport: Viewport,
}

impl CaptureProtocol {
    pub fn new(max_viewport: Viewport) -> Self {
        Self {
            generation: 0,
            max_viewport,
        }
    }

    /// Generation of the most recent camera mutation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Execute the protocol for `request` against `surface`
    pub fn run<S: Surface>(&mut self, surface: &mut S, request: &RenderRequest) -> CaptureResult {
        let viewport = match self.validate_size(request) {
            Ok(v) => v,
            Err(message) => return CaptureResult::ValidationError { message },
        };

        if let Err(e) = surface.set_viewport(viewport) {
            error!("[{}] set_viewport failed: {}", request.style, e);
            return CaptureResult::SurfaceError {
                message: e.to_string(),
            };
        }

        self.generation += 1;
        let generation = self.generation;
        let view = request.view();
        debug!(
            "[{}] gen {}: jump to {} z{}",
            request.style, generation, view.center, view.zoom
        );

        match surface.set_view(&view, generation) {
            Ok(ViewOutcome::Applied) => {}
            Ok(ViewOutcome::Rejected(message)) => {
                debug!("[{}] gen {}: view rejected: {}", request.style, generation, message);
                return CaptureResult::ValidationError { message };
            }
            Err(e) => {
                error!("[{}] set_view failed: {}", request.style, e);
                return CaptureResult::SurfaceError {
                    message: e.to_string(),
                };
            }
        }

        if let Some(result) = self.await_render(surface, request, generation) {
            return result;
        }

        match surface.capture(request.format) {
            Ok(image) if image.is_empty() => CaptureResult::SurfaceError {
                message: "surface returned an empty image".into(),
            },
            Ok(image) => {
                debug!(
                    "[{}] gen {}: captured {} bytes of {}",
                    request.style,
                    generation,
                    image.len(),
                    request.format
                );
                CaptureResult::Success {
                    image,
                    format: request.format,
                }
            }
            Err(e) => {
                error!("[{}] capture failed: {}", request.style, e);
                CaptureResult::SurfaceError {
                    message: e.to_string(),
                }
            }
        }
    }

    fn validate_size(&self, request: &RenderRequest) -> std::result::Result<Viewport, String> {
        let max = self.max_viewport;
        if request.width <= 0 || request.height <= 0 {
            return Err(format!(
                "width and height must be positive, got {}x{}",
                request.width, request.height
            ));
        }
        if request.width > max.width as i64 || request.height > max.height as i64 {
            return Err(format!(
                "requested {}x{} exceeds the maximum of {}x{}",
                request.width, request.height, max.width, max.height
            ));
        }
        Ok(Viewport {
            width: request.width as u32,
            height: request.height as u32,
        })
    }

    /// Wait for the idle signal of `generation`. Returns a terminal result
    /// when the render must not be captured.
    fn await_render<S: Surface>(
        &self,
        surface: &mut S,
        request: &RenderRequest,
        generation: u64,
    ) -> Option<CaptureResult> {
        let timeout = Duration::from_millis(request.timeout_ms);
        let started = Instant::now();

        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            match surface.await_idle(remaining) {
                Ok(IdleOutcome::Idle { generation: signaled }) if signaled >= generation => {
                    return None;
                }
                Ok(IdleOutcome::Idle { generation: signaled }) => {
                    warn!(
                        "[{}] discarding stale idle signal of gen {} while waiting for gen {}",
                        request.style, signaled, generation
                    );
                }
                Ok(IdleOutcome::TimedOut) => break,
                Err(e) => {
                    error!("[{}] await_idle failed: {}", request.style, e);
                    return Some(CaptureResult::SurfaceError {
                        message: e.to_string(),
                    });
                }
            }
        }

        warn!(
            "[{}] gen {}: render did not settle within {}ms",
            request.style, generation, request.timeout_ms
        );
        Some(CaptureResult::TimeoutError {
            elapsed_ms: request.timeout_ms,
        })
    }
}
