//! Render worker: one surface, one thread, one render at a time.
//!
//! The worker thread owns the surface outright and pulls commands from an
//! mpsc channel, so requests against one style run strictly in arrival order
//! and a request is finished (captured or failed) before the next one touches
//! the surface. Async callers get their result back over a oneshot channel.

use crate::protocol::CaptureProtocol;
use crate::surface::{Surface, SurfaceFactory};
use crate::{CaptureResult, Error, RenderRequest, Result, StyleDefinition, SurfaceConfig};
use log::{debug, error, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

enum Command {
    Render(RenderRequest, oneshot::Sender<CaptureResult>),
    Close(oneshot::Sender<Result<()>>),
}

/// Counters shared between the worker thread and its handles
#[derive(Debug, Default)]
struct WorkerState {
    busy: AtomicBool,
    queued: AtomicUsize,
    completed: AtomicU64,
}

/// Clears the busy flag however a render exits
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to a worker thread that owns the surface for one style
#[derive(Clone)]
pub struct RenderWorker {
    style_name: String,
    cmd_tx: Sender<Command>,
    state: Arc<WorkerState>,
}

impl std::fmt::Debug for RenderWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderWorker")
            .field("style_name", &self.style_name)
            .field("busy", &self.is_busy())
            .field("queued", &self.queued())
            .finish()
    }
}

impl RenderWorker {
    /// Spawn the worker thread and wait until its surface has loaded `style`.
    ///
    /// Fails with [`Error::SurfaceInitError`] when the factory fails or the
    /// surface is not ready within `config.init_timeout_ms`.
    pub async fn spawn<F: SurfaceFactory>(
        style: StyleDefinition,
        factory: Arc<F>,
        config: &SurfaceConfig,
    ) -> Result<Self> {
        let style_name = style.name.clone();
        let state = Arc::new(WorkerState::default());
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        let thread_state = Arc::clone(&state);
        let max_viewport = config.max_viewport;
        thread::Builder::new()
            .name(format!("render-{}", style_name))
            .spawn(move || {
                let started = Instant::now();
                let mut surface = match factory.create(&style) {
                    Ok(s) => s,
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };

                // The spawner may have given up waiting; nobody will send commands then.
                if init_tx.send(Ok(())).is_err() {
                    warn!(
                        "[{}] surface loaded after the init timeout, discarding it",
                        style.name
                    );
                    close_surface(surface, &style.name);
                    return;
                }
                info!(
                    "[{}] surface ready in {}ms",
                    style.name,
                    started.elapsed().as_millis()
                );

                let mut protocol = CaptureProtocol::new(max_viewport);
                while let Ok(cmd) = cmd_rx.recv() {
                    match cmd {
                        Command::Render(request, resp) => {
                            thread_state.queued.fetch_sub(1, Ordering::SeqCst);
                            let result = {
                                let _busy = BusyGuard::acquire(&thread_state.busy);
                                panic::catch_unwind(AssertUnwindSafe(|| {
                                    protocol.run(&mut surface, &request)
                                }))
                                .unwrap_or_else(|payload| {
                                    let message = panic_message(payload);
                                    error!("[{}] render panicked: {}", style.name, message);
                                    CaptureResult::SurfaceError {
                                        message: format!("render panicked: {}", message),
                                    }
                                })
                            };
                            thread_state.completed.fetch_add(1, Ordering::SeqCst);
                            // The caller may have gone away; the render still counted.
                            let _ = resp.send(result);
                        }
                        Command::Close(resp) => {
                            let closed = surface.close();
                            if let Err(Err(e)) = resp.send(closed) {
                                warn!("[{}] failed to close surface: {}", style.name, e);
                            }
                            return;
                        }
                    }
                }

                debug!("[{}] all handles dropped, closing surface", style.name);
                close_surface(surface, &style.name);
            })
            .map_err(|e| Error::SurfaceInitError {
                style: style_name.clone(),
                message: format!("failed to spawn worker thread: {}", e),
            })?;

        let init_timeout = Duration::from_millis(config.init_timeout_ms);
        let init_res = match tokio::time::timeout(init_timeout, init_rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => Err(Error::Other("worker thread exited during init".into())),
            Err(_) => Err(Error::Timeout(config.init_timeout_ms)),
        };
        init_res.map_err(|e| match e {
            Error::SurfaceInitError { .. } => e,
            other => Error::SurfaceInitError {
                style: style_name.clone(),
                message: other.to_string(),
            },
        })?;

        Ok(Self {
            style_name,
            cmd_tx,
            state,
        })
    }

    pub fn style_name(&self) -> &str {
        &self.style_name
    }

    /// Render `request` on this worker's surface.
    ///
    /// Waits behind any renders already queued on this worker. Never fails:
    /// a dead worker thread is reported as [`CaptureResult::SurfaceError`].
    pub async fn render(&self, request: RenderRequest) -> CaptureResult {
        let (tx, rx) = oneshot::channel();
        self.state.queued.fetch_add(1, Ordering::SeqCst);
        if self.cmd_tx.send(Command::Render(request, tx)).is_err() {
            self.state.queued.fetch_sub(1, Ordering::SeqCst);
            error!("[{}] render sent to a stopped worker", self.style_name);
            return CaptureResult::SurfaceError {
                message: Error::WorkerStopped(self.style_name.clone()).to_string(),
            };
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => {
                error!("[{}] worker dropped a render without answering", self.style_name);
                CaptureResult::SurfaceError {
                    message: Error::WorkerStopped(self.style_name.clone()).to_string(),
                }
            }
        }
    }

    /// Whether a render is executing against the surface right now
    pub fn is_busy(&self) -> bool {
        self.state.busy.load(Ordering::SeqCst)
    }

    /// Renders waiting behind the one in flight
    pub fn queued(&self) -> usize {
        self.state.queued.load(Ordering::SeqCst)
    }

    /// Renders finished since the worker started, whatever their outcome
    pub fn completed(&self) -> u64 {
        self.state.completed.load(Ordering::SeqCst)
    }

    /// Stop the worker thread once queued renders are done and close the surface
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Close(tx))
            .map_err(|_| Error::WorkerStopped(self.style_name.clone()))?;
        rx.await
            .map_err(|_| Error::WorkerStopped(self.style_name.clone()))?
    }
}

fn close_surface<S: Surface>(surface: S, style: &str) {
    if let Err(e) = surface.close() {
        warn!("[{}] failed to close surface: {}", style, e);
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{IdleOutcome, ViewOutcome};
    use crate::{ImageFormat, MapView, StyleSource, Viewport};

    struct InstantSurface {
        generation: u64,
        panics_left: u32,
    }

    impl Surface for InstantSurface {
        fn set_viewport(&mut self, _viewport: Viewport) -> Result<()> {
            Ok(())
        }

        fn set_view(&mut self, _view: &MapView, generation: u64) -> Result<ViewOutcome> {
            if self.panics_left > 0 {
                self.panics_left -= 1;
                panic!("map library crashed");
            }
            self.generation = generation;
            Ok(ViewOutcome::Applied)
        }

        fn await_idle(&mut self, _timeout: Duration) -> Result<IdleOutcome> {
            Ok(IdleOutcome::Idle {
                generation: self.generation,
            })
        }

        fn capture(&mut self, _format: ImageFormat) -> Result<Vec<u8>> {
            Ok(vec![0x89, b'P', b'N', b'G'])
        }
    }

    struct InstantFactory {
        fail: bool,
        delay: Duration,
        panics: u32,
    }

    impl SurfaceFactory for InstantFactory {
        type Surface = InstantSurface;

        fn create(&self, style: &StyleDefinition) -> Result<InstantSurface> {
            thread::sleep(self.delay);
            if self.fail {
                return Err(Error::SurfaceInitError {
                    style: style.name.clone(),
                    message: "style 404".into(),
                });
            }
            Ok(InstantSurface {
                generation: 0,
                panics_left: self.panics,
            })
        }
    }

    fn style() -> StyleDefinition {
        StyleDefinition {
            name: "default".into(),
            source: StyleSource::Url("http://localhost/style.json".into()),
            attribution: String::new(),
        }
    }

    fn factory(fail: bool, delay_ms: u64) -> Arc<InstantFactory> {
        Arc::new(InstantFactory {
            fail,
            delay: Duration::from_millis(delay_ms),
            panics: 0,
        })
    }

    #[tokio::test]
    async fn renders_and_counts() {
        let worker = RenderWorker::spawn(style(), factory(false, 0), &SurfaceConfig::default())
            .await
            .unwrap();
        let result = worker.render(RenderRequest::new("default")).await;
        assert!(result.is_success());
        assert_eq!(worker.completed(), 1);
        assert!(!worker.is_busy());
        assert_eq!(worker.queued(), 0);
        worker.close().await.unwrap();
    }

    #[tokio::test]
    async fn factory_failure_is_an_init_error() {
        let err = RenderWorker::spawn(style(), factory(true, 0), &SurfaceConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SurfaceInitError { style, .. } if style == "default"));
    }

    #[tokio::test]
    async fn slow_surface_hits_init_timeout() {
        let config = SurfaceConfig {
            init_timeout_ms: 20,
            ..Default::default()
        };
        let err = RenderWorker::spawn(style(), factory(false, 300), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SurfaceInitError { message, .. } if message.contains("timed out")));
    }

    #[tokio::test]
    async fn closed_worker_reports_surface_error() {
        let worker = RenderWorker::spawn(style(), factory(false, 0), &SurfaceConfig::default())
            .await
            .unwrap();
        worker.close().await.unwrap();
        let result = worker.render(RenderRequest::new("default")).await;
        assert!(matches!(result, CaptureResult::SurfaceError { message } if message.contains("stopped")));
    }

    #[tokio::test]
    async fn panicking_render_keeps_the_worker_alive() {
        let factory = Arc::new(InstantFactory {
            fail: false,
            delay: Duration::ZERO,
            panics: 1,
        });
        let worker = RenderWorker::spawn(style(), factory, &SurfaceConfig::default())
            .await
            .unwrap();

        let first = worker.render(RenderRequest::new("default")).await;
        assert!(
            matches!(&first, CaptureResult::SurfaceError { message } if message.contains("map library crashed")),
            "got {:?}",
            first
        );
        assert!(!worker.is_busy());

        for _ in 0..2 {
            assert!(worker.render(RenderRequest::new("default")).await.is_success());
        }
        assert_eq!(worker.completed(), 3);
        worker.close().await.unwrap();
    }
}
