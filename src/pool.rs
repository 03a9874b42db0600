//! Worker pool: one render worker per registered style.
//!
//! Built once at startup, all or nothing, and never re-pointed afterwards, so
//! lookups need no synchronization. Requests for different styles run in
//! parallel on their own workers.

use crate::surface::SurfaceFactory;
use crate::worker::RenderWorker;
use crate::{CaptureResult, RenderRequest, Result, StyleRegistry, SurfaceConfig};
use futures::future::try_join_all;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<RenderWorker>,
    index: HashMap<String, usize>,
}

impl WorkerPool {
    /// Start a worker for every style in `registry`.
    ///
    /// Surfaces load concurrently. If any of them fails the whole pool fails
    /// and the workers that did start are dropped, which stops their threads.
    pub async fn initialize<F: SurfaceFactory>(
        registry: &StyleRegistry,
        factory: Arc<F>,
        config: &SurfaceConfig,
    ) -> Result<Self> {
        info!("Starting {} render workers", registry.len());
        let workers = try_join_all(
            registry
                .styles()
                .iter()
                .map(|style| RenderWorker::spawn(style.clone(), Arc::clone(&factory), config)),
        )
        .await?;

        let index = workers
            .iter()
            .enumerate()
            .map(|(i, w)| (w.style_name().to_string(), i))
            .collect();
        info!("All render workers ready");

        Ok(Self { workers, index })
    }

    /// Worker for `style_name`, or the first registered style's worker when
    /// the name is unknown
    pub fn select(&self, style_name: &str) -> &RenderWorker {
        match self.index.get(style_name) {
            Some(&i) => &self.workers[i],
            None => {
                let fallback = self.default_worker();
                warn!(
                    "Unknown style '{}', falling back to '{}'",
                    style_name,
                    fallback.style_name()
                );
                fallback
            }
        }
    }

    /// Route `request` to its style's worker and render it
    pub async fn render(&self, request: RenderRequest) -> CaptureResult {
        self.select(&request.style).render(request).await
    }

    pub fn default_worker(&self) -> &RenderWorker {
        // A registry is never empty, so neither is the pool.
        &self.workers[0]
    }

    pub fn default_style(&self) -> &str {
        self.default_worker().style_name()
    }

    /// Style names in registration order
    pub fn style_names(&self) -> Vec<String> {
        self.workers
            .iter()
            .map(|w| w.style_name().to_string())
            .collect()
    }

    pub fn workers(&self) -> &[RenderWorker] {
        &self.workers
    }

    pub fn contains(&self, style_name: &str) -> bool {
        self.index.contains_key(style_name)
    }

    /// Close every worker after its queued renders finish
    pub async fn shutdown(self) -> Result<()> {
        let mut first_err = None;
        for worker in &self.workers {
            if let Err(e) = worker.close().await {
                warn!("[{}] close failed: {}", worker.style_name(), e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
