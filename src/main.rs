use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use mapshot::gateway::{self, AppState};
use mapshot::params::RequestParser;
use mapshot::{CdpSurfaceFactory, StyleRegistry, SurfaceConfig, Viewport, WorkerPool};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "mapshot")]
#[command(about = "Render static map images over HTTP with headless browser surfaces")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Interface to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Style list (JSON)
    #[arg(short, long, env = "MAPSHOT_STYLES", default_value = "styles.json")]
    styles: String,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Time each surface gets to load its style
    #[arg(long, default_value_t = 60_000)]
    init_timeout_ms: u64,

    /// Longest render timeout a request may ask for
    #[arg(long, env = "MAPSHOT_MAX_TIMEOUT_MS", default_value_t = mapshot::MAX_TIMEOUT_MS)]
    max_timeout_ms: u64,

    /// Largest width or height a request may ask for
    #[arg(long, default_value_t = 2048)]
    max_dimension: u32,

    /// Map library script URL
    #[arg(long)]
    map_library_url: Option<String>,

    /// Map library stylesheet URL
    #[arg(long)]
    map_library_css_url: Option<String>,

    /// Run Chrome without its sandbox (needed in some containers)
    #[arg(long)]
    no_sandbox: bool,
}

impl Args {
    fn surface_config(&self) -> SurfaceConfig {
        let defaults = SurfaceConfig::default();
        SurfaceConfig {
            max_viewport: Viewport {
                width: self.max_dimension,
                height: self.max_dimension,
            },
            init_timeout_ms: self.init_timeout_ms,
            map_library_url: self
                .map_library_url
                .clone()
                .unwrap_or(defaults.map_library_url.clone()),
            map_library_css_url: self
                .map_library_css_url
                .clone()
                .unwrap_or(defaults.map_library_css_url.clone()),
            sandbox: !self.no_sandbox,
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let registry = StyleRegistry::load(&args.styles)
        .with_context(|| format!("loading style list {}", args.styles))?;
    info!("Loaded {} styles: {}", registry.len(), registry.names().join(", "));

    let config = args.surface_config();
    let factory = Arc::new(CdpSurfaceFactory::new(config.clone()));
    let pool = WorkerPool::initialize(&registry, factory, &config)
        .await
        .context("starting render workers")?;

    let parser = RequestParser::from_registry(&registry).with_max_timeout(args.max_timeout_ms);
    let state = Arc::new(AppState::new(pool, registry).with_parser(parser));
    let app = gateway::router(Arc::clone(&state));

    // Bound only now: no request is accepted before every worker is ready.
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("-----");
    info!("Site served on http://localhost:{}", args.port);
    info!("-----");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down render workers");
    match Arc::try_unwrap(state) {
        Ok(state) => state.pool.shutdown().await?,
        Err(_) => error!("Server state still shared at shutdown; leaving workers to exit"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
