//! HTTP gateway over the worker pool.
//!
//! - `GET /` lists the available styles
//! - `GET /map?width=&height=&zoom=&center=lon,lat&type=&style=&timeout=`
//!   returns the rendered image
//! - `GET /health` answers `OK`
//!
//! With a single registered style every other path renders as well, so
//! `/anything?zoom=5` works like the map endpoint.

use crate::page::escape_html;
use crate::params::RequestParser;
use crate::{CaptureResult, StyleRegistry, WorkerPool};
use axum::extract::{RawQuery, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use log::info;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;

/// Everything a request handler needs; built after the pool is ready
pub struct AppState {
    pub pool: WorkerPool,
    pub registry: StyleRegistry,
    pub parser: RequestParser,
}

impl AppState {
    pub fn new(pool: WorkerPool, registry: StyleRegistry) -> Self {
        let parser = RequestParser::from_registry(&registry);
        Self {
            pool,
            registry,
            parser,
        }
    }

    /// Replace the request parser, e.g. to change the timeout cap
    pub fn with_parser(mut self, parser: RequestParser) -> Self {
        self.parser = parser;
        self
    }
}

/// Build the router. The catch-all map route only exists for single-style
/// deployments.
pub fn router(state: Arc<AppState>) -> Router {
    let single_style = state.registry.len() == 1;

    let mut app = Router::new()
        .route("/", get(index_handler))
        .route("/map", get(map_handler))
        .route("/health", get(health_handler));
    if single_style {
        app = app.fallback(get(map_handler));
    }

    app.layer(middleware::from_fn(log_request))
        .with_state(state)
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    info!(
        "{} {} -> {} ({}ms)",
        method,
        uri,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

pub async fn map_handler(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Response {
    let request = state.parser.parse(query.as_deref().unwrap_or(""));
    capture_response(state.pool.render(request).await)
}

/// Map a render outcome onto an HTTP response
pub fn capture_response(result: CaptureResult) -> Response {
    match result {
        CaptureResult::Success { image, format } => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, format.content_type())],
            image,
        )
            .into_response(),
        failure @ (CaptureResult::ValidationError { .. } | CaptureResult::TimeoutError { .. }) => {
            (StatusCode::BAD_REQUEST, failure.to_string()).into_response()
        }
        failure @ CaptureResult::SurfaceError { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, failure.to_string()).into_response()
        }
    }
}

pub async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    let mut body = String::from(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>mapshot</title></head>\n<body>\n<h1>Available styles</h1>\n<ul>\n",
    );
    for style in state.registry.styles() {
        let name = escape_html(&style.name);
        let href = format!(
            "/map?{}",
            url::form_urlencoded::Serializer::new(String::new())
                .append_pair("style", &style.name)
                .finish()
        );
        let _ = write!(
            body,
            "<li><a href=\"{}\">{}</a>",
            escape_html(&href),
            name
        );
        if !style.attribution.is_empty() {
            let _ = write!(body, " <small>{}</small>", escape_html(&style.attribution));
        }
        body.push_str("</li>\n");
    }
    body.push_str(
        "</ul>\n<p>Parameters: width, height, zoom, center=lon,lat, type=png|jpeg, style, timeout (ms)</p>\n</body>\n</html>\n",
    );
    Html(body)
}

pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
