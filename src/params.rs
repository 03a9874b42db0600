//! Query string to [`RenderRequest`] decoding.
//!
//! Parsing is deliberately lenient: a missing or unparsable value is replaced
//! by its default and never reported to the caller. Invalid values that do
//! parse (a negative width, a latitude of 120) are left for the capture
//! protocol and the surface to reject.

use crate::{
    ImageFormat, LngLat, RenderRequest, StyleRegistry, DEFAULT_SIZE, DEFAULT_TIMEOUT_MS,
    DEFAULT_ZOOM, MAX_TIMEOUT_MS,
};
use std::str::FromStr;
use url::form_urlencoded;

/// Decodes queries against a fixed set of style names
#[derive(Debug, Clone)]
pub struct RequestParser {
    style_names: Vec<String>,
    default_format: ImageFormat,
    default_timeout_ms: u64,
    max_timeout_ms: u64,
}

impl RequestParser {
    pub fn new(style_names: Vec<String>, default_format: ImageFormat) -> Self {
        Self {
            style_names,
            default_format,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_timeout_ms: MAX_TIMEOUT_MS,
        }
    }

    pub fn from_registry(registry: &StyleRegistry) -> Self {
        Self::new(registry.names(), registry.default_format())
    }

    pub fn with_default_timeout(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Cap on the `timeout` a client may request
    pub fn with_max_timeout(mut self, timeout_ms: u64) -> Self {
        self.max_timeout_ms = timeout_ms;
        self
    }

    pub fn style_names(&self) -> &[String] {
        &self.style_names
    }

    /// Decode a raw query string (without the leading `?`)
    pub fn parse(&self, raw_query: &str) -> RenderRequest {
        let mut request = RenderRequest::new(self.default_style());
        request.format = self.default_format;
        request.timeout_ms = self.default_timeout_ms;

        for (key, value) in form_urlencoded::parse(raw_query.as_bytes()) {
            let value = value.trim();
            match key.as_ref() {
                "width" => request.width = parse_or(value, DEFAULT_SIZE),
                "height" => request.height = parse_or(value, DEFAULT_SIZE),
                "zoom" => request.zoom = parse_f64_or(value, DEFAULT_ZOOM),
                "center" => request.center = parse_center(value).unwrap_or_default(),
                "type" | "format" => {
                    request.format = ImageFormat::from_str(value).unwrap_or(self.default_format)
                }
                "style" => request.style = self.resolve_style(value),
                "timeout" => request.timeout_ms = parse_or(value, self.default_timeout_ms),
                _ => {}
            }
        }
        request.timeout_ms = request.timeout_ms.min(self.max_timeout_ms);

        request
    }

    fn default_style(&self) -> String {
        self.style_names.first().cloned().unwrap_or_default()
    }

    fn resolve_style(&self, name: &str) -> String {
        if self.style_names.iter().any(|s| s == name) {
            name.to_string()
        } else {
            self.default_style()
        }
    }
}

/// Decode `raw_query` with PNG as the default format
pub fn parse(raw_query: &str, known_style_names: &[String]) -> RenderRequest {
    RequestParser::new(known_style_names.to_vec(), ImageFormat::Png).parse(raw_query)
}

fn parse_or<T: FromStr>(value: &str, default: T) -> T {
    value.parse().unwrap_or(default)
}

fn parse_f64_or(value: &str, default: f64) -> f64 {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => default,
    }
}

/// `"lon,lat"`; anything else is `None`
fn parse_center(value: &str) -> Option<LngLat> {
    let (lon, lat) = value.split_once(',')?;
    let lon = lon.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
    let lat = lat.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(LngLat::new(lon, lat))
}

impl RenderRequest {
    /// Encode every field as a query string that [`RequestParser::parse`]
    /// decodes back to this request
    pub fn to_query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .append_pair("width", &self.width.to_string())
            .append_pair("height", &self.height.to_string())
            .append_pair("zoom", &self.zoom.to_string())
            .append_pair("center", &self.center.to_string())
            .append_pair("type", self.format.as_str())
            .append_pair("style", &self.style)
            .append_pair("timeout", &self.timeout_ms.to_string())
            .finish()
    }
}
