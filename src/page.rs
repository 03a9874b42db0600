//! Host page loaded into each browser surface.
//!
//! The page creates one map bound to the style and exposes a small control
//! object on `window.__mapshot`:
//!
//! - `ready` / `error`: set once the style finished (or failed) loading
//! - `generation`: tag of the last applied camera jump
//! - `idleGeneration`: value of `generation` when the map last went idle
//! - `resize(w, h)` and `jump(lon, lat, zoom, generation)`
//!
//! `jump` catches the map library's exception for invalid coordinates and
//! returns it as a JSON value instead of letting it escape.

use crate::{StyleDefinition, SurfaceConfig};
use base64::Engine as Base64Engine;

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{TITLE}}</title>
<link rel="stylesheet" href="{{CSS_URL}}">
<style>
  html, body { margin: 0; padding: 0; overflow: hidden; background: transparent; }
  #map { position: absolute; top: 0; left: 0; width: 400px; height: 400px; }
</style>
</head>
<body>
<div id="map"></div>
<script src="{{SCRIPT_URL}}"></script>
<script>
(function () {
  const state = { ready: false, error: null, generation: 0, idleGeneration: 0 };
  window.__mapshot = state;
  if (typeof maplibregl === 'undefined') {
    state.error = 'map library failed to load';
    return;
  }
  const container = document.getElementById('map');
  let map;
  try {
    map = new maplibregl.Map({
      container: container,
      style: {{STYLE}},
      center: [0, 0],
      zoom: 3,
      interactive: false,
      attributionControl: false,
      preserveDrawingBuffer: true,
      fadeDuration: 0
    });
  } catch (e) {
    state.error = String(e && e.message || e);
    return;
  }
  map.on('load', function () { state.ready = true; });
  map.on('error', function (e) {
    if (!state.ready) { state.error = String(e && e.error && e.error.message || 'style failed to load'); }
  });
  map.on('idle', function () { state.idleGeneration = state.generation; });
  state.resize = function (width, height) {
    container.style.width = width + 'px';
    container.style.height = height + 'px';
    map.resize();
    return true;
  };
  state.jump = function (lon, lat, zoom, generation) {
    try {
      map.jumpTo({ center: [lon, lat], zoom: zoom });
    } catch (e) {
      return JSON.stringify({ error: String(e && e.message || e) });
    }
    state.generation = generation;
    map.triggerRepaint();
    return JSON.stringify({ ok: true });
  };
})();
</script>
</body>
</html>
"#;

/// HTML hosting the map for `style`
pub fn map_page_html(style: &StyleDefinition, config: &SurfaceConfig) -> String {
    // A "</script>" inside the style JSON would end the inline script early.
    let style_json = style.style_document().to_string().replace("</", "<\\/");
    PAGE_TEMPLATE
        .replace("{{TITLE}}", &escape_html(&style.name))
        .replace("{{CSS_URL}}", &escape_html(&config.map_library_css_url))
        .replace("{{SCRIPT_URL}}", &escape_html(&config.map_library_url))
        .replace("{{STYLE}}", &style_json)
}

/// Wrap a document in a base64 `data:` URL a tab can navigate to
pub fn data_url(html: &str) -> String {
    format!(
        "data:text/html;charset=utf-8;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(html)
    )
}

/// Minimal escaping for text and attribute values
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
