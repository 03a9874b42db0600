//! Style registry: the named visual styles served by the pool.
//!
//! Loaded once at startup from a JSON style list and read-only afterwards.
//! The list is either a bare array of entries or an object carrying a default
//! output format next to the entries:
//!
//! ```json
//! {
//!   "defaultFormat": "png",
//!   "styles": [
//!     { "name": "osm", "attribution": "© OpenStreetMap contributors",
//!       "rasterTiles": ["https://tile.openstreetmap.org/{z}/{x}/{y}.png"],
//!       "tileSize": 256, "maxzoom": 19 },
//!     { "name": "streets", "styleUrl": "https://example.com/streets/style.json" }
//!   ]
//! }
//! ```

use crate::{Error, ImageFormat, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;

const DEFAULT_TILE_SIZE: u32 = 256;
const DEFAULT_MIN_ZOOM: f64 = 0.0;
const DEFAULT_MAX_ZOOM: f64 = 22.0;

/// Where a style's visual definition comes from
#[derive(Debug, Clone, PartialEq)]
pub enum StyleSource {
    /// A complete style document
    Inline(Value),
    /// A style document fetched by the surface
    Url(String),
    /// A raster tile template expanded into a single-layer style
    RasterTiles {
        urls: Vec<String>,
        tile_size: u32,
        min_zoom: f64,
        max_zoom: f64,
    },
}

/// A named style, immutable once loaded
#[derive(Debug, Clone, PartialEq)]
pub struct StyleDefinition {
    pub name: String,
    pub source: StyleSource,
    pub attribution: String,
}

impl StyleDefinition {
    /// The value handed to the map library's `style` option.
    ///
    /// Inline documents pass through, URLs become a JSON string, and raster
    /// templates become a version 8 style with one raster source and layer.
    pub fn style_document(&self) -> Value {
        match &self.source {
            StyleSource::Inline(doc) => doc.clone(),
            StyleSource::Url(url) => Value::String(url.clone()),
            StyleSource::RasterTiles {
                urls,
                tile_size,
                min_zoom,
                max_zoom,
            } => json!({
                "version": 8,
                "sources": {
                    "raster-tiles": {
                        "type": "raster",
                        "tiles": urls,
                        "tileSize": tile_size,
                        "minzoom": min_zoom,
                        "maxzoom": max_zoom,
                        "attribution": self.attribution,
                    }
                },
                "layers": [{
                    "id": "raster-tiles",
                    "type": "raster",
                    "source": "raster-tiles",
                }]
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StyleListDocument {
    List(Vec<StyleEntry>),
    Document {
        #[serde(default, alias = "default_format", rename = "defaultFormat")]
        default_format: Option<ImageFormat>,
        styles: Vec<StyleEntry>,
    },
}

#[derive(Debug, Deserialize)]
struct StyleEntry {
    name: String,
    #[serde(default)]
    attribution: String,
    #[serde(default)]
    style: Option<Value>,
    #[serde(default, rename = "styleUrl", alias = "style_url")]
    style_url: Option<String>,
    #[serde(default, rename = "rasterTiles", alias = "raster_tiles")]
    raster_tiles: Option<Vec<String>>,
    #[serde(default, rename = "tileSize", alias = "tile_size")]
    tile_size: Option<u32>,
    #[serde(default, alias = "minZoom")]
    minzoom: Option<f64>,
    #[serde(default, alias = "maxZoom")]
    maxzoom: Option<f64>,
}

impl StyleEntry {
    fn into_definition(self) -> Result<StyleDefinition> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::ConfigError("style entry without a name".into()));
        }

        let given = [
            self.style.is_some(),
            self.style_url.is_some(),
            self.raster_tiles.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if given != 1 {
            return Err(Error::ConfigError(format!(
                "style '{}' must set exactly one of style, styleUrl or rasterTiles",
                name
            )));
        }

        let source = if let Some(doc) = self.style {
            if !doc.is_object() {
                return Err(Error::ConfigError(format!(
                    "style '{}': inline style must be a JSON object",
                    name
                )));
            }
            StyleSource::Inline(doc)
        } else if let Some(url) = self.style_url {
            StyleSource::Url(url)
        } else {
            let urls = self.raster_tiles.unwrap_or_default();
            if urls.is_empty() {
                return Err(Error::ConfigError(format!(
                    "style '{}': rasterTiles is empty",
                    name
                )));
            }
            let tile_size = self.tile_size.unwrap_or(DEFAULT_TILE_SIZE);
            if tile_size == 0 {
                return Err(Error::ConfigError(format!(
                    "style '{}': tileSize must be positive",
                    name
                )));
            }
            let min_zoom = self.minzoom.unwrap_or(DEFAULT_MIN_ZOOM);
            let max_zoom = self.maxzoom.unwrap_or(DEFAULT_MAX_ZOOM);
            if min_zoom > max_zoom {
                return Err(Error::ConfigError(format!(
                    "style '{}': minzoom {} is above maxzoom {}",
                    name, min_zoom, max_zoom
                )));
            }
            StyleSource::RasterTiles {
                urls,
                tile_size,
                min_zoom,
                max_zoom,
            }
        };

        Ok(StyleDefinition {
            name,
            source,
            attribution: self.attribution,
        })
    }
}

/// Ordered, read-only set of styles
#[derive(Debug, Clone)]
pub struct StyleRegistry {
    styles: Vec<StyleDefinition>,
    default_format: ImageFormat,
}

impl StyleRegistry {
    /// Read and validate a style list file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read style list {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a style list document
    pub fn from_json(text: &str) -> Result<Self> {
        let doc: StyleListDocument = serde_json::from_str(text)
            .map_err(|e| Error::ConfigError(format!("malformed style list: {}", e)))?;

        let (default_format, entries) = match doc {
            StyleListDocument::List(entries) => (ImageFormat::default(), entries),
            StyleListDocument::Document {
                default_format,
                styles,
            } => (default_format.unwrap_or_default(), styles),
        };

        let styles = entries
            .into_iter()
            .map(StyleEntry::into_definition)
            .collect::<Result<Vec<_>>>()?;
        Self::new(styles, default_format)
    }

    /// Build a registry from already constructed definitions.
    ///
    /// Duplicate names are rejected rather than letting a later entry
    /// silently replace an earlier one.
    pub fn new(styles: Vec<StyleDefinition>, default_format: ImageFormat) -> Result<Self> {
        if styles.is_empty() {
            return Err(Error::ConfigError("style list is empty".into()));
        }

        let mut seen = HashSet::new();
        for style in &styles {
            if !seen.insert(style.name.as_str()) {
                return Err(Error::ConfigError(format!(
                    "duplicate style name '{}'",
                    style.name
                )));
            }
        }

        Ok(Self {
            styles,
            default_format,
        })
    }

    pub fn styles(&self) -> &[StyleDefinition] {
        &self.styles
    }

    /// Style names in registration order
    pub fn names(&self) -> Vec<String> {
        self.styles.iter().map(|s| s.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&StyleDefinition> {
        self.styles.iter().find(|s| s.name == name)
    }

    /// The first registered style, used whenever a name is unknown
    pub fn first(&self) -> &StyleDefinition {
        // `new` refuses empty lists
        &self.styles[0]
    }

    pub fn default_format(&self) -> ImageFormat {
        self.default_format
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }
}
