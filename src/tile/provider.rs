//! Tile provider definitions.
//!
//! A [`TileProvider`] describes one remote tile source: how to build a tile
//! URL, the attribution that must be shown with its tiles, the zoom range it
//! serves, and the pixel size of its tiles.
//!
//! URL templates use `{z}`, `{x}`, `{y}` placeholders and, for providers that
//! need one, `{apikey}`:
//!
//! ```text
//! https://tile.thunderforest.com/cycle/{z}/{x}/{y}.png?apikey={apikey}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Highest zoom level any provider may declare.
pub const MAX_PROVIDER_ZOOM: u8 = 24;

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Placeholder for a provider API key.
const API_KEY_PLACEHOLDER: &str = "{apikey}";

/// Immutable configuration of one remote tile source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileProvider {
    /// Human readable name
    pub name: String,

    /// URL template with `{z}`, `{x}`, `{y}` and optional `{apikey}`
    pub url_template: String,

    /// Attribution string to display with the map
    #[serde(default)]
    pub attribution: String,

    /// Whether `{apikey}` must be substituted
    #[serde(default)]
    pub requires_api_key: bool,

    /// API key, empty when not required
    #[serde(default)]
    pub api_key: String,

    /// Lowest zoom served
    #[serde(default)]
    pub min_zoom: u8,

    /// Highest zoom served
    pub max_zoom: u8,

    /// Tile edge length in pixels
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
}

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

impl TileProvider {
    /// OpenStreetMap standard layer, 256 px tiles, zoom 0-19.
    pub fn osm_standard() -> Self {
        Self {
            name: "OSM Standard".to_string(),
            url_template: "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            attribution: "© OpenStreetMap contributors".to_string(),
            requires_api_key: false,
            api_key: String::new(),
            min_zoom: 0,
            max_zoom: 19,
            tile_size: 256,
        }
    }

    /// Thunderforest transport-dark, 256 px tiles.
    pub fn thunderforest_transport_dark_256(api_key: impl Into<String>) -> Self {
        Self::thunderforest(
            "Thunderforest Transport Dark 256px",
            "https://tile.thunderforest.com/transport-dark/{z}/{x}/{y}.png?apikey={apikey}",
            api_key.into(),
            256,
        )
    }

    /// Thunderforest cycle, 512 px (high DPI) tiles.
    pub fn thunderforest_cycle_512(api_key: impl Into<String>) -> Self {
        Self::thunderforest(
            "Thunderforest Cycle 512px",
            "https://tile.thunderforest.com/cycle/{z}/{x}/{y}@2x.png?apikey={apikey}",
            api_key.into(),
            512,
        )
    }

    /// Thunderforest cycle, 256 px tiles.
    pub fn thunderforest_cycle_256(api_key: impl Into<String>) -> Self {
        Self::thunderforest(
            "Thunderforest Cycle 256px",
            "https://tile.thunderforest.com/cycle/{z}/{x}/{y}.png?apikey={apikey}",
            api_key.into(),
            256,
        )
    }

    fn thunderforest(name: &str, template: &str, api_key: String, tile_size: u32) -> Self {
        Self {
            name: name.to_string(),
            url_template: template.to_string(),
            attribution: "© Thunderforest, OpenStreetMap contributors".to_string(),
            requires_api_key: true,
            api_key,
            min_zoom: 0,
            max_zoom: 22,
            tile_size,
        }
    }

    /// The built-in provider table. Thunderforest entries carry `api_key`.
    pub fn builtin(api_key: &str) -> Vec<TileProvider> {
        vec![
            Self::osm_standard(),
            Self::thunderforest_transport_dark_256(api_key),
            Self::thunderforest_cycle_512(api_key),
            Self::thunderforest_cycle_256(api_key),
        ]
    }

    /// Look up a built-in provider by index.
    pub fn builtin_by_index(index: usize, api_key: &str) -> Result<TileProvider, ProviderError> {
        let mut providers = Self::builtin(api_key);
        let available = providers.len();
        if index >= available {
            return Err(ProviderError::UnknownIndex { index, available });
        }
        Ok(providers.swap_remove(index))
    }

    /// Check the provider definition for consistency.
    pub fn validate(&self) -> Result<(), ProviderError> {
        for placeholder in ["{z}", "{x}", "{y}"] {
            if !self.url_template.contains(placeholder) {
                return Err(ProviderError::MissingPlaceholder {
                    name: self.name.clone(),
                    placeholder,
                });
            }
        }

        if self.requires_api_key {
            if !self.url_template.contains(API_KEY_PLACEHOLDER) {
                return Err(ProviderError::MissingPlaceholder {
                    name: self.name.clone(),
                    placeholder: API_KEY_PLACEHOLDER,
                });
            }
            if self.api_key.trim().is_empty() {
                return Err(ProviderError::MissingApiKey(self.name.clone()));
            }
        }

        if self.min_zoom > self.max_zoom || self.max_zoom > MAX_PROVIDER_ZOOM {
            return Err(ProviderError::InvalidZoomRange {
                name: self.name.clone(),
                min_zoom: self.min_zoom,
                max_zoom: self.max_zoom,
            });
        }

        if self.tile_size == 0 {
            return Err(ProviderError::InvalidTileSize {
                name: self.name.clone(),
                tile_size: self.tile_size,
            });
        }

        Ok(())
    }

    /// Whether `zoom` lies within `min_zoom..=max_zoom`.
    pub fn supports_zoom(&self, zoom: u8) -> bool {
        (self.min_zoom..=self.max_zoom).contains(&zoom)
    }

    /// Build the URL of tile `(x, y)` at `zoom`.
    pub fn tile_url(&self, x: u32, y: u32, zoom: u8) -> String {
        let mut url = self
            .url_template
            .replace("{z}", &zoom.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string());

        if self.requires_api_key {
            url = url.replace(API_KEY_PLACEHOLDER, &urlencoding::encode(&self.api_key));
        }

        url
    }

    /// Number of RGB565 pixels in one tile.
    pub fn pixels_per_tile(&self) -> usize {
        let edge = self.tile_size as usize;
        edge * edge
    }
}

impl Default for TileProvider {
    fn default() -> Self {
        Self::osm_standard()
    }
}
