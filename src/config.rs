//! Configuration for the `osm-tiles` command-line tool.
//!
//! This module provides a configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `OSM_` prefix
//! - Defaults for everything except the map center and zoom
//!
//! # Example
//!
//! ```ignore
//! use osm_tiles::config::Config;
//!
//! let config = Config::parse();
//! println!("Rendering {}x{} at zoom {}", config.width, config.height, config.zoom);
//! ```
//!
//! # Environment Variables
//!
//! - `OSM_LON`, `OSM_LAT` - Map center in degrees (required)
//! - `OSM_ZOOM` - Zoom level (required)
//! - `OSM_WIDTH` / `OSM_HEIGHT` - Viewport size (default: 320x240)
//! - `OSM_CACHE_TILES` - Tile cache slots (default: computed from the viewport)
//! - `OSM_TIMEOUT_MS` - Batch timeout, 0 for none (default: 0)
//! - `OSM_PROVIDER` - Provider index (default: 0)
//! - `OSM_PROVIDERS_FILE` - JSON provider table replacing the built-in one
//! - `OSM_API_KEY` - API key for providers that need one
//! - `OSM_SINGLE_WORKER` - Run one worker thread
//! - `OSM_OUTPUT` - PNG output path (default: map.png)

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::map::{DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::tile::{TileProvider, MAX_ZOOM};

/// Default output path.
pub const DEFAULT_OUTPUT: &str = "map.png";

/// osm-tiles - Render a slippy-map viewport from a tile server.
///
/// Fetches the tiles covering the viewport with a pool of keep-alive
/// workers and writes the composed map as a PNG.
#[derive(Parser, Debug, Clone)]
#[command(name = "osm-tiles")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // View
    // =========================================================================
    /// Longitude of the map center in degrees.
    #[arg(long, allow_hyphen_values = true, env = "OSM_LON")]
    pub lon: f64,

    /// Latitude of the map center in degrees.
    #[arg(long, allow_hyphen_values = true, env = "OSM_LAT")]
    pub lat: f64,

    /// Zoom level.
    #[arg(short, long, env = "OSM_ZOOM")]
    pub zoom: u8,

    /// Viewport width in pixels.
    #[arg(long, default_value_t = DEFAULT_WIDTH, env = "OSM_WIDTH")]
    pub width: u32,

    /// Viewport height in pixels.
    #[arg(long, default_value_t = DEFAULT_HEIGHT, env = "OSM_HEIGHT")]
    pub height: u32,

    // =========================================================================
    // Fetching
    // =========================================================================
    /// Number of tile cache slots.
    ///
    /// Defaults to the number of tiles any viewport of this size can need.
    #[arg(long, env = "OSM_CACHE_TILES")]
    pub cache_tiles: Option<usize>,

    /// Time budget for the whole map in milliseconds; 0 disables it.
    #[arg(long, default_value_t = 0, env = "OSM_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Run a single worker thread instead of one per core.
    #[arg(long, default_value_t = false, env = "OSM_SINGLE_WORKER")]
    pub single_worker: bool,

    // =========================================================================
    // Provider
    // =========================================================================
    /// Index into the provider table.
    #[arg(short, long, default_value_t = 0, env = "OSM_PROVIDER")]
    pub provider: usize,

    /// JSON file with a provider table to use instead of the built-in one.
    #[arg(long, env = "OSM_PROVIDERS_FILE")]
    pub providers_file: Option<PathBuf>,

    /// API key for providers that require one.
    #[arg(long, env = "OSM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    // =========================================================================
    // Output
    // =========================================================================
    /// Where to write the rendered map.
    #[arg(short, long, default_value = DEFAULT_OUTPUT, env = "OSM_OUTPUT")]
    pub output: PathBuf,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.lon.is_finite() || !self.lat.is_finite() {
            return Err("lon and lat must be finite numbers".to_string());
        }

        if !(-90.0..=90.0).contains(&self.lat) {
            return Err("lat must be between -90 and 90".to_string());
        }

        if self.zoom > MAX_ZOOM {
            return Err(format!("zoom must be at most {}", MAX_ZOOM));
        }

        if self.width == 0 || self.height == 0 {
            return Err("width and height must be greater than 0".to_string());
        }

        if self.cache_tiles == Some(0) {
            return Err("cache_tiles must be greater than 0".to_string());
        }

        if self.output.as_os_str().is_empty() {
            return Err("output path is required. Set --output or OSM_OUTPUT".to_string());
        }

        Ok(())
    }

    /// Batch timeout, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Get the API key, or an empty string if not set.
    pub fn api_key_or_empty(&self) -> &str {
        self.api_key.as_deref().unwrap_or("")
    }

    /// Resolve the selected provider from the providers file or the
    /// built-in table.
    pub fn resolve_provider(&self) -> Result<TileProvider, String> {
        let Some(path) = &self.providers_file else {
            return TileProvider::builtin_by_index(self.provider, self.api_key_or_empty())
                .map_err(|e| e.to_string());
        };

        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        let mut providers = parse_providers(&json)
            .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;

        if self.provider >= providers.len() {
            return Err(format!(
                "provider index {} out of range, {} has {} provider(s)",
                self.provider,
                path.display(),
                providers.len()
            ));
        }
        let mut provider = providers.swap_remove(self.provider);

        if provider.requires_api_key && provider.api_key.is_empty() {
            provider.api_key = self.api_key_or_empty().to_string();
        }
        Ok(provider)
    }
}

/// Parse a JSON array of providers.
pub fn parse_providers(json: &str) -> Result<Vec<TileProvider>, serde_json::Error> {
    serde_json::from_str(json)
}

// =============================================================================
// Tests
// =============================================================================
