//! # osm-tiles
//!
//! A bounded in-memory slippy-map tile cache fed by a pool of worker
//! threads.
//!
//! Given a map center, a zoom level and a viewport size, this library works
//! out which Web Mercator tiles cover the viewport, fetches the missing ones
//! over keep-alive HTTP(S) connections, decodes them into a fixed set of
//! RGB565 tile buffers, and composes the map. A per-call time budget bounds
//! how long a map may take; tiles that miss it are drawn as background.
//!
//! ## Architecture
//!
//! - [`tile`] - Providers, viewport projection, tile cache, PNG decoding
//! - [`io`] - Keep-alive tile fetcher over plain TCP or rustls TLS
//! - [`fetch`] - Fetch scheduler and worker pool
//! - [`map`] - [`TileMap`] facade and [`MapSurface`] compositor
//! - [`config`] - CLI configuration for the `osm-tiles` binary
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use osm_tiles::{MapSurface, TileMap};
//!
//! let mut map = TileMap::new();
//! map.set_size(320, 240)?;
//! map.resize_tiles_cache(map.tiles_needed())?;
//!
//! let mut surface = MapSurface::default();
//! let report = map.fetch_map(&mut surface, 13.405, 52.52, 10, Some(Duration::from_secs(3)))?;
//! println!("{} tiles fetched, {} failed", report.jobs, report.failures);
//! # Ok::<(), osm_tiles::MapError>(())
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod io;
pub mod map;
pub mod tile;

// Re-export commonly used types
pub use config::Config;
pub use error::{
    CacheError, DecodeError, FetchError, MapError, ProjectionError, ProviderError, TileError,
};
pub use fetch::{BatchReport, Clock, FetchScheduler, ManualClock, SystemClock, TileLoader};
pub use io::TileFetcher;
pub use map::{MapSurface, TileMap, TileMapOptions};
pub use tile::{project, TileCache, TileGrid, TileKey, TileProvider};
