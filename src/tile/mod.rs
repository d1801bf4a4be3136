//! Tiles: where they come from, where they go on screen, and where they
//! are kept.
//!
//! # Components
//!
//! - [`TileProvider`]: URL template, zoom range and tile size of a source
//! - [`project`]: viewport to required-tile grid on Web Mercator
//! - [`TileCache`] / [`TileSlot`]: fixed set of decoded tile buffers
//! - [`PngTileDecoder`]: PNG to RGB565 rows
//!
//! # Example
//!
//! ```
//! use osm_tiles::tile::{project, tiles_needed, TileCache, TileProvider};
//!
//! let provider = TileProvider::osm_standard();
//! let grid = project(-0.1276, 51.5072, 5, 320, 240, provider.tile_size).unwrap();
//! assert!(grid.len() <= tiles_needed(320, 240, provider.tile_size));
//!
//! let cache = TileCache::with_capacity(grid.len(), provider.tile_size).unwrap();
//! assert_eq!(cache.capacity(), grid.len());
//! ```

mod cache;
mod decoder;
mod projection;
mod provider;

pub use cache::{SlotData, TileCache, TileKey, TileSlot};
pub use decoder::{rgb565, rgb888, PngTileDecoder};
pub use projection::{
    clamp_latitude, lat_to_tile_y, lon_to_tile_x, normalize_longitude, project, tiles_needed,
    world_size, TileCoord, TileGrid, MAX_LATITUDE, MAX_ZOOM,
};
pub use provider::{TileProvider, DEFAULT_TILE_SIZE, MAX_PROVIDER_ZOOM};
