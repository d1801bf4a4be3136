//! Viewport projection onto the Web Mercator tile grid.
//!
//! Given a map center, a zoom level, and a viewport size, [`project`]
//! computes the grid of tiles that covers the viewport and where the first
//! tile must be drawn so the center lands in the middle of the viewport.
//!
//! # Layout
//!
//! ```text
//!   start_offset_x (<= 0)
//!   │
//!   ▼
//!   ┌────────┬────────┬────────┐ ◄─ start_offset_y (<= 0)
//!   │ (0,0)  │ (1,0)  │ (2,0)  │
//!   │    ┌───┼────────┼───┐    │
//!   ├────┼───┼────────┼───┼────┤
//!   │    │   │   +    │   │    │   + = requested lon/lat
//!   │    └───┼────────┼───┘    │   inner box = viewport
//!   └────────┴────────┴────────┘
//! ```
//!
//! Tiles are listed in row-major order: the tile at grid column `c` and row
//! `r` has index `columns * r + c` and is drawn at
//! `(start_offset_x + c * tile_size, start_offset_y + r * tile_size)`.
//!
//! X indices wrap around the antimeridian. Y indices are not wrapped: rows
//! above the north edge or below the south edge of the world are reported
//! as-is and have no tile.

use std::f64::consts::PI;

use crate::error::ProjectionError;

/// Latitude limit of the Web Mercator projection, in degrees.
pub const MAX_LATITUDE: f64 = 85.0511;

/// Highest zoom for which `2^zoom` tile indices fit the grid arithmetic.
pub const MAX_ZOOM: u8 = 30;

/// A tile index in the required-tile list.
///
/// `x` is already wrapped into `[0, 2^zoom)`; `y` may lie outside the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: i64,
}

impl TileCoord {
    /// The row index if it lies inside the world at `zoom`.
    pub fn row(&self, zoom: u8) -> Option<u32> {
        u32::try_from(self.y)
            .ok()
            .filter(|&y| u64::from(y) < world_size(zoom))
    }
}

/// The tile grid covering one viewport.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    pub zoom: u8,
    pub tile_size: u32,
    pub columns: u32,
    pub rows: u32,
    /// Pixel position of the top-left tile relative to the viewport
    pub start_offset_x: i32,
    pub start_offset_y: i32,
    /// Unwrapped tile indices of the top-left tile
    pub start_tile_x: i64,
    pub start_tile_y: i64,
    /// Required tiles in row-major order
    pub tiles: Vec<TileCoord>,
}

impl TileGrid {
    /// Draw position of the tile at row-major `index`.
    pub fn draw_position(&self, index: usize) -> (i32, i32) {
        let columns = self.columns.max(1) as usize;
        let col = (index % columns) as i32;
        let row = (index / columns) as i32;
        let size = self.tile_size as i32;
        (
            self.start_offset_x + col * size,
            self.start_offset_y + row * size,
        )
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Number of tiles along one axis at `zoom`.
#[inline]
pub fn world_size(zoom: u8) -> u64 {
    1u64 << zoom
}

/// Fold a longitude into `[-180, 180)`.
pub fn normalize_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Clamp a latitude to the Web Mercator limit.
pub fn clamp_latitude(lat: f64) -> f64 {
    lat.clamp(-MAX_LATITUDE, MAX_LATITUDE)
}

/// Fractional tile X of a longitude.
pub fn lon_to_tile_x(lon: f64, zoom: u8) -> f64 {
    (lon + 180.0) / 360.0 * world_size(zoom) as f64
}

/// Fractional tile Y of a latitude.
pub fn lat_to_tile_y(lat: f64, zoom: u8) -> f64 {
    let lat_rad = lat.to_radians();
    (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * world_size(zoom) as f64
}

/// Upper bound on the number of tiles any viewport of this size can need.
///
/// Used to size the tile cache: `(ceil(w / ts) + 1) * (ceil(h / ts) + 1)`.
pub fn tiles_needed(width: u32, height: u32, tile_size: u32) -> usize {
    if tile_size == 0 {
        return 0;
    }
    let cols = width.div_ceil(tile_size) as usize + 1;
    let rows = height.div_ceil(tile_size) as usize + 1;
    cols * rows
}

/// Compute the tiles needed to render a `width` x `height` viewport
/// centered on `(lon, lat)` at `zoom`.
///
/// Longitude is normalized into `[-180, 180)` and latitude is clamped to
/// ±[`MAX_LATITUDE`] before projection.
pub fn project(
    lon: f64,
    lat: f64,
    zoom: u8,
    width: u32,
    height: u32,
    tile_size: u32,
) -> Result<TileGrid, ProjectionError> {
    if width == 0 || height == 0 {
        return Err(ProjectionError::ZeroViewport { width, height });
    }
    if tile_size == 0 {
        return Err(ProjectionError::ZeroTileSize);
    }
    if zoom > MAX_ZOOM {
        return Err(ProjectionError::InvalidZoom(zoom));
    }
    if !lon.is_finite() || !lat.is_finite() {
        return Err(ProjectionError::InvalidCoordinate { lon, lat });
    }

    let lon = normalize_longitude(lon);
    let lat = clamp_latitude(lat);

    let x_axis = AxisLayout::compute(lon_to_tile_x(lon, zoom), width, tile_size);
    let y_axis = AxisLayout::compute(lat_to_tile_y(lat, zoom), height, tile_size);
    let (columns, start_offset_x, start_tile_x) =
        (x_axis.count, x_axis.start_offset, x_axis.first_tile);
    let (rows, start_offset_y, start_tile_y) =
        (y_axis.count, y_axis.start_offset, y_axis.first_tile);

    let world = world_size(zoom) as i64;
    let mut tiles = Vec::with_capacity(columns as usize * rows as usize);
    for row in 0..rows as i64 {
        for col in 0..columns as i64 {
            tiles.push(TileCoord {
                x: (start_tile_x + col).rem_euclid(world) as u32,
                y: start_tile_y + row,
            });
        }
    }

    Ok(TileGrid {
        zoom,
        tile_size,
        columns,
        rows,
        start_offset_x,
        start_offset_y,
        start_tile_x,
        start_tile_y,
        tiles,
    })
}

/// Tile layout along one axis of the viewport.
struct AxisLayout {
    /// Unwrapped index of the first tile
    first_tile: i64,
    /// Number of tiles along the axis
    count: u32,
    /// Draw offset of the first tile, in `(-tile_size, 0]`
    start_offset: i32,
}

impl AxisLayout {
    fn compute(exact_tile: f64, extent: u32, tile_size: u32) -> Self {
        let center_tile = exact_tile.floor();
        let offset_in_tile = ((exact_tile - center_tile) * f64::from(tile_size)) as i64;
        let size = i64::from(tile_size);

        // Where the center tile's top-left corner lands in the viewport.
        let tiles_offset = i64::from(extent / 2) - offset_in_tile;

        let before = div_ceil_signed(tiles_offset, size);
        let after = div_ceil_signed(i64::from(extent) - (tiles_offset + size), size);

        Self {
            first_tile: center_tile as i64 - before,
            count: (before + 1 + after) as u32,
            start_offset: (tiles_offset - before * size) as i32,
        }
    }
}

fn div_ceil_signed(numerator: i64, denominator: i64) -> i64 {
    let quotient = numerator.div_euclid(denominator);
    if numerator.rem_euclid(denominator) == 0 {
        quotient
    } else {
        quotient + 1
    }
}
