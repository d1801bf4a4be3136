//! RGB565 display surface the map is composed onto.

use std::sync::Arc;

use image::RgbImage;

use crate::error::MapError;
use crate::tile::{rgb888, TileGrid, TileSlot};

/// A `width` x `height` RGB565 pixel buffer, row-major.
#[derive(Debug, Clone, Default)]
pub struct MapSurface {
    width: u32,
    height: u32,
    pixels: Vec<u16>,
}

impl MapSurface {
    /// Allocate a surface. Fails on a zero dimension or allocation failure.
    pub fn new(width: u32, height: u32) -> Result<Self, MapError> {
        let mut surface = Self::default();
        surface.resize(width, height)?;
        Ok(surface)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    /// Pixel at `(x, y)`, or `None` outside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y as usize * self.width as usize + x as usize).copied()
    }

    /// Reallocate for a new size. Keeps the buffer when the size is unchanged.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), MapError> {
        if width == self.width && height == self.height && !self.pixels.is_empty() {
            return Ok(());
        }

        let failed = MapError::SurfaceAllocation { width, height };
        if width == 0 || height == 0 {
            return Err(failed);
        }
        let len = (width as usize).checked_mul(height as usize).ok_or(failed)?;

        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| MapError::SurfaceAllocation { width, height })?;
        pixels.resize(len, 0);

        self.width = width;
        self.height = height;
        self.pixels = pixels;
        Ok(())
    }

    pub fn fill(&mut self, color: u16) {
        self.pixels.fill(color);
    }

    /// Copy a square `size` x `size` tile with its top-left corner at
    /// `(x, y)`, clipped to the surface.
    pub fn blit(&mut self, tile: &[u16], size: u32, x: i32, y: i32) {
        let size = i64::from(size);
        let (x, y) = (i64::from(x), i64::from(y));
        let (width, height) = (i64::from(self.width), i64::from(self.height));

        let left = x.max(0);
        let right = (x + size).min(width);
        let top = y.max(0);
        let bottom = (y + size).min(height);
        if left >= right || top >= bottom {
            return;
        }

        let span = (right - left) as usize;
        for row in top..bottom {
            let src = ((row - y) * size + (left - x)) as usize;
            let dst = (row * width + left) as usize;
            if let (Some(src), Some(dst)) = (
                tile.get(src..src + span),
                self.pixels.get_mut(dst..dst + span),
            ) {
                dst.copy_from_slice(src);
            }
        }
    }

    /// Draw one batch: every valid, idle slot at its grid position and
    /// `background` everywhere else.
    ///
    /// `tiles` is indexed like `grid.tiles`.
    pub fn compose(&mut self, grid: &TileGrid, tiles: &[Option<Arc<TileSlot>>], background: u16) {
        self.fill(background);

        for (index, tile) in tiles.iter().enumerate().take(grid.len()) {
            let Some(slot) = tile else { continue };
            if slot.is_busy() {
                continue;
            }
            let data = slot.read();
            if !data.is_valid() {
                continue;
            }
            let (x, y) = grid.draw_position(index);
            self.blit(data.pixels(), grid.tile_size, x, y);
        }
    }

    /// Expand to 8-bit RGB for encoding.
    pub fn to_rgb_image(&self) -> RgbImage {
        let mut img = RgbImage::new(self.width, self.height);
        for (dst, &src) in img.pixels_mut().zip(&self.pixels) {
            dst.0 = rgb888(src);
        }
        img
    }
}
