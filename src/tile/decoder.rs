//! PNG tile decoder.
//!
//! Decodes a downloaded PNG and hands it out one row at a time as RGB565
//! pixels, the format tile slots store.
//!
//! # Design Decisions
//!
//! - **Per-worker instance**: a decoder owns scratch buffers that are reused
//!   across tiles, so each worker thread keeps its own and never shares it.
//!
//! - **Explicit row callback**: rows are delivered to a closure supplied by
//!   the caller, which captures the destination buffer directly.
//!
//! - **Size check first**: the image header is checked against the expected
//!   tile size before any pixel data is decoded.

use std::io::Cursor;

use image::codecs::png::PngDecoder;
use image::{ColorType, ImageDecoder};

use crate::error::DecodeError;

/// Pack 8-bit RGB into RGB565.
#[inline]
pub const fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

/// Expand RGB565 back to 8-bit RGB.
#[inline]
pub const fn rgb888(pixel: u16) -> [u8; 3] {
    let r = ((pixel >> 11) & 0x1F) as u8;
    let g = ((pixel >> 5) & 0x3F) as u8;
    let b = (pixel & 0x1F) as u8;
    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]
}

// =============================================================================
// PNG Decoder
// =============================================================================

/// Reusable PNG decoder producing RGB565 rows.
///
/// # Example
///
/// ```ignore
/// use osm_tiles::tile::PngTileDecoder;
///
/// let mut decoder = PngTileDecoder::new();
/// let mut pixels = vec![0u16; 256 * 256];
/// decoder.decode_into(&png_bytes, 256, &mut pixels)?;
/// ```
#[derive(Debug, Default)]
pub struct PngTileDecoder {
    /// Decoded image bytes in the PNG's own color type
    scratch: Vec<u8>,
    /// One converted output row
    row: Vec<u16>,
}

impl PngTileDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `data` and call `on_row(y, pixels)` for every row.
    ///
    /// Fails without calling `on_row` if the image is not exactly
    /// `tile_size` x `tile_size`.
    pub fn decode_rows<F>(
        &mut self,
        data: &[u8],
        tile_size: u32,
        mut on_row: F,
    ) -> Result<(), DecodeError>
    where
        F: FnMut(u32, &[u16]),
    {
        let decoder =
            PngDecoder::new(Cursor::new(data)).map_err(|e| DecodeError::Image(e.to_string()))?;

        let (width, height) = decoder.dimensions();
        if width != tile_size || height != tile_size {
            return Err(DecodeError::SizeMismatch {
                expected: tile_size,
                width,
                height,
            });
        }

        let color_type = decoder.color_type();
        let layout = PixelLayout::for_color_type(color_type)?;

        let total = usize::try_from(decoder.total_bytes())
            .map_err(|_| DecodeError::Image("image too large".to_string()))?;
        self.scratch.clear();
        self.scratch
            .try_reserve(total)
            .map_err(|e| DecodeError::Image(e.to_string()))?;
        self.scratch.resize(total, 0);

        decoder
            .read_image(&mut self.scratch)
            .map_err(|e| DecodeError::Image(e.to_string()))?;

        let width = width as usize;
        let row_bytes = width * layout.bytes_per_pixel();
        self.row.clear();
        self.row.resize(width, 0);

        for (y, src) in self.scratch.chunks_exact(row_bytes).enumerate() {
            for (dst, px) in self.row.iter_mut().zip(src.chunks_exact(layout.bytes_per_pixel())) {
                *dst = layout.to_rgb565(px);
            }
            on_row(y as u32, &self.row);
        }

        Ok(())
    }

    /// Decode `data` straight into a `tile_size` x `tile_size` pixel buffer.
    pub fn decode_into(
        &mut self,
        data: &[u8],
        tile_size: u32,
        pixels: &mut [u16],
    ) -> Result<(), DecodeError> {
        let edge = tile_size as usize;
        let needed = edge * edge;
        if pixels.len() < needed {
            return Err(DecodeError::BufferTooSmall {
                needed,
                available: pixels.len(),
            });
        }

        self.decode_rows(data, tile_size, |y, row| {
            let start = y as usize * edge;
            pixels[start..start + edge].copy_from_slice(row);
        })
    }
}

/// How to pull RGB out of one decoded pixel.
#[derive(Debug, Clone, Copy)]
struct PixelLayout {
    channels: usize,
    bytes_per_sample: usize,
    has_color: bool,
    has_alpha: bool,
}

impl PixelLayout {
    fn for_color_type(color_type: ColorType) -> Result<Self, DecodeError> {
        let (channels, bytes_per_sample, has_color, has_alpha) = match color_type {
            ColorType::L8 => (1, 1, false, false),
            ColorType::La8 => (2, 1, false, true),
            ColorType::Rgb8 => (3, 1, true, false),
            ColorType::Rgba8 => (4, 1, true, true),
            ColorType::L16 => (1, 2, false, false),
            ColorType::La16 => (2, 2, false, true),
            ColorType::Rgb16 => (3, 2, true, false),
            ColorType::Rgba16 => (4, 2, true, true),
            other => {
                return Err(DecodeError::Image(format!(
                    "unsupported color type {other:?}"
                )))
            }
        };
        Ok(Self {
            channels,
            bytes_per_sample,
            has_color,
            has_alpha,
        })
    }

    fn bytes_per_pixel(&self) -> usize {
        self.channels * self.bytes_per_sample
    }

    /// 8-bit value of channel `index`. 16-bit samples are native-endian.
    fn sample(&self, px: &[u8], index: usize) -> u8 {
        let at = index * self.bytes_per_sample;
        if self.bytes_per_sample == 2 {
            (u16::from_ne_bytes([px[at], px[at + 1]]) >> 8) as u8
        } else {
            px[at]
        }
    }

    /// Convert one pixel, blending any alpha against black.
    fn to_rgb565(&self, px: &[u8]) -> u16 {
        let (mut r, mut g, mut b) = if self.has_color {
            (self.sample(px, 0), self.sample(px, 1), self.sample(px, 2))
        } else {
            let l = self.sample(px, 0);
            (l, l, l)
        };

        if self.has_alpha {
            let a = u16::from(self.sample(px, self.channels - 1));
            let blend = |c: u8| ((u16::from(c) * a + 127) / 255) as u8;
            r = blend(r);
            g = blend(g);
            b = blend(b);
        }

        rgb565(r, g, b)
    }
}

// =============================================================================
// Tests
// =============================================================================
