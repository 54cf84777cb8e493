//! Splits an image into a grid of tiles so detector statistics stay local.

use image::Rgb;

use crate::{
    error::{AoiError, Result},
    types::{ImageFrame, PixelRect},
};

/// Segment counts with a defined grid layout
pub const SUPPORTED_SEGMENT_COUNTS: [u32; 8] = [1, 2, 4, 6, 9, 16, 25, 36];

/// Rows and columns for a supported segment count
pub fn grid_shape(segments: u32) -> Result<(u32, u32)> {
    match segments {
        2 => Ok((1, 2)),
        6 => Ok((2, 3)),
        n if SUPPORTED_SEGMENT_COUNTS.contains(&n) => {
            let side = (n as f64).sqrt().round() as u32;
            Ok((side, side))
        }
        n => Err(AoiError::InvalidSegmentCount(n)),
    }
}

/// Tile rectangles covering `width` x `height` without gaps or overlaps.
/// Rows and columns get an equal share; the last row and column absorb the
/// remainder. Tiles are listed row by row.
pub fn plan_segments(width: u32, height: u32, segments: u32) -> Result<Vec<PixelRect>> {
    let (rows, cols) = grid_shape(segments)?;
    if width < cols || height < rows {
        return Err(AoiError::ImageProcessing(format!(
            "Image of {width}x{height} is too small for a {rows}x{cols} grid"
        )));
    }

    let tile_w = width / cols;
    let tile_h = height / rows;
    let mut tiles = Vec::with_capacity((rows * cols) as usize);
    for row in 0..rows {
        let y = row * tile_h;
        let h = if row == rows - 1 { height - y } else { tile_h };
        for col in 0..cols {
            let x = col * tile_w;
            let w = if col == cols - 1 { width - x } else { tile_w };
            tiles.push(PixelRect::new(x, y, w, h));
        }
    }
    Ok(tiles)
}

/// A view of one tile of an image frame
#[derive(Debug, Clone, Copy)]
pub struct Tile<'a> {
    pub rect: PixelRect,
    pub frame: &'a ImageFrame,
}

impl<'a> Tile<'a> {
    pub fn new(rect: PixelRect, frame: &'a ImageFrame) -> Self {
        Self { rect, frame }
    }

    /// The whole frame as one tile
    pub fn full(frame: &'a ImageFrame) -> Self {
        Self::new(PixelRect::new(0, 0, frame.width(), frame.height()), frame)
    }

    pub fn width(&self) -> u32 {
        self.rect.width
    }

    pub fn height(&self) -> u32 {
        self.rect.height
    }

    pub fn pixel_count(&self) -> usize {
        self.rect.area() as usize
    }

    /// RGB value at tile-local coordinates
    pub fn rgb(&self, x: u32, y: u32) -> &Rgb<u8> {
        self.frame.rgb.get_pixel(self.rect.x + x, self.rect.y + y)
    }

    /// Tile pixels in row-major order
    pub fn rgb_pixels(&self) -> impl Iterator<Item = (u32, u32, &Rgb<u8>)> + Clone + '_ {
        let (w, h) = (self.rect.width, self.rect.height);
        (0..h).flat_map(move |y| (0..w).map(move |x| (x, y, self.rgb(x, y))))
    }

    /// Temperature at tile-local coordinates, if the frame is radiometric
    pub fn celsius(&self, x: u32, y: u32) -> Option<f32> {
        self.frame
            .thermal
            .as_ref()
            .map(|t| t.get(self.rect.x + x, self.rect.y + y))
    }
}
