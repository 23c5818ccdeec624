//! Tile geometry: pure integer math mapping a frame onto a grid of
//! fixed-size inference blocks.
//!
//! Every frame is partitioned into `ceil(dim / input_width)` tiles per axis.
//! A tile's *input* region extends `margin_width` pixels past its own cell on
//! every side (so the model sees context beyond the block boundary) and may
//! therefore start at a negative coordinate; sampling handles the clamping.
//! A tile's *output* region is `output_width` square, cropped (never
//! overlapped) at the last row/column when the frame is not an exact
//! multiple of the block size.

use crate::types::Resolution;

/// Fixed geometry contract of an inference model. Immutable once a model is
/// bound; the pipeline never inspects which concrete model produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileOptions {
    pub input_width: u32,
    pub margin_width: u32,
    pub output_width: u32,
    pub scale_ratio: u32,
}

impl TileOptions {
    /// Geometry of the 2x-upscale model family.
    pub const SCALE2: TileOptions = TileOptions {
        input_width: 142,
        margin_width: 7,
        output_width: 284,
        scale_ratio: 2,
    };

    /// Geometry of the 1x (denoise-only) model family.
    pub const SCALE1: TileOptions = TileOptions {
        input_width: 128,
        margin_width: 7,
        output_width: 128,
        scale_ratio: 1,
    };

    /// Side length of a tile's full, margin-inclusive input extent.
    pub fn full_input_width(&self) -> u32 {
        self.input_width + 2 * self.margin_width
    }
}

/// The 2D arrangement of tiles covering one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub columns: u32,
    pub rows: u32,
}

impl Grid {
    pub fn tile_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    /// Grid coordinate of the tile at a row-major index.
    pub fn coordinate(&self, index: usize) -> (u32, u32) {
        (
            (index % self.columns as usize) as u32,
            (index / self.columns as usize) as u32,
        )
    }
}

/// One tile's placement: grid coordinate plus a pixel rectangle. Input-side
/// origins may be negative (margin hanging past the frame edge).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRegion {
    pub col: u32,
    pub row: u32,
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

/// `ceil(frame_dim / input_width)` tiles per axis.
pub fn compute_grid(frame: Resolution, options: &TileOptions) -> Grid {
    Grid {
        columns: frame.width.div_ceil(options.input_width),
        rows: frame.height.div_ceil(options.input_width),
    }
}

/// Margin-inclusive source rectangle for one grid cell.
pub fn region_for(col: u32, row: u32, options: &TileOptions) -> TileRegion {
    let side = options.full_input_width();
    TileRegion {
        col,
        row,
        x: col as i64 * options.input_width as i64 - options.margin_width as i64,
        y: row as i64 * options.input_width as i64 - options.margin_width as i64,
        width: side,
        height: side,
    }
}

/// Destination rectangle for one grid cell in the output frame, cropped so it
/// never extends past `output_size`.
pub fn output_region_for(
    col: u32,
    row: u32,
    output_size: Resolution,
    options: &TileOptions,
) -> TileRegion {
    let x = col * options.output_width;
    let y = row * options.output_width;
    TileRegion {
        col,
        row,
        x: x as i64,
        y: y as i64,
        width: options.output_width.min(output_size.width - x.min(output_size.width)),
        height: options.output_width.min(output_size.height - y.min(output_size.height)),
    }
}
