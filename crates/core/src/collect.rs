//! Tile collection: reassembles per-tile inference outputs into one upscaled
//! ARGB frame.
//!
//! Two clamps happen here and both matter: the geometric crop keeps the last
//! row/column tiles inside the frame, and the value clamp keeps imperfect
//! model output inside the legal pixel range.

use std::time::Duration;

use crate::error::ConvertError;
use crate::tile::{output_region_for, Grid, TileOptions};
use crate::types::{Resolution, VideoFrame, BYTES_PER_PIXEL};

/// Raw inference result for one tile: three planar channels (R, G, B), each
/// `output_width * output_width` doubles, matched to a grid cell by index.
#[derive(Debug, Clone, PartialEq)]
pub struct TileOutput {
    pub data: Vec<f64>,
}

impl TileOutput {
    fn expected_len(options: &TileOptions) -> usize {
        3 * options.output_width as usize * options.output_width as usize
    }
}

/// Write every tile's cropped output region into a freshly allocated frame
/// buffer, denormalizing each channel as `round(clamp(v*255, 0, 255))` with
/// alpha forced opaque. The returned frame carries a zero timestamp; the pump
/// re-stamps it from the source frame.
pub fn collect(
    outputs: &[TileOutput],
    grid: Grid,
    output_size: Resolution,
    options: &TileOptions,
) -> Result<VideoFrame, ConvertError> {
    let expected = grid.tile_count();
    if outputs.len() != expected {
        return Err(ConvertError::SizeMismatch {
            expected,
            actual: outputs.len(),
        });
    }

    let tile_len = TileOutput::expected_len(options);
    let block = options.output_width as usize;
    let plane = block * block;
    let stride = output_size.width as usize * BYTES_PER_PIXEL;

    let mut data = vec![0u8; output_size.pixel_count() * BYTES_PER_PIXEL];

    for (index, output) in outputs.iter().enumerate() {
        if output.data.len() != tile_len {
            return Err(ConvertError::InvalidOutput { index });
        }

        let (col, row) = grid.coordinate(index);
        let region = output_region_for(col, row, output_size, options);

        for local_y in 0..region.height as usize {
            let line = (region.y as usize + local_y) * stride;
            let tile_line = local_y * block;
            for local_x in 0..region.width as usize {
                let pixel = line + (region.x as usize + local_x) * BYTES_PER_PIXEL;
                let sample = tile_line + local_x;

                data[pixel] = 255;
                data[pixel + 1] = denormalize(output.data[sample]);
                data[pixel + 2] = denormalize(output.data[plane + sample]);
                data[pixel + 3] = denormalize(output.data[2 * plane + sample]);
            }
        }
    }

    Ok(VideoFrame::new(data, output_size, Duration::ZERO))
}

fn denormalize(v: f64) -> u8 {
    (v * 255.0).clamp(0.0, 255.0).round() as u8
}
