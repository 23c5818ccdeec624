//! Tile extraction: materializes one tile's normalized numeric input from a
//! frame's raw ARGB buffer.
//!
//! Sampling coordinates are clamped to the frame, so a margin hanging past an
//! edge repeats the edge pixel instead of reading out of bounds. Channel
//! values are scaled to `[0,1]` and offset by [`CLIP_ETA8`].

use crate::error::ConvertError;
use crate::tile::{compute_grid, region_for, Grid, TileOptions, TileRegion};
use crate::types::{VideoFrame, BYTES_PER_PIXEL};

/// Small positive bias added to every normalized sample. Keeps values off
/// exact 0/1 so fixed-point quantization inside the inference engine does not
/// clip them.
pub const CLIP_ETA8: f64 = (1.0 / 255.0) * 0.5 - 1.0e-7 * ((1.0 / 255.0) * 0.5);

/// Normalized input for one tile: three planar channels (R, G, B), each
/// `side * side` doubles in `[0,1]` plus the epsilon bias.
#[derive(Debug, Clone, PartialEq)]
pub struct TileInput {
    pub data: Vec<f64>,
    pub side: usize,
}

impl TileInput {
    pub fn channel(&self, index: usize) -> &[f64] {
        let plane = self.side * self.side;
        &self.data[index * plane..(index + 1) * plane]
    }
}

/// Read one tile's margin-inclusive extent out of `frame`, edge-replicating
/// samples that fall outside the frame.
pub fn extract(frame: &VideoFrame, region: &TileRegion) -> Result<TileInput, ConvertError> {
    let expected = frame.expected_len();
    // A zero-sized frame has no edge pixel to replicate.
    if frame.data.len() != expected || expected == 0 {
        return Err(ConvertError::BufferAccess {
            expected,
            actual: frame.data.len(),
        });
    }

    let side = region.width as usize;
    let plane = side * side;
    let mut data = vec![0.0f64; 3 * plane];

    let frame_w = frame.resolution.width as i64;
    let frame_h = frame.resolution.height as i64;
    let stride = frame.resolution.width as usize * BYTES_PER_PIXEL;

    for y in 0..side {
        let src_y = (region.y + y as i64).clamp(0, frame_h - 1) as usize;
        let line = src_y * stride;
        for x in 0..side {
            let src_x = (region.x + x as i64).clamp(0, frame_w - 1) as usize;
            // ARGB: alpha at byte 0, then R, G, B.
            let pixel = line + src_x * BYTES_PER_PIXEL;
            let dst = y * side + x;
            data[dst] = frame.data[pixel + 1] as f64 / 255.0 + CLIP_ETA8;
            data[plane + dst] = frame.data[pixel + 2] as f64 / 255.0 + CLIP_ETA8;
            data[2 * plane + dst] = frame.data[pixel + 3] as f64 / 255.0 + CLIP_ETA8;
        }
    }

    Ok(TileInput { data, side })
}

/// The full set of tile inputs for one frame. Inputs are computed once on
/// first read and cached; tiles are owned by the pump that created the batch
/// and never outlive the frame.
pub struct TileBatch<'a> {
    frame: &'a VideoFrame,
    options: TileOptions,
    grid: Grid,
    inputs: Option<Vec<TileInput>>,
}

impl<'a> TileBatch<'a> {
    pub fn new(frame: &'a VideoFrame, options: TileOptions) -> Result<Self, ConvertError> {
        let expected = frame.expected_len();
        if frame.data.len() != expected {
            return Err(ConvertError::BufferAccess {
                expected,
                actual: frame.data.len(),
            });
        }

        Ok(Self {
            frame,
            options,
            grid: compute_grid(frame.resolution, &options),
            inputs: None,
        })
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn len(&self) -> usize {
        self.grid.tile_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All tile inputs in grid (row-major) order. Extraction runs once; later
    /// calls return the cached buffers.
    pub fn inputs(&mut self) -> Result<&[TileInput], ConvertError> {
        if self.inputs.is_none() {
            let mut inputs = Vec::with_capacity(self.len());
            for index in 0..self.len() {
                let (col, row) = self.grid.coordinate(index);
                let region = region_for(col, row, &self.options);
                inputs.push(extract(self.frame, &region)?);
            }
            self.inputs = Some(inputs);
        }

        Ok(self.inputs.as_deref().expect("inputs populated above"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Resolution;
    use std::time::Duration;

    /// 2x2 frame with distinct per-pixel R values; G/B/A constant.
    fn test_frame() -> VideoFrame {
        let mut data = Vec::new();
        for r in [10u8, 20, 30, 40] {
            data.extend_from_slice(&[255, r, 100, 200]);
        }
        VideoFrame::new(data, Resolution::new(2, 2), Duration::ZERO)
    }

    fn options(input: u32, margin: u32) -> TileOptions {
        TileOptions {
            input_width: input,
            margin_width: margin,
            output_width: input,
            scale_ratio: 1,
        }
    }

    fn normalized(v: u8) -> f64 {
        v as f64 / 255.0 + CLIP_ETA8
    }

    #[test]
    fn extract_normalizes_and_biases_channels() {
        let frame = test_frame();
        let region = region_for(0, 0, &options(2, 0));
        let tile = extract(&frame, &region).expect("extract");

        assert_eq!(tile.side, 2);
        assert_eq!(tile.channel(0), &[10u8, 20, 30, 40].map(normalized));
        assert!(tile.channel(1).iter().all(|&g| g == normalized(100)));
        assert!(tile.channel(2).iter().all(|&b| b == normalized(200)));
    }

    #[test]
    fn margin_past_every_edge_replicates_edge_pixels() {
        // One tile covers the whole 2x2 frame; margin 1 pushes sampling past
        // all four edges.
        let frame = test_frame();
        let region = region_for(0, 0, &options(2, 1));
        let tile = extract(&frame, &region).expect("extract");
        assert_eq!(tile.side, 4);

        let r = tile.channel(0);
        // Corners replicate the nearest corner pixel.
        assert_eq!(r[0], normalized(10)); // top-left
        assert_eq!(r[3], normalized(20)); // top-right
        assert_eq!(r[12], normalized(30)); // bottom-left
        assert_eq!(r[15], normalized(40)); // bottom-right
        // Edge runs replicate the nearest in-bounds row/column.
        assert_eq!(r[1], normalized(10));
        assert_eq!(r[2], normalized(20));
        assert_eq!(r[4], normalized(10));
        assert_eq!(r[7], normalized(20));
        assert_eq!(r[8], normalized(30));
        assert_eq!(r[11], normalized(40));
    }

    #[test]
    fn short_buffer_is_a_buffer_access_error() {
        let mut frame = test_frame();
        frame.data.truncate(10);

        let region = region_for(0, 0, &options(2, 0));
        assert!(matches!(
            extract(&frame, &region),
            Err(ConvertError::BufferAccess {
                expected: 16,
                actual: 10
            })
        ));
        assert!(matches!(
            TileBatch::new(&frame, options(2, 0)),
            Err(ConvertError::BufferAccess { .. })
        ));
    }

    #[test]
    fn zero_sized_frame_is_a_buffer_access_error() {
        let frame = VideoFrame::new(Vec::new(), Resolution::new(0, 0), Duration::ZERO);
        let region = region_for(0, 0, &options(2, 1));
        assert!(matches!(
            extract(&frame, &region),
            Err(ConvertError::BufferAccess {
                expected: 0,
                actual: 0
            })
        ));

        let tall = VideoFrame::new(Vec::new(), Resolution::new(0, 4), Duration::ZERO);
        assert!(matches!(
            extract(&tall, &region),
            Err(ConvertError::BufferAccess { .. })
        ));
    }

    #[test]
    fn batch_caches_inputs_after_first_read() {
        let frame = test_frame();
        let mut batch = TileBatch::new(&frame, options(1, 0)).expect("batch");
        assert_eq!(batch.len(), 4);

        let first = batch.inputs().expect("first read").to_vec();
        let second = batch.inputs().expect("second read");
        assert_eq!(first, second);
        assert_eq!(first[3].channel(0), &[normalized(40)]);
    }
}
