use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bytes per pixel of the raw frame format flowing through the pipeline
/// (ARGB, alpha first; the layout the decoder is asked to emit).
pub const BYTES_PER_PIXEL: usize = 4;

/// Pixel dimensions of a frame or video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Output resolution for an integer upscale ratio.
    pub fn scaled(&self, ratio: u32) -> Self {
        Self {
            width: self.width * ratio,
            height: self.height * ratio,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One decoded or encoded video image: raw ARGB bytes plus the presentation
/// timestamp carried over from the source.
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub resolution: Resolution,
    pub pts: Duration,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, resolution: Resolution, pts: Duration) -> Self {
        Self {
            data,
            resolution,
            pts,
        }
    }

    /// Expected buffer length for this frame's dimensions.
    pub fn expected_len(&self) -> usize {
        self.resolution.pixel_count() * BYTES_PER_PIXEL
    }
}

/// Which track a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// An undecoded unit of track data as moved between reader and writer.
/// Video samples carry one raw ARGB frame; audio samples carry a PCM chunk.
pub struct RawSample {
    pub data: Vec<u8>,
    pub pts: Duration,
}

impl RawSample {
    pub fn new(data: Vec<u8>, pts: Duration) -> Self {
        Self { data, pts }
    }
}

/// What probing the source established before conversion starts.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub resolution: Resolution,
    pub duration: Duration,
    pub fps: f64,
    pub has_video: bool,
    pub has_audio: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_scaled_multiplies_both_axes() {
        let res = Resolution::new(640, 360);
        assert_eq!(res.scaled(2), Resolution::new(1280, 720));
        assert_eq!(res.scaled(1), res);
    }

    #[test]
    fn resolution_display_formats_wxh() {
        assert_eq!(Resolution::new(1920, 1080).to_string(), "1920x1080");
    }

    #[test]
    fn frame_expected_len_counts_four_bytes_per_pixel() {
        let frame = VideoFrame::new(vec![0; 4 * 6], Resolution::new(3, 2), Duration::ZERO);
        assert_eq!(frame.expected_len(), 24);
        assert_eq!(frame.data.len(), frame.expected_len());
    }
}
