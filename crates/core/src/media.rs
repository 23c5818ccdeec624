//! Media track abstraction: the seam between the frame pipeline and whatever
//! demuxes/muxes the container.
//!
//! One reader serves both tracks and is pulled sample-by-sample; one writer
//! accepts interleaved appends and signals back-pressure per track. The
//! session checks tracks via `probe` before any writer resource exists.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use crate::types::{RawSample, Resolution, SourceInfo, TrackKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStatus {
    Idle,
    Reading,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterStatus {
    Idle,
    Writing,
    Finished,
    Failed,
}

/// Demuxer-side track source.
pub trait TrackReader: Send {
    fn start_reading(&mut self) -> Result<()>;
    fn status(&self) -> ReaderStatus;
    /// The fault that moved `status` to `Failed`, if any.
    fn error(&self) -> Option<String>;
    /// Next decoded sample for `track`; `None` at end of track.
    fn next_sample(&mut self, track: TrackKind) -> Option<RawSample>;
}

/// Muxer-side track sink.
pub trait TrackWriter: Send {
    fn start_writing(&mut self) -> Result<()>;
    fn start_session(&mut self, at: Duration) -> Result<()>;
    /// Demand signal: a pump only does work while its sink wants more data.
    fn is_ready_for_more_data(&self, track: TrackKind) -> bool;
    fn append(&mut self, track: TrackKind, sample: RawSample) -> Result<()>;
    /// Finalize the container. Called at most once, only after both pumps
    /// have finished.
    fn finish_writing(&mut self) -> Result<()>;
    fn status(&self) -> WriterStatus;
    fn error(&self) -> Option<String>;
}

/// Parameters the writer needs to set up its video sink.
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub resolution: Resolution,
    pub fps: f64,
}

/// Factory for readers and writers, letting the session defer writer
/// creation until the source's tracks have been verified.
pub trait MediaBackend: Send + Sync {
    fn probe(&self, path: &Path) -> Result<SourceInfo>;
    fn open_reader(&self, path: &Path, info: &SourceInfo) -> Result<Box<dyn TrackReader>>;
    fn create_writer(&self, path: &Path, settings: &WriterSettings)
        -> Result<Box<dyn TrackWriter>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_compare_by_variant() {
        assert_eq!(ReaderStatus::Reading, ReaderStatus::Reading);
        assert_ne!(ReaderStatus::Reading, ReaderStatus::Failed);
        assert_ne!(WriterStatus::Writing, WriterStatus::Finished);
    }

    #[test]
    fn reader_trait_is_object_safe() {
        struct Empty;
        impl TrackReader for Empty {
            fn start_reading(&mut self) -> Result<()> {
                Ok(())
            }
            fn status(&self) -> ReaderStatus {
                ReaderStatus::Completed
            }
            fn error(&self) -> Option<String> {
                None
            }
            fn next_sample(&mut self, _track: TrackKind) -> Option<RawSample> {
                None
            }
        }

        let mut reader: Box<dyn TrackReader> = Box::new(Empty);
        assert!(reader.next_sample(TrackKind::Video).is_none());
        assert_eq!(reader.status(), ReaderStatus::Completed);
    }
}
