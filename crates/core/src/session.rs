//! Conversion session: one input→output transcode task.
//!
//! A session owns its reader/writer pair for the duration of a run and
//! drives two track pumps on blocking worker threads: video (decode, tile,
//! infer, collect, encode) and audio (verbatim copy). The pumps share
//! exactly two things: the interrupt flag and the published snapshot. The
//! writer is finalized only after both pumps have returned, by joining their
//! task handles rather than polling both-finished flags.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::collect::collect;
use crate::engine::InferenceEngine;
use crate::error::ConvertError;
use crate::extract::TileBatch;
use crate::media::{
    MediaBackend, ReaderStatus, TrackReader, TrackWriter, WriterSettings, WriterStatus,
};
use crate::tile::TileOptions;
use crate::types::{RawSample, Resolution, SourceInfo, TrackKind, VideoFrame};

/// How long a pump sleeps when its sink reports no demand.
const WRITER_POLL_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Queued,
    Processing,
    Finished,
    Failed,
}

/// Read-only view of the session published over a watch channel on every
/// state change and progress update.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub progress: f64,
    pub frames_per_second: f64,
    pub error: Option<String>,
    /// Interrupt requested but not yet honored; a cancellation may take one
    /// frame-iteration to land.
    pub cancelling: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub input_resolution: Option<Resolution>,
    pub output_resolution: Option<Resolution>,
}

impl SessionSnapshot {
    pub fn initial() -> Self {
        Self {
            state: SessionState::Queued,
            progress: 0.0,
            frames_per_second: 0.0,
            error: None,
            cancelling: false,
            started_at: None,
            input_resolution: None,
            output_resolution: None,
        }
    }

    /// User-facing state label; cancellation in flight is reported distinctly
    /// from plain processing.
    pub fn label(&self) -> &'static str {
        match self.state {
            SessionState::Processing if self.cancelling => "Cancelling",
            SessionState::Processing => "Processing",
            SessionState::Queued => "Queued",
            SessionState::Finished => "Finished",
            SessionState::Failed => "Failed",
        }
    }
}

/// How a pump ended its loop.
enum PumpEnd {
    Completed,
    Interrupted,
    Failed(ConvertError),
}

pub struct ConversionSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    input: PathBuf,
    output: PathBuf,
    options: TileOptions,
    backend: Arc<dyn MediaBackend>,
    /// Taken by the video pump for the duration of a run, restored before the
    /// terminal state transition.
    engine: Mutex<Option<Box<dyn InferenceEngine>>>,
    interrupt: AtomicBool,
    snapshot: Mutex<SessionSnapshot>,
    events: watch::Sender<SessionSnapshot>,
}

type SharedReader = Arc<Mutex<Box<dyn TrackReader>>>;
type SharedWriter = Arc<Mutex<Box<dyn TrackWriter>>>;

impl ConversionSession {
    pub fn new(
        input: PathBuf,
        output: PathBuf,
        options: TileOptions,
        backend: Arc<dyn MediaBackend>,
        engine: Box<dyn InferenceEngine>,
    ) -> Self {
        let (events, _) = watch::channel(SessionSnapshot::initial());
        Self {
            inner: Arc::new(SessionInner {
                input,
                output,
                options,
                backend,
                engine: Mutex::new(Some(engine)),
                interrupt: AtomicBool::new(false),
                snapshot: Mutex::new(SessionSnapshot::initial()),
                events,
            }),
        }
    }

    pub fn input(&self) -> &Path {
        &self.inner.input
    }

    pub fn output(&self) -> &Path {
        &self.inner.output
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.lock().unwrap().clone()
    }

    /// Subscribe to state-change and progress events.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.events.subscribe()
    }

    /// Start the conversion off the caller's thread. No-op if the session is
    /// already processing.
    pub fn begin_conversion(&self) {
        {
            let mut snap = self.inner.snapshot.lock().unwrap();
            if snap.state == SessionState::Processing {
                debug!("begin_conversion ignored: session already processing");
                return;
            }
            snap.state = SessionState::Processing;
            snap.error = None;
            snap.cancelling = false;
            snap.started_at = Some(Utc::now());
            self.inner.interrupt.store(false, Ordering::SeqCst);
            self.inner.events.send_replace(snap.clone());
        }

        info!(
            input = %self.inner.input.display(),
            output = %self.inner.output.display(),
            "beginning conversion"
        );

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run().await });
    }

    /// Request cancellation. Does not block: the flag is polled at the top of
    /// every per-frame/per-sample iteration, so an in-flight inference call
    /// completes before the request lands.
    pub fn cancel(&self) {
        info!("cancelling conversion");
        self.inner.interrupt.store(true, Ordering::SeqCst);
        self.inner.update(|snap| snap.cancelling = true);
    }

    /// Return to `Queued`, clearing progress and error, or cancel if a run
    /// is in flight.
    pub fn reset(&self) {
        let processing = {
            let snap = self.inner.snapshot.lock().unwrap();
            snap.state == SessionState::Processing
        };

        if processing {
            self.cancel();
        } else {
            self.inner.update(|snap| {
                snap.state = SessionState::Queued;
                snap.progress = 0.0;
                snap.frames_per_second = 0.0;
                snap.error = None;
                snap.cancelling = false;
            });
        }
    }
}

impl SessionInner {
    fn update<F: FnOnce(&mut SessionSnapshot)>(&self, apply: F) {
        let mut snap = self.snapshot.lock().unwrap();
        apply(&mut snap);
        self.events.send_replace(snap.clone());
    }

    async fn run(self: Arc<Self>) {
        let setup = {
            let inner = self.clone();
            tokio::task::spawn_blocking(move || inner.setup()).await
        };

        let (reader, writer, info) = match setup {
            Ok(Ok(resources)) => resources,
            Ok(Err(err)) => {
                self.fail(err);
                return;
            }
            Err(join_err) => {
                self.fail(ConvertError::Reader(anyhow!("setup task panicked: {join_err}")));
                return;
            }
        };

        let Some(mut engine) = self.engine.lock().unwrap().take() else {
            self.fail(ConvertError::InferenceFailed(anyhow!(
                "inference engine unavailable"
            )));
            return;
        };

        let video_task = {
            let inner = self.clone();
            let reader = reader.clone();
            let writer = writer.clone();
            let info = info.clone();
            tokio::task::spawn_blocking(move || {
                let end = inner.run_video_pump(&reader, &writer, engine.as_mut(), &info);
                (end, engine)
            })
        };

        let audio_task = {
            let inner = self.clone();
            let reader = reader.clone();
            let writer = writer.clone();
            tokio::task::spawn_blocking(move || inner.run_audio_pump(&reader, &writer))
        };

        let (video_end, audio_end) = tokio::join!(video_task, audio_task);

        let video_end = match video_end {
            Ok((end, engine)) => {
                *self.engine.lock().unwrap() = Some(engine);
                end
            }
            Err(join_err) => {
                self.interrupt.store(true, Ordering::SeqCst);
                PumpEnd::Failed(ConvertError::InferenceFailed(anyhow!(
                    "video pump panicked: {join_err}"
                )))
            }
        };
        let audio_end = audio_end.unwrap_or(PumpEnd::Interrupted);

        self.finalize(video_end, audio_end, writer).await;
    }

    /// Probe, verify tracks, replace the destination, open the reader, and
    /// only then create the writer.
    #[allow(clippy::type_complexity)]
    fn setup(&self) -> Result<(SharedReader, SharedWriter, SourceInfo), ConvertError> {
        let info = self
            .backend
            .probe(&self.input)
            .map_err(ConvertError::Reader)?;

        if !info.has_video || !info.has_audio {
            return Err(ConvertError::TracksNotFound);
        }

        if self.output.exists() {
            debug!(path = %self.output.display(), "removing existing file at output location");
            std::fs::remove_file(&self.output).map_err(|source| {
                ConvertError::DestinationUnwritable {
                    path: self.output.clone(),
                    source,
                }
            })?;
        }

        let output_resolution = info.resolution.scaled(self.options.scale_ratio);
        self.update(|snap| {
            snap.input_resolution = Some(info.resolution);
            snap.output_resolution = Some(output_resolution);
        });

        let mut reader = self
            .backend
            .open_reader(&self.input, &info)
            .map_err(ConvertError::Reader)?;

        let settings = WriterSettings {
            resolution: output_resolution,
            fps: info.fps,
        };
        let mut writer = self
            .backend
            .create_writer(&self.output, &settings)
            .map_err(ConvertError::Writer)?;

        reader.start_reading().map_err(ConvertError::Reader)?;
        writer.start_writing().map_err(ConvertError::Writer)?;
        writer
            .start_session(Duration::ZERO)
            .map_err(ConvertError::Writer)?;

        debug!(
            resolution = %info.resolution,
            output = %output_resolution,
            fps = info.fps,
            duration_secs = info.duration.as_secs_f64(),
            "reader and writer started"
        );

        Ok((
            Arc::new(Mutex::new(reader)),
            Arc::new(Mutex::new(writer)),
            info,
        ))
    }

    /// One iteration per writer-ready opportunity: interrupt check, status
    /// checks, pull one frame, tile → infer → collect, re-stamp, append.
    fn run_video_pump(
        &self,
        reader: &SharedReader,
        writer: &SharedWriter,
        engine: &mut dyn InferenceEngine,
        info: &SourceInfo,
    ) -> PumpEnd {
        let output_size = info.resolution.scaled(self.options.scale_ratio);
        let mut previous_frame_at: Option<Instant> = None;

        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                debug!("video pump interrupted");
                return PumpEnd::Interrupted;
            }

            {
                let writer_guard = writer.lock().unwrap();
                if writer_guard.status() == WriterStatus::Failed {
                    let cause = writer_guard
                        .error()
                        .unwrap_or_else(|| "writer failed".to_string());
                    drop(writer_guard);
                    self.interrupt.store(true, Ordering::SeqCst);
                    return PumpEnd::Failed(ConvertError::Writer(anyhow!(cause)));
                }
                if !writer_guard.is_ready_for_more_data(TrackKind::Video) {
                    drop(writer_guard);
                    std::thread::sleep(WRITER_POLL_INTERVAL);
                    continue;
                }
            }

            let sample = {
                let mut reader_guard = reader.lock().unwrap();
                match reader_guard.status() {
                    ReaderStatus::Reading => reader_guard.next_sample(TrackKind::Video),
                    ReaderStatus::Failed => {
                        let cause = reader_guard
                            .error()
                            .unwrap_or_else(|| "reader failed".to_string());
                        drop(reader_guard);
                        self.interrupt.store(true, Ordering::SeqCst);
                        return PumpEnd::Failed(ConvertError::Reader(anyhow!(cause)));
                    }
                    _ => return PumpEnd::Completed,
                }
            };

            let Some(sample) = sample else {
                // A nil sample is either end-of-track or the moment a fault
                // surfaced; the reader's status tells them apart.
                let reader_guard = reader.lock().unwrap();
                if reader_guard.status() == ReaderStatus::Failed {
                    let cause = reader_guard
                        .error()
                        .unwrap_or_else(|| "reader failed".to_string());
                    drop(reader_guard);
                    self.interrupt.store(true, Ordering::SeqCst);
                    return PumpEnd::Failed(ConvertError::Reader(anyhow!(cause)));
                }
                debug!("reached the end of video frames");
                return PumpEnd::Completed;
            };

            let pts = sample.pts;
            let upscaled = match self.process_frame(sample, engine, info, output_size) {
                Ok(upscaled) => upscaled,
                Err(err) => {
                    self.interrupt.store(true, Ordering::SeqCst);
                    return PumpEnd::Failed(err);
                }
            };

            if let Err(err) = writer.lock().unwrap().append(TrackKind::Video, upscaled) {
                self.interrupt.store(true, Ordering::SeqCst);
                return PumpEnd::Failed(ConvertError::Writer(err));
            }

            let now = Instant::now();
            let fps = previous_frame_at
                .map(|prev| 1.0 / (now - prev).as_secs_f64().max(f64::EPSILON))
                .unwrap_or(0.0);
            previous_frame_at = Some(now);

            let duration = info.duration.as_secs_f64();
            let progress = if duration > 0.0 {
                (pts.as_secs_f64() / duration).clamp(0.0, 1.0)
            } else {
                0.0
            };
            self.update(|snap| {
                snap.progress = progress;
                snap.frames_per_second = fps;
            });
        }
    }

    fn process_frame(
        &self,
        sample: RawSample,
        engine: &mut dyn InferenceEngine,
        info: &SourceInfo,
        output_size: Resolution,
    ) -> Result<RawSample, ConvertError> {
        let frame = VideoFrame::new(sample.data, info.resolution, sample.pts);

        let mut batch = TileBatch::new(&frame, self.options)?;
        let grid = batch.grid();
        let inputs = batch.inputs()?;
        let outputs = engine.infer(inputs)?;

        let mut upscaled = collect(&outputs, grid, output_size, &self.options)?;
        upscaled.pts = frame.pts;
        Ok(RawSample::new(upscaled.data, upscaled.pts))
    }

    /// Same loop shape as the video pump, but samples are copied verbatim and
    /// reader faults fold into plain completion; the video pump classifies
    /// the shared reader's error.
    fn run_audio_pump(&self, reader: &SharedReader, writer: &SharedWriter) -> PumpEnd {
        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                debug!("audio pump interrupted");
                return PumpEnd::Interrupted;
            }

            {
                let writer_guard = writer.lock().unwrap();
                if writer_guard.status() == WriterStatus::Failed {
                    return PumpEnd::Completed;
                }
                if !writer_guard.is_ready_for_more_data(TrackKind::Audio) {
                    drop(writer_guard);
                    std::thread::sleep(WRITER_POLL_INTERVAL);
                    continue;
                }
            }

            let sample = {
                let mut reader_guard = reader.lock().unwrap();
                if reader_guard.status() != ReaderStatus::Reading {
                    return PumpEnd::Completed;
                }
                reader_guard.next_sample(TrackKind::Audio)
            };

            let Some(sample) = sample else {
                debug!("reached the end of the audio track");
                return PumpEnd::Completed;
            };

            if writer
                .lock()
                .unwrap()
                .append(TrackKind::Audio, sample)
                .is_err()
            {
                // Writer status flips to Failed; the video pump records it.
                return PumpEnd::Completed;
            }
        }
    }

    /// Runs exactly once, after both pumps have returned. Finalizes the
    /// writer only on a clean run; a cancelled or failed run abandons the
    /// partial output (the writer's teardown discards it).
    async fn finalize(&self, video_end: PumpEnd, audio_end: PumpEnd, writer: SharedWriter) {
        let first_error = match (video_end, audio_end) {
            (PumpEnd::Failed(err), _) => Some(err),
            (_, PumpEnd::Failed(err)) => Some(err),
            _ => None,
        };

        if let Some(err) = first_error {
            self.fail(err);
            return;
        }

        if self.interrupt.load(Ordering::SeqCst) {
            info!("conversion cancelled; returning to queue");
            self.update(|snap| {
                snap.state = SessionState::Queued;
                snap.cancelling = false;
                snap.frames_per_second = 0.0;
            });
            return;
        }

        let finish = tokio::task::spawn_blocking(move || writer.lock().unwrap().finish_writing())
            .await
            .unwrap_or_else(|join_err| Err(anyhow!("writer finalize panicked: {join_err}")));

        match finish {
            Ok(()) => {
                info!("finished writing output file");
                self.update(|snap| {
                    snap.progress = 1.0;
                    snap.frames_per_second = 0.0;
                    if snap.state == SessionState::Processing {
                        snap.state = SessionState::Finished;
                    }
                });
            }
            Err(err) => self.fail(ConvertError::Writer(err)),
        }
    }

    fn fail(&self, err: ConvertError) {
        // Flatten the cause chain so the stored message names the fault, not
        // just its category.
        let message = format!("{:#}", anyhow::Error::new(err));
        error!(error = %message, "conversion failed");
        self.interrupt.store(true, Ordering::SeqCst);
        self.update(|snap| {
            snap.state = SessionState::Failed;
            snap.error = Some(message);
            snap.cancelling = false;
            snap.frames_per_second = 0.0;
        });
    }
}
