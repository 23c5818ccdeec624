//! FFmpeg-backed media IO.
//!
//! The reader runs two decode subprocesses, one per track: video as raw ARGB
//! frames over stdout, audio as interleaved s16le PCM. The writer feeds an
//! encode subprocess over stdin and spools audio PCM to a sidecar file, then
//! muxes the two in `finish_writing`. Every subprocess has its stderr drained
//! in a background thread and is killed on [`Drop`].

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, warn};

use crate::media::{
    MediaBackend, ReaderStatus, TrackReader, TrackWriter, WriterSettings, WriterStatus,
};
use crate::types::{RawSample, Resolution, SourceInfo, TrackKind, BYTES_PER_PIXEL};

const AUDIO_SAMPLE_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u32 = 2;
/// s16le stereo: 4 bytes per audio frame.
const AUDIO_BYTES_PER_FRAME: usize = 4;
/// PCM read granularity: 4096 audio frames per sample.
const AUDIO_CHUNK: usize = 4096 * AUDIO_BYTES_PER_FRAME;

// ffprobe JSON model (serde)
// ---------------------------------------------------------------------------

#[derive(serde::Deserialize, Debug)]
pub struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(serde::Deserialize, Debug)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

#[derive(serde::Deserialize, Debug)]
struct FfprobeFormat {
    duration: Option<String>,
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() == 2 {
        let num: f64 = parts[0].parse().ok()?;
        let den: f64 = parts[1].parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
    }
    s.parse().ok()
}

pub fn parse_ffprobe_json(json: &[u8]) -> Result<FfprobeOutput> {
    serde_json::from_slice(json).context("failed to parse ffprobe JSON")
}

pub fn source_info_from_probe(probe: &FfprobeOutput) -> Result<SourceInfo> {
    let video = probe
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"));
    let has_audio = probe
        .streams
        .iter()
        .any(|stream| stream.codec_type.as_deref() == Some("audio"));

    let (resolution, fps) = match video {
        Some(stream) => {
            let width = stream.width.ok_or_else(|| anyhow!("video stream missing width"))?;
            let height = stream
                .height
                .ok_or_else(|| anyhow!("video stream missing height"))?;

            let fps_str = stream
                .r_frame_rate
                .as_deref()
                .or(stream.avg_frame_rate.as_deref())
                .unwrap_or("0/0");
            let fps = parse_frame_rate(fps_str).unwrap_or(0.0);
            if fps <= 0.0 {
                warn!("could not determine frame rate (got {fps_str}), defaulting to 23.976");
            }
            let fps = if fps <= 0.0 { 23.976 } else { fps };

            (Resolution::new(width, height), fps)
        }
        None => (Resolution::new(0, 0), 0.0),
    };

    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|s| s.parse::<f64>().ok())
        .map(Duration::from_secs_f64)
        .unwrap_or(Duration::ZERO);

    Ok(SourceInfo {
        resolution,
        duration,
        fps,
        has_video: video.is_some(),
        has_audio,
    })
}

fn run_ffprobe(path: &Path) -> Result<FfprobeOutput> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("failed to execute ffprobe; is FFmpeg installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        );
    }

    parse_ffprobe_json(&output.stdout)
}

// Subprocess argument builders
// ---------------------------------------------------------------------------

fn build_video_decode_args(path: &Path) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-i".to_string(),
        path.to_string_lossy().into_owned(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "argb".to_string(),
        "-vsync".to_string(),
        "cfr".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "pipe:1".to_string(),
    ]
}

fn build_audio_decode_args(path: &Path) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-i".to_string(),
        path.to_string_lossy().into_owned(),
        "-map".to_string(),
        "0:a:0".to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        AUDIO_SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        AUDIO_CHANNELS.to_string(),
        "-v".to_string(),
        "error".to_string(),
        "pipe:1".to_string(),
    ]
}

fn build_encode_args(settings: &WriterSettings, video_temp: &Path) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "argb".to_string(),
        "-s".to_string(),
        format!("{}x{}", settings.resolution.width, settings.resolution.height),
        "-r".to_string(),
        format!("{}", settings.fps),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-an".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-crf".to_string(),
        "18".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-v".to_string(),
        "error".to_string(),
        video_temp.to_string_lossy().into_owned(),
    ]
}

fn build_mux_args(video_temp: &Path, audio_temp: &Path, output: &Path) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        video_temp.to_string_lossy().into_owned(),
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        AUDIO_SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        AUDIO_CHANNELS.to_string(),
        "-i".to_string(),
        audio_temp.to_string_lossy().into_owned(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-v".to_string(),
        "error".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

fn spawn_stderr_drain(child: &mut Child, target_name: &'static str) -> Option<JoinHandle<()>> {
    let stderr = child.stderr.take()?;
    Some(thread::spawn(move || {
        let reader = BufReader::new(stderr);
        for line in reader.lines() {
            match line {
                Ok(line) if !line.is_empty() => {
                    debug!(target: "ffmpeg_stderr", "{target_name}: {line}");
                }
                Err(e) => {
                    debug!(target: "ffmpeg_stderr", "{target_name}: read error: {e}");
                    break;
                }
                _ => {}
            }
        }
    }))
}

fn read_exact_or_eof(stdout: &mut ChildStdout, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match stdout.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("failed to read from ffmpeg stdout"),
        }
    }
    Ok(total)
}

struct DecodeProcess {
    child: Child,
    stdout: ChildStdout,
    _stderr_thread: Option<JoinHandle<()>>,
}

impl DecodeProcess {
    fn spawn(args: &[String], target_name: &'static str) -> Result<Self> {
        let mut child = Command::new("ffmpeg")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to launch ffmpeg; is it installed?")?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("ffmpeg stdout not available"))?;
        let stderr_thread = spawn_stderr_drain(&mut child, target_name);

        Ok(Self {
            child,
            stdout,
            _stderr_thread: stderr_thread,
        })
    }
}

impl Drop for DecodeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(handle) = self._stderr_thread.take() {
            let _ = handle.join();
        }
    }
}

// Reader
// ---------------------------------------------------------------------------

/// Decodes both tracks of a source file through FFmpeg subprocesses. Video
/// timestamps come from the frame counter over the constant frame rate; audio
/// timestamps from the PCM byte offset.
pub struct FfmpegReader {
    path: PathBuf,
    resolution: Resolution,
    fps: f64,
    status: ReaderStatus,
    error: Option<String>,
    video: Option<DecodeProcess>,
    audio: Option<DecodeProcess>,
    frame_index: u64,
    audio_bytes: u64,
    video_done: bool,
    audio_done: bool,
}

impl FfmpegReader {
    fn new(path: &Path, info: &SourceInfo) -> Self {
        Self {
            path: path.to_path_buf(),
            resolution: info.resolution,
            fps: info.fps,
            status: ReaderStatus::Idle,
            error: None,
            video: None,
            audio: None,
            frame_index: 0,
            audio_bytes: 0,
            video_done: false,
            audio_done: false,
        }
    }

    fn frame_size(&self) -> usize {
        self.resolution.pixel_count() * BYTES_PER_PIXEL
    }

    fn fail(&mut self, message: String) {
        warn!(error = %message, "reader failed");
        self.status = ReaderStatus::Failed;
        self.error = Some(message);
    }

    fn next_video(&mut self) -> Option<RawSample> {
        if self.video_done {
            return None;
        }
        let frame_size = self.frame_size();
        let mut buf = vec![0u8; frame_size];

        let process = self.video.as_mut()?;
        match read_exact_or_eof(&mut process.stdout, &mut buf) {
            Ok(0) => {
                self.video_done = true;
                if self.audio_done {
                    self.status = ReaderStatus::Completed;
                }
                None
            }
            Ok(n) if n < frame_size => {
                self.fail(format!("partial video frame at EOF ({n}/{frame_size} bytes)"));
                None
            }
            Ok(_) => {
                let pts = Duration::from_secs_f64(self.frame_index as f64 / self.fps);
                self.frame_index += 1;
                Some(RawSample::new(buf, pts))
            }
            Err(e) => {
                self.fail(format!("{e:#}"));
                None
            }
        }
    }

    fn next_audio(&mut self) -> Option<RawSample> {
        if self.audio_done {
            return None;
        }
        let mut buf = vec![0u8; AUDIO_CHUNK];

        let process = self.audio.as_mut()?;
        match read_exact_or_eof(&mut process.stdout, &mut buf) {
            Ok(0) => {
                self.audio_done = true;
                if self.video_done {
                    self.status = ReaderStatus::Completed;
                }
                None
            }
            Ok(n) => {
                buf.truncate(n);
                let bytes_per_second = (AUDIO_SAMPLE_RATE as usize * AUDIO_BYTES_PER_FRAME) as f64;
                let pts = Duration::from_secs_f64(self.audio_bytes as f64 / bytes_per_second);
                self.audio_bytes += n as u64;
                Some(RawSample::new(buf, pts))
            }
            Err(e) => {
                self.fail(format!("{e:#}"));
                None
            }
        }
    }
}

impl TrackReader for FfmpegReader {
    fn start_reading(&mut self) -> Result<()> {
        let video_args = build_video_decode_args(&self.path);
        let audio_args = build_audio_decode_args(&self.path);

        debug!(path = %self.path.display(), "launching FFmpeg decoders");

        self.video = Some(DecodeProcess::spawn(&video_args, "video_decode")?);
        self.audio = Some(DecodeProcess::spawn(&audio_args, "audio_decode")?);
        self.status = ReaderStatus::Reading;
        Ok(())
    }

    fn status(&self) -> ReaderStatus {
        self.status
    }

    fn error(&self) -> Option<String> {
        self.error.clone()
    }

    fn next_sample(&mut self, track: TrackKind) -> Option<RawSample> {
        if self.status != ReaderStatus::Reading {
            return None;
        }
        match track {
            TrackKind::Video => self.next_video(),
            TrackKind::Audio => self.next_audio(),
        }
    }
}

// Writer
// ---------------------------------------------------------------------------

/// Encodes video through an FFmpeg subprocess into a sidecar file and spools
/// audio PCM alongside; `finish_writing` muxes the two into the destination
/// and removes the sidecars. A writer dropped before finishing leaves no
/// playable output.
pub struct FfmpegWriter {
    output: PathBuf,
    settings: WriterSettings,
    video_temp: PathBuf,
    audio_temp: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_thread: Option<JoinHandle<()>>,
    audio_file: Option<File>,
    status: WriterStatus,
    error: Option<String>,
    frame_size: usize,
}

impl FfmpegWriter {
    fn new(output: &Path, settings: &WriterSettings) -> Self {
        let video_temp = sidecar_path(output, "video.mp4");
        let audio_temp = sidecar_path(output, "audio.pcm");
        let frame_size = settings.resolution.pixel_count() * BYTES_PER_PIXEL;
        Self {
            output: output.to_path_buf(),
            settings: settings.clone(),
            video_temp,
            audio_temp,
            child: None,
            stdin: None,
            stderr_thread: None,
            audio_file: None,
            status: WriterStatus::Idle,
            error: None,
            frame_size,
        }
    }

    fn fail(&mut self, message: String) {
        warn!(error = %message, "writer failed");
        self.status = WriterStatus::Failed;
        self.error = Some(message);
    }

    fn remove_sidecars(&self) {
        let _ = std::fs::remove_file(&self.video_temp);
        let _ = std::fs::remove_file(&self.audio_temp);
    }

    fn append_video(&mut self, sample: RawSample) -> Result<()> {
        if sample.data.len() != self.frame_size {
            bail!(
                "frame size mismatch: expected {} bytes, got {}",
                self.frame_size,
                sample.data.len()
            );
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("encoder stdin already closed"))?;
        stdin
            .write_all(&sample.data)
            .context("failed to write frame to ffmpeg stdin")
    }

    fn append_audio(&mut self, sample: RawSample) -> Result<()> {
        let file = self
            .audio_file
            .as_mut()
            .ok_or_else(|| anyhow!("audio sidecar not open"))?;
        file.write_all(&sample.data)
            .context("failed to write audio PCM")
    }
}

fn sidecar_path(output: &Path, suffix: &str) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!(".{name}.{suffix}"))
}

impl TrackWriter for FfmpegWriter {
    fn start_writing(&mut self) -> Result<()> {
        let args = build_encode_args(&self.settings, &self.video_temp);
        debug!(
            cmd = %format!("ffmpeg {}", args.join(" ")),
            "launching FFmpeg encoder"
        );

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to launch ffmpeg; is it installed?")?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to open ffmpeg stdin"))?;
        self.stderr_thread = spawn_stderr_drain(&mut child, "video_encode");

        self.audio_file = Some(
            File::create(&self.audio_temp)
                .with_context(|| format!("failed to create {}", self.audio_temp.display()))?,
        );

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.status = WriterStatus::Writing;
        Ok(())
    }

    fn start_session(&mut self, at: Duration) -> Result<()> {
        if at != Duration::ZERO {
            bail!("only zero-offset sessions are supported");
        }
        Ok(())
    }

    fn is_ready_for_more_data(&self, _track: TrackKind) -> bool {
        // The pipe's own buffering provides back-pressure.
        self.status == WriterStatus::Writing
    }

    fn append(&mut self, track: TrackKind, sample: RawSample) -> Result<()> {
        if self.status != WriterStatus::Writing {
            bail!("writer is not accepting data");
        }
        let result = match track {
            TrackKind::Video => self.append_video(sample),
            TrackKind::Audio => self.append_audio(sample),
        };
        if let Err(ref e) = result {
            self.fail(format!("{e:#}"));
        }
        result
    }

    fn finish_writing(&mut self) -> Result<()> {
        drop(self.stdin.take());
        drop(self.audio_file.take());

        let mut child = self
            .child
            .take()
            .ok_or_else(|| anyhow!("writer was never started"))?;
        let status = child.wait().context("failed to wait for ffmpeg")?;
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
        if !status.success() {
            self.remove_sidecars();
            self.status = WriterStatus::Failed;
            bail!("ffmpeg encoder exited with status {status}");
        }

        let mux_args = build_mux_args(&self.video_temp, &self.audio_temp, &self.output);
        debug!(
            cmd = %format!("ffmpeg {}", mux_args.join(" ")),
            "muxing final output"
        );
        let mux = Command::new("ffmpeg")
            .args(&mux_args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .context("failed to run ffmpeg mux")?;

        self.remove_sidecars();

        if !mux.status.success() {
            self.status = WriterStatus::Failed;
            let stderr = String::from_utf8_lossy(&mux.stderr);
            bail!(
                "ffmpeg mux exited with status {}: {}",
                mux.status,
                stderr.trim()
            );
        }

        self.status = WriterStatus::Finished;
        debug!(path = %self.output.display(), "output file finalized");
        Ok(())
    }

    fn status(&self) -> WriterStatus {
        self.status
    }

    fn error(&self) -> Option<String> {
        self.error.clone()
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        drop(self.audio_file.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
        if self.status != WriterStatus::Finished {
            self.remove_sidecars();
        }
    }
}

// Backend
// ---------------------------------------------------------------------------

pub struct FfmpegBackend;

impl MediaBackend for FfmpegBackend {
    fn probe(&self, path: &Path) -> Result<SourceInfo> {
        if !path.exists() {
            bail!("input file does not exist: {}", path.display());
        }
        debug!(path = %path.display(), "running ffprobe");
        let probe = run_ffprobe(path)?;
        source_info_from_probe(&probe)
    }

    fn open_reader(&self, path: &Path, info: &SourceInfo) -> Result<Box<dyn TrackReader>> {
        Ok(Box::new(FfmpegReader::new(path, info)))
    }

    fn create_writer(
        &self,
        path: &Path,
        settings: &WriterSettings,
    ) -> Result<Box<dyn TrackWriter>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                bail!("output directory does not exist: {}", parent.display());
            }
        }
        Ok(Box::new(FfmpegWriter::new(path, settings)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FFPROBE_JSON: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "h264",
                "codec_type": "video",
                "width": 640,
                "height": 360,
                "r_frame_rate": "24000/1001",
                "avg_frame_rate": "24000/1001"
            },
            {
                "index": 1,
                "codec_name": "aac",
                "codec_type": "audio"
            }
        ],
        "format": {
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": "120.500000"
        }
    }"#;

    #[test]
    fn probe_json_yields_source_info() {
        let probe = parse_ffprobe_json(SAMPLE_FFPROBE_JSON.as_bytes()).unwrap();
        let info = source_info_from_probe(&probe).unwrap();

        assert_eq!(info.resolution, Resolution::new(640, 360));
        assert!((info.fps - 23.976).abs() < 0.01);
        assert!((info.duration.as_secs_f64() - 120.5).abs() < 0.001);
        assert!(info.has_video);
        assert!(info.has_audio);
    }

    #[test]
    fn probe_without_audio_is_flagged() {
        let json = r#"{
            "streams": [
                {
                    "codec_type": "video",
                    "width": 1280, "height": 720,
                    "r_frame_rate": "30/1"
                }
            ],
            "format": { "duration": "10.0" }
        }"#;
        let probe = parse_ffprobe_json(json.as_bytes()).unwrap();
        let info = source_info_from_probe(&probe).unwrap();
        assert!(info.has_video);
        assert!(!info.has_audio);
    }

    #[test]
    fn probe_without_video_is_flagged() {
        let json = r#"{
            "streams": [ { "codec_type": "audio" } ],
            "format": {}
        }"#;
        let probe = parse_ffprobe_json(json.as_bytes()).unwrap();
        let info = source_info_from_probe(&probe).unwrap();
        assert!(!info.has_video);
        assert!(info.has_audio);
        assert_eq!(info.duration, Duration::ZERO);
    }

    #[test]
    fn frame_rate_parses_rational_and_decimal() {
        let fps = parse_frame_rate("24000/1001").unwrap();
        assert!((fps - 23.976).abs() < 0.01);
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.001);
        assert!((parse_frame_rate("25").unwrap() - 25.0).abs() < 0.001);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn video_decode_args_request_argb_rawvideo() {
        let args = build_video_decode_args(Path::new("/tmp/in.mov"));
        assert!(args.contains(&"rawvideo".to_string()));
        assert!(args.contains(&"argb".to_string()));
        assert!(args.contains(&"pipe:1".to_string()));
        let map_idx = args.iter().position(|a| a == "-map").unwrap();
        assert_eq!(args[map_idx + 1], "0:v:0");
    }

    #[test]
    fn audio_decode_args_request_pcm() {
        let args = build_audio_decode_args(Path::new("/tmp/in.mov"));
        assert!(args.contains(&"s16le".to_string()));
        assert!(args.contains(&"48000".to_string()));
        let map_idx = args.iter().position(|a| a == "-map").unwrap();
        assert_eq!(args[map_idx + 1], "0:a:0");
    }

    #[test]
    fn encode_args_match_writer_settings() {
        let settings = WriterSettings {
            resolution: Resolution::new(1280, 720),
            fps: 24.0,
        };
        let args = build_encode_args(&settings, Path::new("/tmp/.out.mov.video.mp4"));
        assert_eq!(args[0], "-nostdin");
        assert!(args.contains(&"1280x720".to_string()));
        assert!(args.contains(&"24".to_string()));
        assert!(args.contains(&"pipe:0".to_string()));
        assert!(args.contains(&"-an".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/.out.mov.video.mp4");
    }

    #[test]
    fn mux_args_copy_video_and_encode_audio() {
        let args = build_mux_args(
            Path::new("/tmp/.out.mov.video.mp4"),
            Path::new("/tmp/.out.mov.audio.pcm"),
            Path::new("/tmp/out.mov"),
        );
        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "copy"));
        assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "aac"));
        assert_eq!(args.last().unwrap(), "/tmp/out.mov");
    }

    #[test]
    fn sidecars_live_next_to_the_output() {
        let video = sidecar_path(Path::new("/videos/out.mov"), "video.mp4");
        assert_eq!(video, Path::new("/videos/.out.mov.video.mp4"));
        let audio = sidecar_path(Path::new("/videos/out.mov"), "audio.pcm");
        assert_eq!(audio, Path::new("/videos/.out.mov.audio.pcm"));
    }

    #[test]
    fn reader_refuses_samples_before_start() {
        let info = SourceInfo {
            resolution: Resolution::new(2, 2),
            duration: Duration::from_secs(1),
            fps: 24.0,
            has_video: true,
            has_audio: true,
        };
        let mut reader = FfmpegReader::new(Path::new("/tmp/in.mov"), &info);
        assert_eq!(reader.status(), ReaderStatus::Idle);
        assert!(reader.next_sample(TrackKind::Video).is_none());
        assert!(reader.next_sample(TrackKind::Audio).is_none());
    }

    #[test]
    fn writer_rejects_appends_before_start() {
        let settings = WriterSettings {
            resolution: Resolution::new(2, 2),
            fps: 24.0,
        };
        let mut writer = FfmpegWriter::new(Path::new("/tmp/out.mov"), &settings);
        assert_eq!(writer.status(), WriterStatus::Idle);
        assert!(!writer.is_ready_for_more_data(TrackKind::Video));
        assert!(writer
            .append(
                TrackKind::Video,
                RawSample::new(vec![0; 16], Duration::ZERO)
            )
            .is_err());
    }

    #[test]
    fn writer_rejects_nonzero_session_offset() {
        let settings = WriterSettings {
            resolution: Resolution::new(2, 2),
            fps: 24.0,
        };
        let mut writer = FfmpegWriter::new(Path::new("/tmp/out.mov"), &settings);
        assert!(writer.start_session(Duration::ZERO).is_ok());
        assert!(writer.start_session(Duration::from_secs(1)).is_err());
    }
}
