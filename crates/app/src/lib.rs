use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use tilescale_core::config::{
    config_path, data_dir, initialize_data_dir, preset_options, resolve_relative_to, AppConfig,
};
use tilescale_core::engine::{resolve_trt_cache_dir, EngineConfig, InferenceBackend, OrtEngine};
use tilescale_core::error::ConvertError;
use tilescale_core::ffmpeg::FfmpegBackend;
use tilescale_core::logging::{self, FileSinkPlan, LoggingInitOptions, DEFAULT_LOG_FILTER};
use tilescale_core::session::{ConversionSession, SessionSnapshot, SessionState};

#[derive(Parser)]
#[command(name = "tilescale", about = "Tile-based AI video upscaling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    Convert(ConvertArgs),
}

#[derive(Args)]
struct ConvertArgs {
    #[arg(help = "Path to the source video file")]
    input: PathBuf,
    #[arg(short = 'o', long, help = "Path to write the upscaled video")]
    output: PathBuf,
    #[arg(long, help = "Tile preset (scale2x or filter1x)")]
    preset: Option<String>,
    #[arg(long, help = "Override the ONNX model file")]
    model: Option<PathBuf>,
    #[arg(long, help = "Inference backend (cuda or tensorrt)")]
    backend: Option<String>,
}

pub async fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    init_logging(
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    );
    log_startup_metadata(&resolved_data_dir);

    match cli.command {
        Commands::Convert(args) => run_convert(args, resolved_data_dir).await,
    }
}

fn init_logging(data_dir: Option<&Path>, verbose: u8, cli_log_filter: Option<&str>) {
    let init_options = LoggingInitOptions {
        data_dir: data_dir.map(Path::to_path_buf),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };
    let init_plan = logging::compose_logging_init_plan(&init_options);
    let console_filter = init_plan.filters.console_filter;
    let file_filter = init_plan.filters.file_filter;

    match init_plan.file_sink {
        FileSinkPlan::Ready(ready) => {
            let console_env_filter = parse_env_filter_with_fallback(&console_filter, "console");
            let file_env_filter = parse_env_filter_with_fallback(&file_filter, "file");

            let subscriber = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_filter(console_env_filter),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(ready.appender)
                        .with_filter(file_env_filter),
                );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
            }
        }
        FileSinkPlan::Fallback(fallback) => {
            let attempted_log_dir = fallback
                .attempted_log_dir
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<none>".to_string());
            let reason = fallback.reason;

            let console_env_filter = parse_env_filter_with_fallback(&console_filter, "console");
            let subscriber = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(console_env_filter),
            );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            warn!(
                attempted_log_dir = %attempted_log_dir,
                reason = %reason,
                "Persistent file logging unavailable; continuing with console-only logging"
            );
        }
    }
}

fn parse_env_filter_with_fallback(filter: &str, sink_name: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid {sink_name} log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn log_startup_metadata(data_dir: &Path) {
    let pid = std::process::id();
    let cfg_path = config_path(data_dir);
    info!(
        pid,
        data_dir = %data_dir.display(),
        config_path = %cfg_path.display(),
        "Runtime startup metadata"
    );
}

async fn run_convert(args: ConvertArgs, data_dir: PathBuf) -> Result<()> {
    if !args.input.exists() {
        bail!("input file does not exist: {}", args.input.display());
    }

    if let Err(error) = initialize_data_dir(&data_dir) {
        warn!(error = %format!("{error:#}"), "Failed to initialize data directory");
    }
    let cfg_path = config_path(&data_dir);
    let config = match AppConfig::load_from_path(&cfg_path) {
        Ok(config) => config,
        Err(error) => {
            warn!(error = %format!("{error:#}"), "Failed to load config file, using defaults");
            AppConfig::default()
        }
    };

    let preset_name = args.preset.unwrap_or(config.conversion.preset);
    let options = preset_options(&preset_name).with_context(|| {
        format!("unknown preset '{preset_name}' (expected scale2x or filter1x)")
    })?;

    let models_dir = resolve_relative_to(&data_dir, &config.paths.models_dir);
    let model_path =
        resolve_relative_to(&models_dir, &args.model.unwrap_or(config.conversion.model));
    let backend_name = args.backend.unwrap_or(config.conversion.backend);
    let backend = InferenceBackend::from_str_lossy(&backend_name);
    let trt_cache_base = resolve_relative_to(&data_dir, &config.paths.trt_cache_dir);
    let trt_cache_dir = resolve_trt_cache_dir(
        &trt_cache_base,
        model_path.file_stem().and_then(|stem| stem.to_str()),
    );

    info!(
        preset = %preset_name,
        model = %model_path.display(),
        %backend,
        "Loading inference engine"
    );

    let engine_config = EngineConfig {
        model_path,
        backend,
        trt_cache_dir: Some(trt_cache_dir),
    };
    let engine = tokio::task::spawn_blocking(move || OrtEngine::load(&engine_config))
        .await
        .context("engine load task panicked")?
        .context("failed to load inference engine")?;

    let session = Arc::new(ConversionSession::new(
        args.input,
        args.output,
        options,
        Arc::new(FfmpegBackend),
        Box::new(engine),
    ));

    {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!();
                info!("Interrupt received; cancelling conversion");
                session.cancel();
            }
        });
    }

    let mut events = session.subscribe();
    let start = Instant::now();
    session.begin_conversion();

    loop {
        events
            .changed()
            .await
            .context("conversion session dropped")?;
        let snap = events.borrow_and_update().clone();
        print_progress(&snap, start.elapsed().as_secs_f64());

        match snap.state {
            SessionState::Processing => {}
            SessionState::Finished => {
                eprintln!();
                info!(output = %session.output().display(), "Conversion finished");
                return Ok(());
            }
            SessionState::Failed => {
                eprintln!();
                bail!(
                    "conversion failed: {}",
                    snap.error.as_deref().unwrap_or("unknown error")
                );
            }
            SessionState::Queued => {
                // The session holds no error after a cancel; the CLI still
                // exits non-zero because no output was produced.
                eprintln!();
                info!("Conversion cancelled");
                return Err(ConvertError::UserCancelled.into());
            }
        }
    }
}

fn print_progress(snap: &SessionSnapshot, elapsed_secs: f64) {
    eprint!("\r{}    ", render_progress_line(snap, elapsed_secs));
}

const PROGRESS_BAR_WIDTH: usize = 30;

fn render_progress_line(snap: &SessionSnapshot, elapsed_secs: f64) -> String {
    let fraction = snap.progress.clamp(0.0, 1.0);
    let filled = (fraction * PROGRESS_BAR_WIDTH as f64).round() as usize;
    let empty = PROGRESS_BAR_WIDTH.saturating_sub(filled);
    let bar: String = "█".repeat(filled) + &"░".repeat(empty);

    let eta = if snap.frames_per_second > 0.0 && fraction > 0.0 && fraction < 1.0 {
        let remaining = elapsed_secs * (1.0 - fraction) / fraction;
        format!(" | ETA: {}", format_duration(remaining))
    } else {
        String::new()
    };

    format!(
        "[{bar}] {:5.1}% | {} | {:.1} fps | Elapsed: {}{eta}",
        fraction * 100.0,
        snap.label(),
        snap.frames_per_second,
        format_duration(elapsed_secs),
    )
}

fn format_duration(secs: f64) -> String {
    let total = secs.round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: SessionState, progress: f64, fps: f64) -> SessionSnapshot {
        let mut snap = SessionSnapshot::initial();
        snap.state = state;
        snap.progress = progress;
        snap.frames_per_second = fps;
        snap
    }

    #[test]
    fn format_duration_renders_hours_minutes_seconds() {
        assert_eq!(format_duration(0.0), "00:00:00");
        assert_eq!(format_duration(61.4), "00:01:01");
        assert_eq!(format_duration(3661.0), "01:01:01");
    }

    #[test]
    fn progress_line_shows_percent_state_and_eta() {
        let line = render_progress_line(&snapshot(SessionState::Processing, 0.5, 12.0), 10.0);
        assert!(line.contains("50.0%"), "line: {line}");
        assert!(line.contains("Processing"), "line: {line}");
        assert!(line.contains("12.0 fps"), "line: {line}");
        assert!(line.contains("ETA: 00:00:10"), "line: {line}");
    }

    #[test]
    fn progress_line_omits_eta_without_throughput() {
        let line = render_progress_line(&snapshot(SessionState::Processing, 0.0, 0.0), 5.0);
        assert!(!line.contains("ETA"), "line: {line}");
    }

    #[test]
    fn progress_line_reports_cancelling() {
        let mut snap = snapshot(SessionState::Processing, 0.25, 3.0);
        snap.cancelling = true;
        let line = render_progress_line(&snap, 4.0);
        assert!(line.contains("Cancelling"), "line: {line}");
    }
}
