use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use env_logger::Env;
use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use screenmachine::{
    BatchOptions, BatchOrchestrator, BatchProgress, BatchSummary, CompositionMode,
    MetadataProbe, Outcome, OutputFormat, PreviewSink, ProcessingConfig, ProgressInfo,
    ResizeFilter, RuntimeContext, Settings, batch::fit_preview, metadata,
};

#[cfg(feature = "native")]
use screenmachine::FfmpegLogLevel;

const CLI_AFTER_HELP: &str = "Examples:\n  screenmachine run videos sheets\n  screenmachine run videos sheets --rows 5 --columns 6 --format png --workers 4\n  screenmachine probe input.mp4 --json\n  screenmachine binaries\n  screenmachine completions zsh > _screenmachine";

const PREVIEW_MAX_WIDTH: u32 = 400;
const PREVIEW_MAX_HEIGHT: u32 = 600;

#[derive(Debug, Parser)]
#[command(
    name = "screenmachine",
    version,
    about = "Generate contact-sheet thumbnail grids from video files",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// FFmpeg library log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[cfg(feature = "native")]
    #[arg(long, global = true)]
    ffmpeg_log_level: Option<String>,

    /// JSON settings file; command-line flags override its values.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone, Default)]
struct RunArguments {
    /// Directory searched recursively for videos.
    input: PathBuf,
    /// Directory the sheets are written to.
    output: PathBuf,

    /// Grid rows.
    #[arg(long)]
    rows: Option<u32>,
    /// Grid columns.
    #[arg(long)]
    columns: Option<u32>,
    /// Largest cell size, as WIDTHxHEIGHT (e.g. 320x240).
    #[arg(long)]
    size: Option<String>,
    /// JPEG quality, 1-100.
    #[arg(long)]
    quality: Option<u32>,
    /// Output format: jpg | png.
    #[arg(long)]
    format: Option<String>,
    /// Worker threads (clamped to 1-16).
    #[arg(long)]
    workers: Option<usize>,
    /// Appended to each output file stem.
    #[arg(long)]
    suffix: Option<String>,
    /// Write every sheet directly into the output directory.
    #[arg(long)]
    flat: bool,
    /// Replace sheets that already exist.
    #[arg(long)]
    overwrite: bool,

    /// Hide the title line.
    #[arg(long)]
    no_title: bool,
    /// Hide the resolution line.
    #[arg(long)]
    no_resolution: bool,
    /// Hide the file size line.
    #[arg(long)]
    no_file_size: bool,
    /// Hide the duration line.
    #[arg(long)]
    no_duration: bool,
    /// Show the codec line.
    #[arg(long)]
    codec: bool,
    /// Draw a timestamp on each frame.
    #[arg(long)]
    timestamps: bool,

    /// Composition mode: resize-once | resize-each.
    #[arg(long)]
    mode: Option<String>,
    /// Resize filter: nearest | triangle | lanczos3.
    #[arg(long)]
    filter: Option<String>,

    /// Keep a downscaled copy of the latest sheet at this path.
    #[arg(long)]
    preview: Option<PathBuf>,
    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate a sheet for every video under a directory.
    #[command(
        about = "Generate contact sheets",
        after_help = "Examples:\n  screenmachine run videos sheets\n  screenmachine run videos sheets --flat --suffix _sheet --timestamps --preview preview.png"
    )]
    Run(RunArguments),

    /// Print metadata for one video.
    #[command(
        about = "Print video metadata",
        visible_alias = "info",
        after_help = "Examples:\n  screenmachine probe input.mp4\n  screenmachine probe input.mp4 --json"
    )]
    Probe {
        /// Input video path.
        input: PathBuf,

        /// Output metadata as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show which ffmpeg and ffprobe executables are used.
    #[command(about = "Locate decoder binaries")]
    Binaries,

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (width, height) = value.trim().split_once(['x', 'X', '×'])?;
    Some((width.trim().parse().ok()?, height.trim().parse().ok()?))
}

fn parse_composition_mode(value: &str) -> Option<CompositionMode> {
    match value.to_ascii_lowercase().replace('_', "-").as_str() {
        "resize-once" | "once" => Some(CompositionMode::ResizeOnce),
        "resize-each" | "each" => Some(CompositionMode::ResizeEach),
        _ => None,
    }
}

#[cfg(feature = "native")]
fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "panic" => Some(FfmpegLogLevel::Panic),
        "fatal" => Some(FfmpegLogLevel::Fatal),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "verbose" => Some(FfmpegLogLevel::Verbose),
        "debug" => Some(FfmpegLogLevel::Debug),
        "trace" => Some(FfmpegLogLevel::Trace),
        _ => None,
    }
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    let default_filter = if global.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    #[cfg(feature = "native")]
    if let Some(level) = &global.ffmpeg_log_level {
        let parsed =
            parse_log_level(level).ok_or(format!("unsupported --ffmpeg-log-level: {level}"))?;
        screenmachine::set_ffmpeg_log_level(parsed);
    }

    Ok(())
}

fn load_settings(global: &GlobalOptions) -> Result<Settings, Box<dyn std::error::Error>> {
    match &global.settings {
        Some(path) => Ok(Settings::load(path)?),
        None => Ok(Settings::default()),
    }
}

/// Settings file values overridden by whatever was given on the command line.
fn resolve_run_settings(
    settings: Settings,
    arguments: &RunArguments,
) -> Result<(ProcessingConfig, BatchOptions), Box<dyn std::error::Error>> {
    let current = settings.processing;
    let mut builder = current.to_builder();
    if let Some(rows) = arguments.rows {
        builder = builder.with_rows(rows);
    }
    if let Some(columns) = arguments.columns {
        builder = builder.with_columns(columns);
    }
    if let Some(size) = &arguments.size {
        let (width, height) = parse_size(size).ok_or(format!("invalid --size: {size}"))?;
        builder = builder.with_max_screenshot_size(width, height);
    }
    if let Some(quality) = arguments.quality {
        builder = builder.with_jpg_quality(quality);
    }
    let config = builder
        .with_overwrite_existing(arguments.overwrite || current.overwrite_existing())
        .with_show_title(current.show_title() && !arguments.no_title)
        .with_show_resolution(current.show_resolution() && !arguments.no_resolution)
        .with_show_file_size(current.show_file_size() && !arguments.no_file_size)
        .with_show_duration(current.show_duration() && !arguments.no_duration)
        .with_show_codec(current.show_codec() || arguments.codec)
        .with_show_timestamps(current.show_timestamps() || arguments.timestamps)
        .build()?;

    let mut options = settings.batch;
    if let Some(format) = &arguments.format {
        options = options.with_output_format(format.parse::<OutputFormat>()?);
    }
    if let Some(workers) = arguments.workers {
        options = options.with_workers(workers);
    }
    if let Some(suffix) = &arguments.suffix {
        options = options.with_suffix(suffix.as_str());
    }
    if arguments.flat {
        options = options.with_follow_structure(false);
    }
    if let Some(mode) = &arguments.mode {
        let mode = parse_composition_mode(mode).ok_or(format!("unsupported --mode: {mode}"))?;
        options = options.with_composition_mode(mode);
    }
    if let Some(filter) = &arguments.filter {
        options = options.with_resize_filter(filter.parse::<ResizeFilter>()?);
    }
    options.validate()?;

    Ok((config, options))
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )?;
        bar.set_style(style.progress_chars("#>-"));
        Ok(Self { bar })
    }
}

impl BatchProgress for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_length(info.total as u64);
        self.bar.set_position(info.finished() as u64);
        if let Some(name) = info
            .current
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().to_string())
        {
            self.bar.set_message(name);
        }
    }
}

/// Writes the latest sheet, shrunk to fit 400×600, to one file.
struct FilePreview {
    path: PathBuf,
}

impl PreviewSink for FilePreview {
    fn show(&mut self, video: &Path, sheet: &RgbImage) {
        let preview = fit_preview(sheet, PREVIEW_MAX_WIDTH, PREVIEW_MAX_HEIGHT);
        if let Err(error) = preview.save(&self.path) {
            log::warn!("Could not write preview for {}: {error}", video.display());
        }
    }
}

fn print_summary(summary: &BatchSummary, as_json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if as_json {
        let outcomes: Vec<_> = summary
            .outcomes
            .iter()
            .map(|record| {
                let (status, detail) = match &record.outcome {
                    Outcome::Success => ("success", None),
                    Outcome::Skipped { reason } => ("skipped", Some(reason.as_str())),
                    Outcome::Error { message } => ("error", Some(message.as_str())),
                };
                json!({
                    "video": record.video,
                    "output": record.output,
                    "status": status,
                    "detail": detail,
                })
            })
            .collect();
        let payload = json!({
            "processed": summary.succeeded(),
            "skipped": summary.skipped(),
            "errors": summary.errored(),
            "cancelled": summary.cancelled,
            "unfinished": summary.unfinished,
            "elapsed_seconds": summary.elapsed.as_secs_f64(),
            "outcomes": outcomes,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for record in summary.errors() {
        if let Outcome::Error { message } = &record.outcome {
            eprintln!(
                "{} {}: {message}",
                "failed:".red().bold(),
                record.video.display()
            );
        }
    }
    if summary.cancelled {
        eprintln!(
            "{} {}",
            "warning:".yellow().bold(),
            format!("cancelled with {} video(s) unfinished", summary.unfinished.len()).yellow()
        );
    }
    let line = summary.to_string();
    if summary.errored() > 0 || summary.cancelled {
        println!("{}", line.yellow().bold());
    } else {
        println!("{}", line.green().bold());
    }
    println!("{}", summary.total_time_line());
    Ok(())
}

fn run_batch(
    global: &GlobalOptions,
    arguments: RunArguments,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config, options) = resolve_run_settings(load_settings(global)?, &arguments)?;

    let progress = Arc::new(TerminalProgress::new()?);
    let orchestrator = BatchOrchestrator::new(config, options)?.with_progress(progress.clone());

    let token = orchestrator.cancellation_token();
    ctrlc::set_handler(move || {
        token.cancel();
        eprintln!("\nInterrupted; stopping after the videos in progress...");
    })?;

    let mut preview = arguments.preview.clone().map(|path| FilePreview { path });
    let summary = orchestrator.run(
        &arguments.input,
        &arguments.output,
        preview.as_mut().map(|sink| sink as &mut dyn PreviewSink),
    )?;
    progress.bar.finish_and_clear();

    if summary.outcomes.is_empty() && summary.unfinished.is_empty() {
        println!(
            "{} {}",
            "warning:".yellow().bold(),
            format!("no video files found in {}", arguments.input.display()).yellow()
        );
        return Ok(());
    }
    if summary.skipped() == summary.outcomes.len() && !summary.cancelled {
        println!(
            "{} {}",
            "info:".cyan().bold(),
            format!("All {} video(s) already processed (skipped)", summary.skipped())
        );
    }
    print_summary(&summary, arguments.json)
}

fn probe_video(input: &Path, as_json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let context = Arc::new(RuntimeContext::new());
    let video = MetadataProbe::new(context).probe(input)?;

    if as_json {
        let payload = json!({
            "filename": video.filename,
            "width": video.width,
            "height": video.height,
            "duration_seconds": video.duration,
            "fps": video.fps,
            "codec": video.codec,
            "file_size": video.file_size,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Title: {}", video.filename);
        println!("Resolution: {} × {}", video.width, video.height);
        println!("File Size: {}", metadata::format_file_size(video.file_size));
        println!("Duration: {}", metadata::format_duration(video.duration));
        println!("Frame rate: {:.2} fps", video.fps);
        println!("Codec: {}", video.codec.as_deref().unwrap_or("Unknown"));
    }
    Ok(())
}

fn show_binaries() -> Result<(), Box<dyn std::error::Error>> {
    let binaries = RuntimeContext::new().decoder_binaries()?;
    println!("{} {:?}", "source".cyan().bold(), binaries.source);
    println!("ffmpeg:  {}", binaries.ffmpeg.display());
    println!("ffprobe: {}", binaries.ffprobe.display());
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Run(arguments) => run_batch(&cli.global, arguments)?,
        Commands::Probe { input, json } => probe_video(&input, json)?,
        Commands::Binaries => show_binaries()?,
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "screenmachine", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_formats() {
        assert_eq!(parse_size("320x240"), Some((320, 240)));
        assert_eq!(parse_size(" 640 X 360 "), Some((640, 360)));
        assert_eq!(parse_size("640×360"), Some((640, 360)));
        assert_eq!(parse_size("640"), None);
        assert_eq!(parse_size("ax240"), None);
    }

    #[test]
    fn parse_composition_mode_aliases() {
        assert_eq!(parse_composition_mode("resize-once"), Some(CompositionMode::ResizeOnce));
        assert_eq!(parse_composition_mode("RESIZE_EACH"), Some(CompositionMode::ResizeEach));
        assert_eq!(parse_composition_mode("each"), Some(CompositionMode::ResizeEach));
        assert!(parse_composition_mode("stretch").is_none());
    }

    #[test]
    fn run_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "screenmachine",
            "run",
            "in",
            "out",
            "--rows",
            "3",
            "--size",
            "160x90",
            "--format",
            "png",
            "--flat",
            "--no-title",
            "--codec",
        ])
        .unwrap();
        let Commands::Run(arguments) = cli.command else {
            panic!("expected run");
        };
        let (config, options) = resolve_run_settings(Settings::default(), &arguments).unwrap();
        assert_eq!(config.rows(), 3);
        assert_eq!(config.columns(), 4);
        assert_eq!(config.max_screenshot_width(), 160);
        assert!(!config.show_title());
        assert!(config.show_codec());
        assert_eq!(options.output_format, OutputFormat::Png);
        assert!(!options.follow_structure);
    }

    #[test]
    fn invalid_values_are_rejected_before_running() {
        let cli = Cli::try_parse_from(["screenmachine", "run", "in", "out", "--rows", "0"]).unwrap();
        let Commands::Run(arguments) = cli.command else {
            panic!("expected run");
        };
        assert!(resolve_run_settings(Settings::default(), &arguments).is_err());

        let cli = Cli::try_parse_from(["screenmachine", "run", "in", "out", "--suffix", "a/b"])
            .unwrap();
        let Commands::Run(arguments) = cli.command else {
            panic!("expected run");
        };
        assert!(resolve_run_settings(Settings::default(), &arguments).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["screenmachine", "probe", "a.mp4", "--json", "--verbose"])
            .unwrap();
        assert!(cli.global.verbose);
        assert!(matches!(cli.command, Commands::Probe { json: true, .. }));
    }

    #[cfg(feature = "native")]
    #[test]
    fn parse_log_level_aliases() {
        assert_eq!(parse_log_level("warn"), Some(FfmpegLogLevel::Warning));
        assert!(parse_log_level("loud").is_none());
    }
}
