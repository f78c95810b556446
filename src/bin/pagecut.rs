use std::{io::Write, path::PathBuf};

use clap::{Parser, ValueEnum};

use pagecut::{
    CommandSource, Config, Host, ImageFormat, RawOptions, TestPatternSource, Viewport,
    run_pipeline,
};

#[derive(Parser, Debug)]
#[command(
    name = "pagecut",
    version,
    about = "Record a web page into a video through an external renderer and ffmpeg"
)]
struct Cli {
    /// Page to record.
    #[arg(default_value = "index.html")]
    url: String,

    /// Name of the output file; `-` streams fragmented MP4 to stdout.
    #[arg(short = 'O', long, default_value = "video.mp4")]
    output: PathBuf,

    /// Frames per second to capture.
    #[arg(short = 'R', long)]
    fps: Option<f64>,

    /// Duration of the capture, in seconds.
    #[arg(short = 'd', long)]
    duration: Option<f64>,

    /// Number of frames to capture.
    #[arg(long)]
    frames: Option<u64>,

    /// CSS selector of the element to capture.
    #[arg(short = 'S', long)]
    selector: Option<String>,

    /// Viewport dimensions, in pixels (e.g. 800,600).
    #[arg(long, value_parser = parse_viewport)]
    viewport: Option<Viewport>,

    /// Allow transparent backgrounds (only works for certain encodings).
    #[arg(long)]
    transparent_background: bool,

    /// Cache frames in a directory before encoding; optionally names the
    /// cache root.
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    frame_cache: Option<PathBuf>,

    /// Directory for the frame files.
    #[arg(long)]
    frame_dir: Option<PathBuf>,

    /// Extra arguments for encoder input, space separated.
    #[arg(short = 'e', long)]
    input_options: Option<String>,

    /// Extra arguments for encoder output, space separated.
    #[arg(short = 'E', long)]
    output_options: Option<String>,

    /// Pixel format of the output.
    #[arg(short = 'p', long, default_value = "yuv420p")]
    pix_fmt: String,

    /// Pipe frames directly into the encoder instead of caching files.
    #[arg(short = 'P', long)]
    pipe_mode: bool,

    /// Number of concurrent capture workers.
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Run for n virtual seconds before saving any frames.
    #[arg(short = 's', long, default_value_t = 0.0)]
    start: f64,

    /// X offset of the capture, in pixels.
    #[arg(short = 'x', long, default_value_t = 0.0)]
    x_offset: f64,

    /// Y offset of the capture, in pixels.
    #[arg(short = 'y', long, default_value_t = 0.0)]
    y_offset: f64,

    /// Width of the capture, in pixels.
    #[arg(short = 'W', long)]
    width: Option<u32>,

    /// Height of the capture, in pixels.
    #[arg(short = 'H', long)]
    height: Option<u32>,

    /// Left edge of the capture, in pixels.
    #[arg(long)]
    left: Option<u32>,

    /// Right edge of the capture, in pixels.
    #[arg(long)]
    right: Option<u32>,

    /// Top edge of the capture, in pixels.
    #[arg(long)]
    top: Option<u32>,

    /// Bottom edge of the capture, in pixels.
    #[arg(long)]
    bottom: Option<u32>,

    /// Disable rounding of the capture width up to the nearest even number.
    #[arg(long)]
    no_round_to_even_width: bool,

    /// Disable rounding of the capture height up to the nearest even number.
    #[arg(long)]
    no_round_to_even_height: bool,

    /// Suppress diagnostic logging.
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Encoder binary to invoke.
    #[arg(long, default_value = "ffmpeg")]
    encoder_path: PathBuf,

    /// Renderer binary implementing the frame-record protocol.
    #[arg(long, default_value = "pagesnap")]
    capture_command: PathBuf,

    /// Extra arguments appended to the capture command, space separated.
    #[arg(long)]
    capture_options: Option<String>,

    /// Use the built-in test pattern instead of an external renderer.
    #[arg(long)]
    test_pattern: bool,

    /// Image format produced per frame.
    #[arg(long, value_enum, default_value_t = ScreenshotType::Png)]
    screenshot_type: ScreenshotType,

    /// Keep the frame directory after encoding.
    #[arg(long)]
    keep_frames: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScreenshotType {
    Png,
    Jpeg,
    Jpg,
}

impl From<ScreenshotType> for ImageFormat {
    fn from(value: ScreenshotType) -> Self {
        match value {
            ScreenshotType::Png => ImageFormat::Png,
            ScreenshotType::Jpeg | ScreenshotType::Jpg => ImageFormat::Jpeg,
        }
    }
}

fn parse_viewport(value: &str) -> Result<Viewport, String> {
    let mut parts = value.split(',').map(str::trim);
    let width = parts
        .next()
        .filter(|part| !part.is_empty())
        .ok_or("expected WIDTH or WIDTH,HEIGHT")?
        .parse()
        .map_err(|e| format!("invalid viewport width: {e}"))?;
    let height = match parts.next() {
        Some(part) => Some(
            part.parse()
                .map_err(|e| format!("invalid viewport height: {e}"))?,
        ),
        None => None,
    };
    Ok(Viewport { width, height })
}

// TODO: handle quoted arguments when splitting passthrough option strings.
fn split_options(options: Option<String>) -> Vec<String> {
    options
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

fn raw_options(cli: &Cli) -> RawOptions {
    let stream_output = cli.output.as_os_str() == "-";
    RawOptions {
        url: Some(cli.url.clone()),
        output: if stream_output {
            None
        } else {
            Some(cli.output.clone())
        },
        fps: cli.fps,
        duration: cli.duration,
        frames: cli.frames,
        threads: cli.threads,
        pipe_mode: cli.pipe_mode,
        frame_cache: cli.frame_cache.as_ref().map(|dir| {
            if dir.as_os_str().is_empty() {
                None
            } else {
                Some(dir.clone())
            }
        }),
        frame_dir: cli.frame_dir.clone(),
        image_format: cli.screenshot_type.into(),
        keep_frames: cli.keep_frames,
        input_args: split_options(cli.input_options.clone()),
        output_args: split_options(cli.output_options.clone()),
        pix_fmt: Some(cli.pix_fmt.clone()),
        encoder_path: Some(cli.encoder_path.clone()),
        stream_output,
        selector: cli.selector.clone(),
        viewport: cli.viewport,
        start_secs: cli.start,
        x_offset: cli.x_offset,
        y_offset: cli.y_offset,
        width: cli.width,
        height: cli.height,
        left: cli.left,
        right: cli.right,
        top: cli.top,
        bottom: cli.bottom,
        transparent_background: cli.transparent_background,
        round_to_even_width: !cli.no_round_to_even_width,
        round_to_even_height: !cli.no_round_to_even_height,
    }
}

fn init_tracing(quiet: bool) {
    let level = if quiet {
        tracing::Level::ERROR
    } else {
        tracing::Level::DEBUG
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let host = Host::detect();
    let cfg = Config::resolve(raw_options(&cli), &host)?;

    let output_stream: Option<Box<dyn Write + Send>> = if cfg.stream_output {
        Some(Box::new(std::io::stdout()))
    } else {
        None
    };

    if cli.test_pattern {
        run_pipeline(&cfg, &TestPatternSource, output_stream)?;
    } else {
        let source = CommandSource::new(&cli.capture_command)
            .with_args(split_options(cli.capture_options.clone()));
        run_pipeline(&cfg, &source, output_stream)?;
    }

    if !cfg.stream_output {
        eprintln!("wrote {}", cfg.output.display());
    }
    Ok(())
}
