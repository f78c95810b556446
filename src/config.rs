use std::path::{Path, PathBuf};

use crate::error::{PagecutError, PagecutResult};

/// Capture framerate used when neither `fps` nor a `frames`/`duration` pair
/// is given.
pub const DEFAULT_FPS: f64 = 60.0;

/// Capture duration assumed when neither `frames` nor `duration` is given.
pub const DEFAULT_DURATION_SECS: f64 = 5.0;

/// Image format produced by the capture collaborator, one file or record per
/// frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }

    /// JPEG-family formats need the pipe demuxer workaround when streamed.
    pub fn is_jpeg(self) -> bool {
        matches!(self, Self::Jpeg)
    }
}

/// Viewport dimensions; the height may be left to the capture collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: Option<u32>,
}

/// Normalized render target handed unchanged to every capture worker.
#[derive(Clone, Debug)]
pub struct CaptureTarget {
    pub url: String,
    pub selector: Option<String>,
    pub viewport: Option<Viewport>,
    /// Virtual seconds to run before the first saved frame.
    pub start_secs: f64,
    pub x_offset: f64,
    pub y_offset: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub left: Option<u32>,
    pub right: Option<u32>,
    pub top: Option<u32>,
    pub bottom: Option<u32>,
    pub transparent_background: bool,
    pub round_to_even_width: bool,
    pub round_to_even_height: bool,
}

impl Default for CaptureTarget {
    fn default() -> Self {
        Self {
            url: "index.html".to_string(),
            selector: None,
            viewport: None,
            start_secs: 0.0,
            x_offset: 0.0,
            y_offset: 0.0,
            width: None,
            height: None,
            left: None,
            right: None,
            top: None,
            bottom: None,
            transparent_background: false,
            round_to_even_width: true,
            round_to_even_height: true,
        }
    }
}

/// How produced frames reach the encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Frames are materialized as numbered files and globbed by the encoder.
    Directory { frame_dir: PathBuf },
    /// Frames are piped straight into the encoder's input stream.
    Stream,
}

/// Host facts sampled once up front so that [`Config::resolve`] stays a pure
/// computation.
#[derive(Clone, Debug)]
pub struct Host {
    /// Detected hardware parallelism; requested worker counts are clamped
    /// down to this.
    pub parallelism: usize,
    /// Directory relative paths resolve against.
    pub working_dir: PathBuf,
    /// Milliseconds since the Unix epoch, used for frame-directory naming.
    pub timestamp_ms: u64,
}

impl Host {
    pub fn detect() -> Self {
        Self {
            parallelism: num_cpus::get().max(1),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }
}

/// Unresolved options as collected from the CLI or an embedding caller.
#[derive(Clone, Debug)]
pub struct RawOptions {
    pub url: Option<String>,
    pub output: Option<PathBuf>,
    pub fps: Option<f64>,
    pub duration: Option<f64>,
    pub frames: Option<u64>,
    pub threads: Option<usize>,
    /// Pipe frames into the encoder instead of caching files.
    pub pipe_mode: bool,
    /// Cache frames in a directory; the inner value optionally names the
    /// cache root the frame directory is nested under.
    pub frame_cache: Option<Option<PathBuf>>,
    /// Explicit frame directory; overrides the derived name.
    pub frame_dir: Option<PathBuf>,
    pub image_format: ImageFormat,
    pub keep_frames: bool,
    pub input_args: Vec<String>,
    pub output_args: Vec<String>,
    pub pix_fmt: Option<String>,
    pub encoder_path: Option<PathBuf>,
    /// Write the encoded container to the encoder's stdout instead of a file.
    pub stream_output: bool,
    pub selector: Option<String>,
    pub viewport: Option<Viewport>,
    pub start_secs: f64,
    pub x_offset: f64,
    pub y_offset: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub left: Option<u32>,
    pub right: Option<u32>,
    pub top: Option<u32>,
    pub bottom: Option<u32>,
    pub transparent_background: bool,
    pub round_to_even_width: bool,
    pub round_to_even_height: bool,
}

impl Default for RawOptions {
    fn default() -> Self {
        Self {
            url: None,
            output: None,
            fps: None,
            duration: None,
            frames: None,
            threads: None,
            pipe_mode: false,
            frame_cache: None,
            frame_dir: None,
            image_format: ImageFormat::default(),
            keep_frames: false,
            input_args: Vec::new(),
            output_args: Vec::new(),
            pix_fmt: None,
            encoder_path: None,
            stream_output: false,
            selector: None,
            viewport: None,
            start_secs: 0.0,
            x_offset: 0.0,
            y_offset: 0.0,
            width: None,
            height: None,
            left: None,
            right: None,
            top: None,
            bottom: None,
            transparent_background: false,
            round_to_even_width: true,
            round_to_even_height: true,
        }
    }
}

/// Fully-resolved pipeline configuration, built once per run and immutable
/// thereafter.
#[derive(Clone, Debug)]
pub struct Config {
    pub target: CaptureTarget,
    /// Absolute output file path (ignored when `stream_output` is set).
    pub output: PathBuf,
    /// Frames per second, always positive and finite.
    pub framerate: f64,
    pub total_frames: u64,
    /// Concurrent capture workers; always ≥ 1, and exactly 1 in Stream mode.
    pub worker_count: usize,
    pub delivery: DeliveryMode,
    pub image_format: ImageFormat,
    pub keep_frames: bool,
    pub encoder_path: PathBuf,
    pub input_args: Vec<String>,
    pub output_args: Vec<String>,
    pub pix_fmt: Option<String>,
    pub stream_output: bool,
}

impl Config {
    /// Resolve raw options into a complete configuration.
    ///
    /// Pure: all host facts come in through `host`, and no filesystem or
    /// process calls are made.
    pub fn resolve(raw: RawOptions, host: &Host) -> PagecutResult<Self> {
        let framerate = match (raw.fps, raw.frames, raw.duration) {
            (Some(fps), _, _) => fps,
            (None, Some(frames), Some(duration)) => {
                if duration <= 0.0 {
                    return Err(PagecutError::config("duration must be > 0 seconds"));
                }
                frames as f64 / duration
            }
            _ => DEFAULT_FPS,
        };
        if !framerate.is_finite() || framerate <= 0.0 {
            return Err(PagecutError::config(format!(
                "framerate must be positive and finite, got {framerate}"
            )));
        }

        let total_frames = match raw.frames {
            Some(frames) => frames,
            None => {
                let duration = raw.duration.unwrap_or(DEFAULT_DURATION_SECS);
                if !duration.is_finite() || duration < 0.0 {
                    return Err(PagecutError::config(format!(
                        "duration must be a non-negative number of seconds, got {duration}"
                    )));
                }
                (duration * framerate).round() as u64
            }
        };

        let requested = raw.threads.unwrap_or(1);
        if requested == 0 {
            return Err(PagecutError::config("thread count must be >= 1"));
        }
        let mut worker_count = requested.min(host.parallelism).max(1);

        let output = match raw.output {
            Some(path) if path.is_absolute() => path,
            Some(path) => host.working_dir.join(path),
            None => host.working_dir.join("video.mp4"),
        };
        let output_dir = output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| host.working_dir.clone());

        // Stream delivery only when explicitly piping and not caching frames.
        let frame_mode = raw.frame_cache.is_some() || !raw.pipe_mode;
        let delivery = if frame_mode {
            let mut name = raw.frame_dir.unwrap_or_else(|| {
                let stem = if raw.keep_frames { "frames" } else { "temp" };
                PathBuf::from(format!("pagecut-{stem}-{}", host.timestamp_ms))
            });
            if let Some(Some(cache_root)) = &raw.frame_cache {
                name = cache_root.join(name);
            }
            let frame_dir = if name.is_absolute() {
                name
            } else {
                output_dir.join(name)
            };
            DeliveryMode::Directory { frame_dir }
        } else {
            if worker_count > 1 {
                // A single ordered byte stream cannot be produced by
                // concurrent unordered writers.
                tracing::warn!(
                    requested = worker_count,
                    "stream delivery requires a single producer; forcing worker count to 1"
                );
                worker_count = 1;
            }
            DeliveryMode::Stream
        };

        let target = CaptureTarget {
            url: raw.url.unwrap_or_else(|| "index.html".to_string()),
            selector: raw.selector,
            viewport: raw.viewport,
            start_secs: raw.start_secs,
            x_offset: raw.x_offset,
            y_offset: raw.y_offset,
            width: raw.width,
            height: raw.height,
            left: raw.left,
            right: raw.right,
            top: raw.top,
            bottom: raw.bottom,
            transparent_background: raw.transparent_background,
            round_to_even_width: raw.round_to_even_width,
            round_to_even_height: raw.round_to_even_height,
        };

        Ok(Self {
            target,
            output,
            framerate,
            total_frames,
            worker_count,
            delivery,
            image_format: raw.image_format,
            keep_frames: raw.keep_frames,
            encoder_path: raw.encoder_path.unwrap_or_else(|| PathBuf::from("ffmpeg")),
            input_args: raw.input_args,
            output_args: raw.output_args,
            pix_fmt: raw.pix_fmt.or_else(|| Some("yuv420p".to_string())),
            stream_output: raw.stream_output,
        })
    }

    /// Frame directory, when frames are delivered through one.
    pub fn frame_dir(&self) -> Option<&Path> {
        match &self.delivery {
            DeliveryMode::Directory { frame_dir } => Some(frame_dir),
            DeliveryMode::Stream => None,
        }
    }

    /// Encoder input glob pattern (`image-%09d.<ext>`) in Directory mode.
    pub fn frame_pattern(&self) -> Option<PathBuf> {
        self.frame_dir()
            .map(|dir| dir.join(format!("image-%09d.{}", self.image_format.extension())))
    }
}
