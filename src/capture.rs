use std::{
    io::{Cursor, Read},
    path::PathBuf,
    process::{Command, Stdio},
};

use crate::{
    config::{CaptureTarget, ImageFormat},
    encoder::spawn_stderr_logger,
    error::{PagecutError, PagecutResult},
    partition::FrameRange,
    sink::FrameSink,
};

/// One worker's capture assignment: the shared render target plus the frame
/// range this worker is responsible for.
#[derive(Clone, Debug)]
pub struct CaptureRequest {
    pub target: CaptureTarget,
    pub framerate: f64,
    /// Length of the full output sequence, across all workers.
    pub total_frames: u64,
    pub range: FrameRange,
    pub image_format: ImageFormat,
}

impl CaptureRequest {
    /// Skip-predicate: a worker only emits frames inside its assigned range.
    pub fn should_emit(&self, frame: u64) -> bool {
        self.range.contains(frame)
    }
}

/// Producer of rendered frames.
///
/// An implementation walks the virtual timeline and calls `sink.emit` exactly
/// once per frame index inside `req.range`, in increasing order. Sources run
/// concurrently on separate workers with disjoint ranges and must not assume
/// anything about other workers' progress.
pub trait CaptureSource: Send + Sync {
    fn capture(&self, req: &CaptureRequest, sink: &dyn FrameSink) -> PagecutResult<()>;
}

/// Built-in source producing synthetic solid-color frames.
///
/// Lets the pipeline run end-to-end without an external renderer; the color
/// sweeps across the timeline so adjacent frames differ.
#[derive(Clone, Copy, Debug, Default)]
pub struct TestPatternSource;

impl CaptureSource for TestPatternSource {
    fn capture(&self, req: &CaptureRequest, sink: &dyn FrameSink) -> PagecutResult<()> {
        let (width, height) = pattern_dimensions(&req.target);
        for frame in 1..=req.total_frames {
            if !req.should_emit(frame) {
                continue;
            }
            let bytes =
                encode_pattern_frame(width, height, frame, req.total_frames, req.image_format)?;
            sink.emit(frame, &bytes)?;
        }
        Ok(())
    }
}

fn pattern_dimensions(target: &CaptureTarget) -> (u32, u32) {
    let mut width = target
        .width
        .or(target.viewport.map(|v| v.width))
        .unwrap_or(800);
    let mut height = target
        .height
        .or(target.viewport.and_then(|v| v.height))
        .unwrap_or(600);
    if target.round_to_even_width && width % 2 == 1 {
        width += 1;
    }
    if target.round_to_even_height && height % 2 == 1 {
        height += 1;
    }
    (width.max(1), height.max(1))
}

fn encode_pattern_frame(
    width: u32,
    height: u32,
    frame: u64,
    total_frames: u64,
    format: ImageFormat,
) -> PagecutResult<Vec<u8>> {
    let t = if total_frames <= 1 {
        0.0
    } else {
        (frame - 1) as f64 / (total_frames - 1) as f64
    };
    let r = (t * 255.0).round() as u8;
    let pixel = image::Rgb([r, 255 - r, 96]);

    let img = image::RgbImage::from_pixel(width, height, pixel);
    let out_format = match format {
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
    };

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, out_format).map_err(|e| {
        PagecutError::capture(format!("failed to encode test pattern frame {frame}: {e}"))
    })?;
    Ok(out.into_inner())
}

/// Source bridging to an external renderer binary.
///
/// The helper receives the target and range as command-line flags and writes
/// one record per captured frame to stdout: a 4-byte big-endian byte length
/// followed by the image bytes. Helper stderr is drained into the log.
pub struct CommandSource {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl CommandSource {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    /// Extra arguments appended verbatim after the generated flags.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn command(&self, req: &CaptureRequest) -> Command {
        let target = &req.target;
        let mut cmd = Command::new(&self.program);
        cmd.arg(&target.url)
            .args(["--fps", &format!("{}", req.framerate)])
            .args(["--total-frames", &req.total_frames.to_string()])
            .args(["--start-frame", &req.range.start.to_string()])
            .args(["--end-frame", &req.range.end.to_string()])
            .args(["--image-format", req.image_format.extension()]);

        if let Some(selector) = &target.selector {
            cmd.args(["--selector", selector]);
        }
        if let Some(viewport) = target.viewport {
            let dims = match viewport.height {
                Some(height) => format!("{},{height}", viewport.width),
                None => viewport.width.to_string(),
            };
            cmd.args(["--viewport", &dims]);
        }
        if target.start_secs > 0.0 {
            cmd.args(["--start", &format!("{}", target.start_secs)]);
        }
        if target.x_offset != 0.0 {
            cmd.args(["--x-offset", &format!("{}", target.x_offset)]);
        }
        if target.y_offset != 0.0 {
            cmd.args(["--y-offset", &format!("{}", target.y_offset)]);
        }
        for (flag, value) in [
            ("--width", target.width),
            ("--height", target.height),
            ("--left", target.left),
            ("--right", target.right),
            ("--top", target.top),
            ("--bottom", target.bottom),
        ] {
            if let Some(value) = value {
                cmd.args([flag, &value.to_string()]);
            }
        }
        if target.transparent_background {
            cmd.arg("--transparent-background");
        }
        if !target.round_to_even_width {
            cmd.arg("--no-round-to-even-width");
        }
        if !target.round_to_even_height {
            cmd.arg("--no-round-to-even-height");
        }
        cmd.args(&self.extra_args);
        cmd
    }
}

impl CaptureSource for CommandSource {
    fn capture(&self, req: &CaptureRequest, sink: &dyn FrameSink) -> PagecutResult<()> {
        if req.range.is_empty() {
            return Ok(());
        }

        let mut cmd = self.command(req);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            PagecutError::capture(format!(
                "failed to spawn capture command '{}': {e}",
                self.program.display()
            ))
        })?;

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_logger(stderr, "capture"));

        let result = match child.stdout.take() {
            Some(stdout) => pump_frame_records(stdout, req.range, sink),
            None => Err(PagecutError::capture("capture command stdout unavailable")),
        };

        if result.is_err() {
            // Stop a helper still mid-render; its remaining output has no
            // consumer.
            let _ = child.kill();
        }

        let status = child.wait().map_err(|e| {
            PagecutError::capture(format!("failed to wait for capture command: {e}"))
        });
        if let Some(task) = stderr_task {
            let _ = task.join();
        }

        let emitted = result?;
        let status = status?;
        if !status.success() {
            return Err(PagecutError::capture(format!(
                "capture command exited with status {status}"
            )));
        }
        if emitted != req.range.len_frames() {
            return Err(PagecutError::capture(format!(
                "capture command produced {emitted} of {} assigned frames",
                req.range.len_frames()
            )));
        }
        Ok(())
    }
}

/// Read length-prefixed frame records from `reader` and emit them under the
/// indices of `range`, in order. Returns the number of frames emitted.
fn pump_frame_records(
    mut reader: impl Read,
    range: FrameRange,
    sink: &dyn FrameSink,
) -> PagecutResult<u64> {
    let mut frame = range.start;
    let mut len_buf = [0u8; 4];

    while read_exact_or_eof(&mut reader, &mut len_buf)? {
        if frame > range.end {
            return Err(PagecutError::capture(
                "capture command produced more frames than its assigned range",
            ));
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut bytes = vec![0u8; len];
        reader.read_exact(&mut bytes).map_err(|e| {
            PagecutError::capture(format!("truncated frame record from capture command: {e}"))
        })?;
        sink.emit(frame, &bytes)?;
        frame += 1;
    }

    Ok(frame - range.start)
}

/// Fill `buf` from `reader`; `Ok(false)` on a clean end-of-stream before the
/// first byte, an error on end-of-stream mid-record.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> PagecutResult<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).map_err(|e| {
            PagecutError::capture(format!("failed to read from capture command: {e}"))
        })?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(PagecutError::capture(
                "truncated frame record from capture command",
            ));
        }
        filled += n;
    }
    Ok(true)
}
