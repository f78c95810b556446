use std::{fs, io::Write, path::Path, sync::Mutex, thread};

use crate::{
    capture::{CaptureRequest, CaptureSource},
    config::{Config, DeliveryMode},
    encoder::EncoderProcess,
    error::{PagecutError, PagecutResult},
    partition::{FrameRange, partition},
    sink::{DirectorySink, FrameSink, StreamSink},
};

/// Single-assignment error-of-record.
///
/// The first recorded error determines the pipeline's outcome; anything
/// recorded afterwards (cleanup failures included) is logged, never
/// substituted.
struct ErrorCell {
    slot: Mutex<Option<PagecutError>>,
}

impl ErrorCell {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    fn record(&self, err: PagecutError) {
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            tracing::error!(error = %err, "pipeline error recorded");
            *slot = Some(err);
        } else {
            tracing::warn!(suppressed = %err, "later error; keeping the first as error of record");
        }
    }

    fn has_error(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) => slot.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    fn into_result(self) -> PagecutResult<()> {
        let slot = match self.slot.into_inner() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        match slot {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Run the full pipeline: capture into the mode's sink, drive the encoder to
/// completion, clean up, and surface the first error encountered anywhere.
///
/// `output_stream` receives the encoded container when `cfg.stream_output`
/// is set.
#[tracing::instrument(skip_all)]
pub fn run_pipeline(
    cfg: &Config,
    source: &dyn CaptureSource,
    output_stream: Option<Box<dyn Write + Send>>,
) -> PagecutResult<()> {
    let errors = ErrorCell::new();
    let ranges = partition(cfg.total_frames, cfg.worker_count);
    tracing::debug!(
        total_frames = cfg.total_frames,
        workers = ranges.len(),
        delivery = ?cfg.delivery,
        "starting pipeline"
    );

    match &cfg.delivery {
        DeliveryMode::Stream => run_stream(cfg, source, output_stream, &ranges, &errors),
        DeliveryMode::Directory { frame_dir } => {
            run_directory(cfg, source, output_stream, frame_dir, &ranges, &errors)
        }
    }

    // Cleanup runs unconditionally, success or failure.
    if let DeliveryMode::Directory { frame_dir } = &cfg.delivery
        && !cfg.keep_frames
        && let Err(e) = fs::remove_dir_all(frame_dir)
    {
        errors.record(PagecutError::filesystem(format!(
            "failed to remove frame directory '{}': {e}",
            frame_dir.display()
        )));
    }

    errors.into_result()
}

fn run_directory(
    cfg: &Config,
    source: &dyn CaptureSource,
    output_stream: Option<Box<dyn Write + Send>>,
    frame_dir: &Path,
    ranges: &[FrameRange],
    errors: &ErrorCell,
) {
    let sink = match DirectorySink::create(frame_dir, cfg.image_format.extension()) {
        Ok(sink) => sink,
        Err(e) => {
            errors.record(e);
            return;
        }
    };

    run_capture_tasks(cfg, source, &sink, ranges, errors);

    // Frame files are incomplete after a capture failure; skip encoding.
    if errors.has_error() {
        return;
    }

    match EncoderProcess::spawn(cfg, output_stream) {
        Ok(encoder) => {
            if let Err(e) = encoder.wait() {
                errors.record(e);
            }
        }
        Err(e) => errors.record(e),
    }
}

fn run_stream(
    cfg: &Config,
    source: &dyn CaptureSource,
    output_stream: Option<Box<dyn Write + Send>>,
    ranges: &[FrameRange],
    errors: &ErrorCell,
) {
    // The encoder must be alive before the producer writes its first frame.
    let mut encoder = match EncoderProcess::spawn(cfg, output_stream) {
        Ok(encoder) => encoder,
        Err(e) => {
            errors.record(e);
            return;
        }
    };

    let Some(stdin) = encoder.take_stdin() else {
        errors.record(PagecutError::encoder_stream("encoder stdin unavailable"));
        if let Err(e) = encoder.wait() {
            errors.record(e);
        }
        return;
    };

    let sink = StreamSink::new(stdin, encoder.failure_flag());
    run_capture_tasks(cfg, source, &sink, ranges, errors);

    // Always signal end-of-input and reap the child, error or not.
    sink.finish();
    if let Err(e) = encoder.wait() {
        errors.record(e);
    }
}

fn run_capture_tasks(
    cfg: &Config,
    source: &dyn CaptureSource,
    sink: &dyn FrameSink,
    ranges: &[FrameRange],
    errors: &ErrorCell,
) {
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(ranges.len());
        for (worker, range) in ranges.iter().enumerate() {
            let range = *range;
            let req = CaptureRequest {
                target: cfg.target.clone(),
                framerate: cfg.framerate,
                total_frames: cfg.total_frames,
                range,
                image_format: cfg.image_format,
            };
            handles.push(scope.spawn(move || {
                let span =
                    tracing::debug_span!("capture", worker, start = range.start, end = range.end);
                let _guard = span.enter();
                source.capture(&req, sink)
            }));
        }

        // Every task settles; a panic is captured, not dropped.
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.record(e),
                Err(_) => errors.record(PagecutError::capture("capture task panicked")),
            }
        }
    });
}
