use std::{
    fs,
    io::Write,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::error::{PagecutError, PagecutResult};

/// Destination for produced frames.
///
/// One `emit` call per non-skipped frame index. Implementations must tolerate
/// concurrent callers as long as those callers operate on disjoint index
/// ranges; the stream variant additionally requires a single producer.
pub trait FrameSink: Send + Sync {
    fn emit(&self, frame: u64, bytes: &[u8]) -> PagecutResult<()>;
}

/// Sink writing each frame as a zero-padded numbered file.
///
/// Concurrent writers never contend on a filename because their frame ranges
/// are disjoint, so no locking is needed.
pub struct DirectorySink {
    dir: PathBuf,
    extension: String,
}

impl DirectorySink {
    /// Create the frame directory (recursively, idempotently) and return the
    /// sink. Must be called before any writer starts.
    pub fn create(dir: impl Into<PathBuf>, extension: impl Into<String>) -> PagecutResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            PagecutError::filesystem(format!(
                "failed to create frame directory '{}': {e}",
                dir.display()
            ))
        })?;
        Ok(Self {
            dir,
            extension: extension.into(),
        })
    }

    /// File name for `frame`: nine zero-padded digits plus the extension,
    /// matching the `image-%09d.<ext>` glob handed to the encoder.
    pub fn file_name(frame: u64, extension: &str) -> String {
        format!("image-{frame:09}.{extension}")
    }

    /// Full path for `frame` inside the frame directory.
    pub fn path_for(&self, frame: u64) -> PathBuf {
        self.dir.join(Self::file_name(frame, &self.extension))
    }
}

impl FrameSink for DirectorySink {
    fn emit(&self, frame: u64, bytes: &[u8]) -> PagecutResult<()> {
        let path = self.path_for(frame);
        fs::write(&path, bytes).map_err(|e| {
            PagecutError::filesystem(format!(
                "failed to write frame file '{}': {e}",
                path.display()
            ))
        })
    }
}

struct StreamState<W> {
    writer: Option<W>,
    last_frame: Option<u64>,
}

/// Sink piping raw frame bytes into the encoder's input stream.
///
/// Single producer only (enforced at configuration time). Before every write
/// the shared encoder-failure flag is read once; when set, the sink fails
/// fast instead of writing into a dead pipe.
pub struct StreamSink<W> {
    state: Mutex<StreamState<W>>,
    encoder_failed: Arc<AtomicBool>,
}

impl<W: Write + Send> StreamSink<W> {
    pub fn new(writer: W, encoder_failed: Arc<AtomicBool>) -> Self {
        Self {
            state: Mutex::new(StreamState {
                writer: Some(writer),
                last_frame: None,
            }),
            encoder_failed,
        }
    }

    /// Close the stream to signal end-of-input to the encoder.
    pub fn finish(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        drop(state.writer.take());
    }
}

impl<W: Write + Send> FrameSink for StreamSink<W> {
    fn emit(&self, frame: u64, bytes: &[u8]) -> PagecutResult<()> {
        if self.encoder_failed.load(Ordering::SeqCst) {
            return Err(PagecutError::encoder_stream(
                "encoder already failed; refusing to write further frames",
            ));
        }

        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(last) = state.last_frame
            && frame <= last
        {
            return Err(PagecutError::encoder_stream(format!(
                "out-of-order frame {frame} after {last} on the encoder stream"
            )));
        }
        state.last_frame = Some(frame);

        let Some(writer) = state.writer.as_mut() else {
            return Err(PagecutError::encoder_stream(
                "encoder input stream is already closed",
            ));
        };

        writer.write_all(bytes).map_err(|e| {
            self.encoder_failed.store(true, Ordering::SeqCst);
            PagecutError::encoder_stream(format!(
                "failed to write frame {frame} to encoder input: {e}"
            ))
        })
    }
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: Mutex<Vec<(u64, Vec<u8>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured `(frame, bytes)` pairs in emit order.
    pub fn frames(&self) -> Vec<(u64, Vec<u8>)> {
        match self.frames.lock() {
            Ok(frames) => frames.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl FrameSink for MemorySink {
    fn emit(&self, frame: u64, bytes: &[u8]) -> PagecutResult<()> {
        let mut frames = match self.frames.lock() {
            Ok(frames) => frames,
            Err(poisoned) => poisoned.into_inner(),
        };
        frames.push((frame, bytes.to_vec()));
        Ok(())
    }
}
