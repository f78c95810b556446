#![forbid(unsafe_code)]

pub mod capture;
pub mod config;
pub mod encoder;
pub mod error;
pub mod partition;
pub mod pipeline;
pub mod sink;

pub use capture::{CaptureRequest, CaptureSource, CommandSource, TestPatternSource};
pub use config::{
    CaptureTarget, Config, DeliveryMode, Host, ImageFormat, RawOptions, Viewport,
};
pub use encoder::{EncoderProcess, build_args};
pub use error::{PagecutError, PagecutResult};
pub use partition::{FrameRange, partition};
pub use pipeline::run_pipeline;
pub use sink::{DirectorySink, FrameSink, MemorySink, StreamSink};
