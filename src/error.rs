pub type PagecutResult<T> = Result<T, PagecutError>;

#[derive(thiserror::Error, Debug)]
pub enum PagecutError {
    #[error("config error: {0}")]
    Config(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("encoder spawn error: {0}")]
    EncoderSpawn(String),

    #[error("encoder stream error: {0}")]
    EncoderStream(String),

    #[error("encoder error: {0}")]
    EncoderExit(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PagecutError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    pub fn encoder_spawn(msg: impl Into<String>) -> Self {
        Self::EncoderSpawn(msg.into())
    }

    pub fn encoder_stream(msg: impl Into<String>) -> Self {
        Self::EncoderStream(msg.into())
    }

    pub fn encoder_exit(msg: impl Into<String>) -> Self {
        Self::EncoderExit(msg.into())
    }

    pub fn filesystem(msg: impl Into<String>) -> Self {
        Self::Filesystem(msg.into())
    }
}
