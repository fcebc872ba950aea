use thiserror::Error;

/// All errors produced by contrec-core.
#[derive(Debug, Error)]
pub enum ContrecError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("capture device failed mid-stream: {0}")]
    DeviceFailure(String),

    #[error("segment write failed: {0}")]
    WriteFailure(String),

    #[error("encode failed: {0}")]
    EncodeFailure(String),

    #[error("invalid capture config: {0}")]
    InvalidConfig(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ContrecError>;
