use thiserror::Error;

/// All errors produced by revoice.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("chunk encoding error: {0}")]
    ChunkEncode(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("speech service error: {0}")]
    Service(String),

    #[error("remote processing failed: {0}")]
    Processing(String),

    #[error("remote job still pending after {attempts} polls")]
    JobTimeout { attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
